//! Blob wrapping.
//!
//! Blobs are sealed with AES-256-CCM under a key that depends on
//! their origin. The header is the additional data.

use aes::Aes256;
use ccm::{
    Ccm,
    aead::{AeadInPlace, KeyInit, consts::U8, generic_array::GenericArray},
};
use enclave_sscp::{
    SssError, SssResult,
    blob::{Blob, BlobHeader, NONCE_LEN},
};
use zerocopy::IntoBytes;

type Wrap = Ccm<Aes256, U8, U8>;

/// Wraps `body` under `kek`.
pub(crate) fn seal(
    kek: &[u8; 32],
    header: BlobHeader,
    nonce: [u8; NONCE_LEN],
    body: &[u8],
) -> SssResult<Vec<u8>> {
    let header = header.as_bytes();
    let mut wrapped = body.to_vec();
    let tag = Wrap::new(GenericArray::from_slice(kek))
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), header, &mut wrapped)
        .map_err(|_| SssError::Fail)?;

    let mut out = Vec::with_capacity(header.len() + nonce.len() + wrapped.len() + tag.len());
    out.extend_from_slice(header);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Authenticates and unwraps `data` under `kek`.
pub(crate) fn open<'a>(kek: &[u8; 32], data: &'a [u8]) -> SssResult<(Blob<'a>, Vec<u8>)> {
    let blob = Blob::parse(data).map_err(|_| SssError::InvalidArgument)?;
    let mut body = blob.body().to_vec();
    Wrap::new(GenericArray::from_slice(kek))
        .decrypt_in_place_detached(
            GenericArray::from_slice(blob.nonce()),
            blob.header(),
            &mut body,
            GenericArray::from_slice(blob.tag()),
        )
        .map_err(|_| SssError::Fail)?;
    Ok((blob, body))
}

#[cfg(test)]
mod tests {
    use enclave_sscp::{
        CipherType, KeyPart,
        blob::{BLOB_OVERHEAD, Origin},
    };

    use super::*;

    #[test_log::test]
    fn test_tampering_is_detected() {
        let kek = [9u8; 32];
        let header = BlobHeader::for_key(Origin::DieUnique, CipherType::Aes, KeyPart::Default, 128);
        let blob = seal(&kek, header, [1; NONCE_LEN], &[0xab; 16]).expect("should seal");
        assert_eq!(blob.len(), 16 + BLOB_OVERHEAD);

        let (parsed, body) = open(&kek, &blob).expect("should open");
        assert_eq!(parsed.bits(), 128);
        assert_eq!(body, [0xab; 16]);

        for i in [0, 5, 12, 20, blob.len() - 1] {
            let mut bad = blob.clone();
            bad[i] ^= 0x80;
            assert!(open(&kek, &bad).is_err(), "byte {i}");
        }
        assert_eq!(open(&[0u8; 32], &blob).map(|_| ()), Err(SssError::Fail));
    }
}
