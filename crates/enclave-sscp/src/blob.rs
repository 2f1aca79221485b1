//! Wrapped key blobs.
//!
//! The enclave never releases key material in plaintext once it
//! has been provisioned or generated on the device. Instead it
//! emits a *blob*: the key material encrypted and authenticated
//! under a key that never leaves the enclave.
//!
//! Every blob has the same shape:
//!
//! ```text
//! +--------+---------+------------------+---------+
//! | header | nonce   | wrapped material | tag     |
//! | 8 B    | 8 B     | n B              | 8 B     |
//! +--------+---------+------------------+---------+
//! ```
//!
//! The header is authenticated but not encrypted, so hosts can
//! sanity check a blob against the attributes they were given
//! before handing it to the enclave. Only the enclave can
//! authenticate or open the wrapped material.

use core::mem::size_of;

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::little_endian::U16,
};

use crate::{CipherType, KeyPart};

/// Identifies a blob.
pub const MAGIC: [u8; 2] = *b"EB";
/// The current blob format version.
pub const VERSION: u8 = 1;
/// The size in bytes of [`BlobHeader`].
pub const HEADER_LEN: usize = size_of::<BlobHeader>();
/// The size in bytes of a blob's nonce.
pub const NONCE_LEN: usize = 8;
/// The size in bytes of a blob's authentication tag.
pub const TAG_LEN: usize = 8;
/// The number of bytes a blob adds to the material it wraps.
pub const BLOB_OVERHEAD: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// Where a blob came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Origin {
    /// Key material provisioned through the provisioning
    /// gateway.
    Gateway = 1,
    /// Key material generated on the device and wrapped under
    /// its die-unique key.
    DieUnique = 2,
    /// Arbitrary (non-key) data provisioned through the
    /// provisioning gateway.
    Data = 3,
}

impl Origin {
    /// Converts the wire encoding back into an [`Origin`].
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Gateway),
            2 => Some(Self::DieUnique),
            3 => Some(Self::Data),
            _ => None,
        }
    }
}

/// The plaintext blob header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct BlobHeader {
    /// Always [`MAGIC`].
    pub magic: [u8; 2],
    /// Always [`VERSION`].
    pub version: u8,
    /// See [`Origin`].
    pub origin: u8,
    /// See [`CipherType`]. Zero for data blobs.
    pub cipher: u8,
    /// See [`KeyPart`]. Zero for data blobs.
    pub part: u8,
    /// The size of the wrapped key in bits.
    pub bits: U16,
}

impl BlobHeader {
    /// Creates a header for wrapped key material.
    pub fn for_key(origin: Origin, cipher: CipherType, part: KeyPart, bits: u16) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            origin: origin as u8,
            cipher: cipher.to_u8(),
            part: part.to_u8(),
            bits: U16::new(bits),
        }
    }

    /// Creates a header for wrapped data.
    pub fn for_data() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            origin: Origin::Data as u8,
            cipher: 0,
            part: 0,
            bits: U16::new(0),
        }
    }
}

/// An error returned by [`Blob::parse`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BlobError {
    /// The blob is too short to hold any material.
    #[error("blob too short")]
    TooShort,
    /// The blob does not start with [`MAGIC`].
    #[error("bad blob magic")]
    BadMagic,
    /// The blob's version is not supported.
    #[error("unsupported blob version: {0}")]
    UnsupportedVersion(u8),
    /// The blob's origin is unknown.
    #[error("unknown blob origin: {0}")]
    UnknownOrigin(u8),
    /// The blob's cipher type is unknown.
    #[error("unknown blob cipher type: {0}")]
    UnknownCipher(u8),
    /// The blob's key part is unknown.
    #[error("unknown blob key part: {0}")]
    UnknownPart(u8),
}

/// A parsed view of a blob.
#[derive(Copy, Clone, Debug)]
pub struct Blob<'a> {
    origin: Origin,
    cipher: Option<CipherType>,
    part: Option<KeyPart>,
    bits: u16,
    header: &'a [u8],
    nonce: &'a [u8],
    body: &'a [u8],
    tag: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Parses a blob without authenticating it.
    pub fn parse(data: &'a [u8]) -> Result<Self, BlobError> {
        if data.len() <= BLOB_OVERHEAD {
            return Err(BlobError::TooShort);
        }
        let (raw, rest) = BlobHeader::read_from_prefix(data).map_err(|_| BlobError::TooShort)?;
        if raw.magic != MAGIC {
            return Err(BlobError::BadMagic);
        }
        if raw.version != VERSION {
            return Err(BlobError::UnsupportedVersion(raw.version));
        }
        let origin = Origin::from_u8(raw.origin).ok_or(BlobError::UnknownOrigin(raw.origin))?;
        let (cipher, part) = if origin == Origin::Data {
            (None, None)
        } else {
            let cipher =
                CipherType::from_u8(raw.cipher).ok_or(BlobError::UnknownCipher(raw.cipher))?;
            let part = KeyPart::from_u8(raw.part).ok_or(BlobError::UnknownPart(raw.part))?;
            (Some(cipher), Some(part))
        };

        let header = data.get(..HEADER_LEN).ok_or(BlobError::TooShort)?;
        let (nonce, rest) = rest.split_at_checked(NONCE_LEN).ok_or(BlobError::TooShort)?;
        let body_len = rest.len().checked_sub(TAG_LEN).ok_or(BlobError::TooShort)?;
        let (body, tag) = rest.split_at_checked(body_len).ok_or(BlobError::TooShort)?;

        Ok(Self {
            origin,
            cipher,
            part,
            bits: raw.bits.get(),
            header,
            nonce,
            body,
            tag,
        })
    }

    /// Where the blob came from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The cipher type of the wrapped key, if any.
    pub fn cipher(&self) -> Option<CipherType> {
        self.cipher
    }

    /// The part of the wrapped key, if any.
    pub fn part(&self) -> Option<KeyPart> {
        self.part
    }

    /// The size of the wrapped key in bits.
    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// The encoded header. It is bound to the wrapped material
    /// as additional data.
    pub fn header(&self) -> &'a [u8] {
        self.header
    }

    /// The wrapping nonce.
    pub fn nonce(&self) -> &'a [u8] {
        self.nonce
    }

    /// The wrapped material.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// The authentication tag.
    pub fn tag(&self) -> &'a [u8] {
        self.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(header: BlobHeader, body_len: usize) -> Vec<u8> {
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(&[0xaa; NONCE_LEN]);
        out.extend(core::iter::repeat_n(0x55, body_len));
        out.extend_from_slice(&[0xcc; TAG_LEN]);
        out
    }

    #[test]
    fn test_overhead() {
        assert_eq!(HEADER_LEN, 8);
        assert_eq!(BLOB_OVERHEAD, 24);
    }

    #[test]
    fn test_parse_key_blob() {
        let data = blob(
            BlobHeader::for_key(Origin::DieUnique, CipherType::EcNistP, KeyPart::Pair, 256),
            96,
        );
        let blob = Blob::parse(&data).expect("should parse");
        assert_eq!(blob.origin(), Origin::DieUnique);
        assert_eq!(blob.cipher(), Some(CipherType::EcNistP));
        assert_eq!(blob.part(), Some(KeyPart::Pair));
        assert_eq!(blob.bits(), 256);
        assert_eq!(blob.header().len(), HEADER_LEN);
        assert_eq!(blob.nonce(), &[0xaa; NONCE_LEN]);
        assert_eq!(blob.body().len(), 96);
        assert_eq!(blob.tag(), &[0xcc; TAG_LEN]);
    }

    #[test]
    fn test_parse_data_blob() {
        let data = blob(BlobHeader::for_data(), 5);
        let blob = Blob::parse(&data).expect("should parse");
        assert_eq!(blob.origin(), Origin::Data);
        assert_eq!(blob.cipher(), None);
        assert_eq!(blob.part(), None);
        assert_eq!(blob.body(), &[0x55; 5]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let good = BlobHeader::for_key(Origin::Gateway, CipherType::Aes, KeyPart::Default, 128);

        assert_eq!(
            Blob::parse(&blob(good, 0)).map(|_| ()),
            Err(BlobError::TooShort)
        );

        let mut bad = good;
        bad.magic = *b"XX";
        assert_eq!(
            Blob::parse(&blob(bad, 16)).map(|_| ()),
            Err(BlobError::BadMagic)
        );

        let mut bad = good;
        bad.version = 9;
        assert_eq!(
            Blob::parse(&blob(bad, 16)).map(|_| ()),
            Err(BlobError::UnsupportedVersion(9))
        );

        let mut bad = good;
        bad.origin = 0;
        assert_eq!(
            Blob::parse(&blob(bad, 16)).map(|_| ()),
            Err(BlobError::UnknownOrigin(0))
        );

        let mut bad = good;
        bad.cipher = 0x42;
        assert_eq!(
            Blob::parse(&blob(bad, 16)).map(|_| ()),
            Err(BlobError::UnknownCipher(0x42))
        );
    }
}
