//! Opaque keys.
//!
//! Opaque keys never leave the enclave in plaintext. Key
//! locations hold wrapped blobs that only this enclave can
//! unwrap. The data location holds arbitrary data passed
//! through the enclave's data tunnel.

use enclave_sscp::{
    Session, TunnelType,
    blob::{BLOB_OVERHEAD, Blob, Origin},
};
use tracing::{debug, instrument, trace};

use crate::{
    alg::Algorithm,
    attributes::{EccFamily, KeyAttributes, KeyLocation, KeyType, KeyUsage},
    caps::Capabilities,
    compute,
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    keygen::stored_bits,
    keys::layout,
    util::{bits_to_bytes, ecc_keypair_size},
};

/// Returns the size of the wrapped body of a key described by
/// `attrs`.
fn expected_body_len(attrs: &KeyAttributes) -> usize {
    let bits = stored_bits(attrs);
    match attrs.key_type {
        KeyType::EccKeyPair(_) => ecc_keypair_size(bits),
        KeyType::EccPublicKey(_) => bits_to_bytes(bits).saturating_mul(2),
        _ => bits_to_bytes(bits),
    }
}

/// Checks a wrapped blob against the attributes it is claimed
/// to have, before the enclave sees it.
pub(crate) fn validate_blob_attributes(
    caps: &Capabilities,
    attrs: &KeyAttributes,
    data: &[u8],
) -> Result<()> {
    let blob = Blob::parse(data).map_err(|err| {
        debug!(%err, "malformed blob");
        Error::InvalidArgument("malformed blob")
    })?;

    let origin = match attrs.location {
        KeyLocation::Gateway => Origin::Gateway,
        KeyLocation::DieUnique => Origin::DieUnique,
        _ => return Err(Error::InvalidArgument("not a key location")),
    };
    if blob.origin() != origin {
        return Err(Error::InvalidArgument("blob origin does not match location"));
    }

    let (part, cipher) = layout(caps, attrs)?;
    if blob.part() != Some(part) || blob.cipher() != Some(cipher) {
        debug!(?part, ?cipher, blob_part = ?blob.part(), blob_cipher = ?blob.cipher(), "blob type mismatch");
        return Err(Error::InvalidArgument("blob does not match key type"));
    }
    if usize::from(blob.bits()) != stored_bits(attrs) {
        return Err(Error::InvalidArgument("blob does not match key size"));
    }
    if blob.body().len() != expected_body_len(attrs) {
        return Err(Error::InvalidArgument("blob body size"));
    }
    Ok(())
}

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Imports `data` into an opaque location, writing what is
    /// to be stored to `key_buffer`.
    ///
    /// Gateway blobs are checked by the driver and by the
    /// enclave, then stored as is. Data is passed through the
    /// enclave's data tunnel. Die-unique blobs cannot be
    /// imported; they are only ever generated.
    ///
    /// Returns the number of bytes written to `key_buffer`.
    #[instrument(skip_all, fields(location = ?attrs.location))]
    pub fn import_key(
        &self,
        attrs: &KeyAttributes,
        data: &[u8],
        key_buffer: &mut [u8],
    ) -> Result<usize> {
        match attrs.location {
            KeyLocation::Local => Err(Error::NotSupported("transparent import")),
            KeyLocation::Gateway => {
                let out = key_buffer
                    .get_mut(..data.len())
                    .ok_or(Error::InvalidArgument("key buffer too small"))?;
                self.with_hw(|hw| {
                    // Let the enclave check the blob too. The key
                    // object is not kept.
                    hw.import_key(&self.caps, attrs, data)?;
                    Ok(())
                })?;
                out.copy_from_slice(data);
                Ok(data.len())
            }
            KeyLocation::Data => self.with_hw(|hw| {
                compute::tunnel(hw.session(), TunnelType::GatewayData, data, key_buffer)
                    .or_generic()
            }),
            KeyLocation::DieUnique | KeyLocation::Other(_) => {
                Err(Error::InvalidArgument("location does not accept imports"))
            }
        }
    }

    /// Exports an opaque key.
    ///
    /// Data is returned as stored. Gateway keys can only be
    /// exported if they are unrestricted SECP-R1 public keys.
    ///
    /// Returns the number of bytes written to `data`.
    #[instrument(skip_all, fields(location = ?attrs.location))]
    pub fn export_key(
        &self,
        attrs: &KeyAttributes,
        key_buffer: &[u8],
        data: &mut [u8],
    ) -> Result<usize> {
        match attrs.location {
            KeyLocation::Data => {
                let out = data
                    .get_mut(..key_buffer.len())
                    .ok_or(Error::BufferTooSmall)?;
                out.copy_from_slice(key_buffer);
                Ok(key_buffer.len())
            }
            KeyLocation::Gateway
                if attrs.usage == KeyUsage::NONE
                    && attrs.alg == Algorithm::None
                    && attrs.key_type == KeyType::EccPublicKey(EccFamily::SecpR1) =>
            {
                self.export_public_key(attrs, key_buffer, data)
            }
            _ => Err(Error::NotSupported("export")),
        }
    }

    /// Destroys an opaque key.
    ///
    /// Key objects never outlive the operation that created
    /// them, so there is nothing to destroy.
    #[instrument(skip_all, fields(location = ?attrs.location))]
    pub fn destroy_key(&self, attrs: &KeyAttributes, key_buffer: &[u8]) -> Result<()> {
        trace!(len = key_buffer.len(), "nothing to destroy");
        Ok(())
    }

    /// Returns the size of the buffer needed to generate a key
    /// described by `attrs`, or zero if the driver does not
    /// generate such keys.
    pub fn get_key_buffer_size(&self, attrs: &KeyAttributes) -> usize {
        if attrs.location != KeyLocation::DieUnique {
            return 0;
        }
        let size = if attrs.key_type.is_ecc() {
            ecc_keypair_size(attrs.bits)
        } else {
            bits_to_bytes(attrs.bits)
        };
        size.saturating_add(BLOB_OVERHEAD)
    }

    /// Returns the size of the buffer needed to store `data`
    /// imported into the location of `attrs`, or zero if the
    /// location is not opaque.
    pub fn size_function(&self, attrs: &KeyAttributes, data: &[u8]) -> usize {
        match attrs.location {
            KeyLocation::Gateway | KeyLocation::DieUnique | KeyLocation::Data => data.len(),
            KeyLocation::Local | KeyLocation::Other(_) => 0,
        }
    }
}
