//! Key generation, public key export and key agreement.

use enclave_sscp::{
    Algorithm as HwAlgorithm, BlobType, CipherType, KeyPart, KeyProperties, Session,
    blob::BLOB_OVERHEAD,
};
use tracing::{debug, instrument, trace};

use crate::{
    alg::{Algorithm, KeyAgreementAlg},
    attributes::{EccFamily, KeyAttributes, KeyLocation, KeyType},
    compute,
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    keys::{ECC_ALLOC_SLACK, HwScope, ObjectSpec, layout},
    translate::{
        is_valid_ed25519_bits, symmetric_cipher_type, translate_algorithm,
        translate_cipher_type,
    },
    util::{UNCOMPRESSED_POINT, bits_to_bytes, ecc_keypair_size, ecc_public_key_export_size},
};

/// Properties of the key object receiving a shared secret: it
/// can be read out and nothing else.
const SHARED_SECRET_PROPS: KeyProperties = KeyProperties::NO_IMPORT_EXPORT
    .union(KeyProperties::NO_PLAIN_WRITE)
    .union(KeyProperties::NO_VERIFY)
    .union(KeyProperties::NO_SIGN);

/// Returns the number of bits the enclave stores for a key
/// described by `attrs`.
///
/// The enclave keeps X25519 and Ed25519 keys as 256-bit keys.
pub(crate) fn stored_bits(attrs: &KeyAttributes) -> usize {
    match attrs.key_type.ecc_family() {
        Some(EccFamily::Montgomery | EccFamily::TwistedEdwards)
            if is_valid_ed25519_bits(attrs.bits) =>
        {
            256
        }
        _ => attrs.bits,
    }
}

/// Returns the size of a peer's public key for a key agreement
/// with a key described by `attrs`, and how many leading bytes
/// the enclave does not want.
const fn peer_key_format(attrs: &KeyAttributes) -> (usize, usize) {
    let n = bits_to_bytes(attrs.bits);
    match attrs.key_type.ecc_family() {
        // X25519 public keys are a bare coordinate.
        Some(EccFamily::Montgomery) => (n, 0),
        _ => (ecc_public_key_export_size(attrs.bits), 1),
    }
}

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Generates a key.
    ///
    /// Transparent keys can only be elliptic curve key pairs;
    /// the private scalar is written to `key_buffer`. Opaque
    /// keys are generated on the die-unique location and
    /// written as a wrapped blob.
    ///
    /// Returns the number of bytes written to `key_buffer`.
    #[instrument(skip_all, fields(key_type = ?attrs.key_type, location = ?attrs.location))]
    pub fn generate_key(&self, attrs: &KeyAttributes, key_buffer: &mut [u8]) -> Result<usize> {
        if attrs.location.is_opaque() {
            return self.generate_opaque_key(attrs, key_buffer);
        }
        if attrs.key_type.is_public_key() {
            return Err(Error::InvalidArgument("cannot generate a public key"));
        }
        if !attrs.key_type.is_ecc() {
            return Err(Error::NotSupported("transparent keys must be ECC key pairs"));
        }
        let cipher = translate_cipher_type(&self.caps, attrs)?;
        let n = bits_to_bytes(attrs.bits);
        let out = key_buffer.get_mut(..n).ok_or(Error::BufferTooSmall)?;

        let spec = ObjectSpec {
            key_id: attrs.id,
            part: KeyPart::Pair,
            cipher,
            props: KeyProperties::CRYPTO_ASYM_SIGN_VERIFY,
            size: ecc_keypair_size(attrs.bits).saturating_add(ECC_ALLOC_SLACK),
        };
        self.with_hw(|hw| {
            let obj = hw.create_object(spec)?;
            hw.generate(&obj, attrs.bits)?;
            let got = hw.get_key(&obj, KeyPart::Private, out)?;
            Ok(got.len)
        })
    }

    fn generate_opaque_key(&self, attrs: &KeyAttributes, key_buffer: &mut [u8]) -> Result<usize> {
        if attrs.location != KeyLocation::DieUnique {
            return Err(Error::NotSupported("opaque keys are only generated die-unique"));
        }
        let bits = stored_bits(attrs);
        let (part, cipher, size) = if attrs.key_type.is_asymmetric() {
            if !attrs.key_type.is_ecc() {
                return Err(Error::NotSupported("asymmetric key type"));
            }
            if attrs.key_type.is_public_key() {
                return Err(Error::InvalidArgument("cannot generate a public key"));
            }
            let cipher = translate_cipher_type(&self.caps, attrs)?;
            (KeyPart::Pair, cipher, ecc_keypair_size(bits))
        } else {
            if !matches!(attrs.key_type, KeyType::Aes | KeyType::Hmac) {
                return Err(Error::NotSupported("symmetric key type"));
            }
            let cipher = symmetric_cipher_type(attrs.key_type)?;
            (KeyPart::Default, cipher, bits_to_bytes(bits))
        };
        let total = size
            .checked_add(BLOB_OVERHEAD)
            .ok_or(Error::InvalidArgument("key size"))?;
        let out = key_buffer.get_mut(..total).ok_or(Error::BufferTooSmall)?;

        let spec = ObjectSpec {
            key_id: attrs.id,
            part,
            cipher,
            // Usage policy is enforced above this driver.
            props: KeyProperties::CRYPTO_ALL,
            size,
        };
        self.with_hw(|hw| {
            let obj = hw.create_object(spec)?;
            hw.generate(&obj, bits)?;
            hw.export_blob(&obj, BlobType::DieUnique, out)
        })
    }

    /// Exports the public part of an elliptic curve key.
    ///
    /// Short Weierstrass points are written uncompressed, with a
    /// leading `0x04`. Montgomery and twisted Edwards keys are
    /// written as a bare coordinate.
    ///
    /// Returns the number of bytes written to `data`.
    #[instrument(skip_all, fields(key_type = ?attrs.key_type, location = ?attrs.location))]
    pub fn export_public_key(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        data: &mut [u8],
    ) -> Result<usize> {
        let Some(family) = attrs.key_type.ecc_family() else {
            return Err(Error::NotSupported("not an ECC key"));
        };
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        let (size, prefix) = if family.is_weierstrass() {
            (ecc_public_key_export_size(attrs.bits), 1)
        } else {
            (bits_to_bytes(attrs.bits), 0)
        };
        let out = data.get_mut(..size).ok_or(Error::BufferTooSmall)?;

        if attrs.location == KeyLocation::Local && attrs.key_type.is_public_key() {
            if key.len() != size {
                return Err(Error::InvalidArgument("public key format"));
            }
            out.copy_from_slice(key);
            return Ok(size);
        }

        let (marker, coords) = out.split_at_mut(prefix);
        let n = self.with_hw(|hw| {
            let obj = hw.import_key(&self.caps, attrs, key)?;
            let got = hw.get_key(&obj, KeyPart::Public, coords)?;
            Ok(got.len)
        })?;
        if let Some(m) = marker.first_mut() {
            *m = UNCOMPRESSED_POINT;
        }
        Ok(n.saturating_add(prefix))
    }

    /// Computes a shared secret from the key pair described by
    /// `attrs` and `peer_key`.
    ///
    /// Returns the number of bytes written to `shared_secret`.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn key_agreement(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        peer_key: &[u8],
        shared_secret: &mut [u8],
    ) -> Result<usize> {
        let hw_alg = if attrs.location.is_opaque() {
            self.check_opaque_agreement(attrs, key, alg, peer_key)?
        } else {
            self.check_transparent_agreement(attrs, alg, peer_key)?
        };
        let (expected, skip) = peer_key_format(attrs);
        let peer = match peer_key.get(skip..) {
            Some(peer) if peer_key.len() == expected => peer,
            _ => return Err(Error::InvalidArgument("peer key size")),
        };
        if skip == 1 && peer_key.first() != Some(&UNCOMPRESSED_POINT) {
            return Err(Error::InvalidArgument("peer key format"));
        }
        let n = bits_to_bytes(attrs.bits);
        let out = shared_secret.get_mut(..n).ok_or(Error::BufferTooSmall)?;

        let (_, cipher) = layout(&self.caps, attrs)?;
        self.with_hw(|hw| agree(hw, &self.caps, attrs, key, alg, hw_alg, cipher, peer, out))
            .inspect_err(|err| debug!(%err, "key agreement failed"))
    }

    fn check_transparent_agreement(
        &self,
        attrs: &KeyAttributes,
        alg: Algorithm,
        peer_key: &[u8],
    ) -> Result<HwAlgorithm> {
        if !attrs.key_type.is_ecc_key_pair()
            || alg != Algorithm::KeyAgreement(KeyAgreementAlg::Ecdh)
        {
            return Err(Error::InvalidArgument("key agreement needs an ECC key pair and ECDH"));
        }
        if peer_key.is_empty() {
            return Err(Error::InvalidArgument("empty peer key"));
        }
        match attrs.key_type.ecc_family() {
            Some(EccFamily::Montgomery) => {
                if attrs.bits != 255 {
                    return Err(Error::NotSupported("X25519 only"));
                }
            }
            Some(EccFamily::SecpR1) => {
                if !matches!(attrs.bits, 224 | 256 | 384 | 521) {
                    return Err(Error::InvalidArgument("curve size"));
                }
            }
            Some(EccFamily::BrainpoolPR1) if self.caps.brainpool => {
                if !matches!(attrs.bits, 192 | 224 | 256 | 320 | 384 | 512) {
                    return Err(Error::InvalidArgument("curve size"));
                }
            }
            _ => return Err(Error::NotSupported("curve family")),
        }
        translate_algorithm(&self.caps, alg, attrs.key_type)
    }

    fn check_opaque_agreement(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        peer_key: &[u8],
    ) -> Result<HwAlgorithm> {
        if !attrs.key_type.is_ecc() {
            return Err(Error::NotSupported("not an ECC key"));
        }
        let Algorithm::KeyAgreement(ka @ (KeyAgreementAlg::Ecdh | KeyAgreementAlg::EcdhCkdf)) =
            alg
        else {
            return Err(Error::NotSupported("key agreement algorithm"));
        };
        let family = match attrs.key_type {
            KeyType::EccKeyPair(family @ (EccFamily::SecpR1 | EccFamily::Montgomery)) => family,
            _ => return Err(Error::NotSupported("curve family")),
        };
        let supported = match attrs.bits {
            256 => true,
            255 => family == EccFamily::Montgomery,
            224 | 384 | 521 => family == EccFamily::SecpR1 && ka == KeyAgreementAlg::Ecdh,
            _ => false,
        };
        if !supported {
            return Err(Error::NotSupported("curve size"));
        }
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        if peer_key.is_empty() {
            return Err(Error::InvalidArgument("empty peer key"));
        }
        translate_algorithm(&self.caps, alg, attrs.key_type)
    }
}

/// Derives a shared secret into `out`.
///
/// The key objects are created so that the scope deletes the
/// peer key first, then the shared secret, then our key.
#[allow(clippy::too_many_arguments)]
fn agree<S: Session>(
    hw: &mut HwScope<'_, S>,
    caps: &crate::caps::Capabilities,
    attrs: &KeyAttributes,
    key: &[u8],
    alg: Algorithm,
    hw_alg: HwAlgorithm,
    cipher: CipherType,
    peer: &[u8],
    out: &mut [u8],
) -> Result<usize> {
    let own = hw.import_key(caps, &attrs.with_alg(alg), key)?;
    let shared = hw.create_object(ObjectSpec {
        key_id: 0,
        part: KeyPart::Default,
        cipher: CipherType::Symmetric,
        props: SHARED_SECRET_PROPS,
        size: bits_to_bytes(attrs.bits),
    })?;
    let peer = hw.set_key(
        ObjectSpec {
            key_id: 0,
            part: KeyPart::Public,
            cipher,
            props: KeyProperties::CRYPTO_KDF,
            size: ecc_public_key_export_size(attrs.bits),
        },
        peer,
        attrs.bits,
    )?;
    compute::derive_dh(hw, &own, hw_alg, &peer, &shared).or_generic()?;
    let got = hw
        .session()
        .key_store_get_key(shared.id(), KeyPart::Default, out)
        .or_generic()?;
    trace!(len = got.len, "derived shared secret");
    Ok(got.len)
}
