//! Asymmetric signatures.

use enclave_sscp::{Algorithm as HwAlgorithm, KeyPart, KeyProperties, Session};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::{debug, instrument};

use crate::{
    alg::{Algorithm, Hash, MAX_HASH_LEN, SignAlg},
    attributes::{EccFamily, KeyAttributes, KeyLocation},
    compute,
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    keys::{ECC_ALLOC_SLACK, HwScope, KeyObject, ObjectSpec},
    translate::{
        is_valid_ed25519_bits, translate_algorithm, translate_cipher_type,
        validate_bitlength_for_digest,
    },
    util::bits_to_bytes,
};

/// The largest coordinate of any supported curve (P-521).
const MAX_COORDINATE_LEN: usize = 66;

/// What is being signed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Input {
    Hash,
    Message,
}

/// Hashes `input` with `hash` in software.
fn prehash(hash: Hash, input: &[u8], out: &mut [u8; MAX_HASH_LEN]) -> Result<usize> {
    fn run<D: Digest>(input: &[u8], out: &mut [u8]) -> usize {
        let digest = D::digest(input);
        out[..digest.len()].copy_from_slice(&digest);
        digest.len()
    }
    let n = match hash {
        Hash::Sha224 => run::<Sha224>(input, out),
        Hash::Sha256 => run::<Sha256>(input, out),
        Hash::Sha384 => run::<Sha384>(input, out),
        Hash::Sha512 => run::<Sha512>(input, out),
        _ => return Err(Error::NotSupported("pre-hash algorithm")),
    };
    Ok(n)
}

/// Returns the size of a signature made with the key described
/// by `attrs`.
const fn signature_size(attrs: &KeyAttributes) -> usize {
    bits_to_bytes(attrs.bits).saturating_mul(2)
}

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Checks that `alg` can sign `input` with the key described
    /// by `attrs`.
    fn sign_params(
        &self,
        attrs: &KeyAttributes,
        alg: Algorithm,
        input: Input,
    ) -> Result<(SignAlg, HwAlgorithm)> {
        let Algorithm::Sign(sign) = alg else {
            return Err(Error::NotSupported("not a signature algorithm"));
        };
        let hw_alg = translate_algorithm(&self.caps, alg, attrs.key_type)?;
        translate_cipher_type(&self.caps, attrs)?;

        if input == Input::Message {
            match sign {
                SignAlg::Ecdsa(hash) | SignAlg::DeterministicEcdsa(hash) => {
                    validate_bitlength_for_digest(attrs, sign, hash.digest_len())?
                }
                SignAlg::Ed25519ph => {
                    validate_bitlength_for_digest(attrs, sign, Hash::Sha512.digest_len())?
                }
                SignAlg::PureEdDsa if is_valid_ed25519_bits(attrs.bits) => {}
                _ => return Err(Error::NotSupported("key size")),
            }
        }

        let family = attrs.key_type.ecc_family();
        match attrs.location {
            KeyLocation::Local if !sign.is_randomized_ecdsa() => {
                return Err(Error::NotSupported("transparent keys only sign with ECDSA"));
            }
            KeyLocation::Gateway => {
                let allowed = match (input, family) {
                    (Input::Hash, Some(EccFamily::SecpR1)) => sign.is_randomized_ecdsa(),
                    (Input::Message, Some(EccFamily::SecpR1)) => sign.is_ecdsa(),
                    (Input::Message, Some(EccFamily::TwistedEdwards)) => {
                        sign == SignAlg::PureEdDsa
                    }
                    _ => false,
                };
                if !allowed {
                    return Err(Error::NotSupported("algorithm not allowed for gateway keys"));
                }
            }
            _ => {}
        }

        let allowed = match input {
            Input::Hash => sign.is_randomized_ecdsa() || sign == SignAlg::Ed25519ph,
            Input::Message => {
                sign.is_randomized_ecdsa()
                    || sign == SignAlg::PureEdDsa
                    || sign == SignAlg::Ed25519ph
            }
        };
        if !allowed {
            return Err(Error::NotSupported("signature algorithm"));
        }
        Ok((sign, hw_alg))
    }

    /// Binds a signing key to a fresh key object.
    ///
    /// Transparent key pairs are only the private scalar, but
    /// the enclave signs with the whole pair. The public part is
    /// recomputed by the enclave first.
    fn sign_key(
        &self,
        hw: &mut HwScope<'_, S>,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
    ) -> Result<KeyObject> {
        let attrs = attrs.with_alg(alg);
        if attrs.location != KeyLocation::Local || !attrs.key_type.is_ecc_key_pair() {
            return hw.import_key(&self.caps, &attrs, key);
        }

        let n = bits_to_bytes(attrs.bits);
        if key.len() != n || n > MAX_COORDINATE_LEN {
            return Err(Error::InvalidArgument("key size does not match key buffer"));
        }
        let cipher = translate_cipher_type(&self.caps, &attrs)?;

        let mut pair = [0u8; MAX_COORDINATE_LEN * 3];
        let private = hw.import_key(&self.caps, &attrs, key)?;
        let public = hw.get_key(&private, KeyPart::Public, &mut pair[..n * 2])?;
        // Best effort, and already logged.
        let _ = hw.delete_key(private);
        if public.len != n * 2 {
            return Err(Error::GenericError);
        }
        pair[n * 2..n * 3].copy_from_slice(key);

        let spec = ObjectSpec {
            key_id: attrs.id,
            part: KeyPart::Pair,
            cipher,
            props: KeyProperties::CRYPTO_ASYM_SIGN_VERIFY,
            size: (n * 3).saturating_add(ECC_ALLOC_SLACK),
        };
        hw.set_key(spec, &pair[..n * 3], attrs.bits)
    }

    /// Signs `data`, which has already been validated.
    fn sign_prepared(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        hw_alg: HwAlgorithm,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<usize> {
        let out = signature
            .get_mut(..signature_size(attrs))
            .ok_or(Error::BufferTooSmall)?;
        self.with_hw(|hw| {
            let obj = self.sign_key(hw, attrs, key, alg)?;
            compute::sign_digest(hw, &obj, hw_alg, data, out).or_generic()
        })
        .inspect_err(|err| debug!(%err, "signing failed"))
    }

    /// Verifies `signature` over `data`, which has already been
    /// validated.
    fn verify_prepared(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        hw_alg: HwAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.with_hw(|hw| {
            let obj = self.sign_key(hw, attrs, key, alg)?;
            compute::verify_digest(hw, &obj, hw_alg, data, signature).or_invalid_signature()
        })
    }

    /// Signs the digest `hash`.
    ///
    /// Returns the number of bytes written to `signature`.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn sign_hash(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        hash: &[u8],
        signature: &mut [u8],
    ) -> Result<usize> {
        let (sign, hw_alg) = self.sign_params(attrs, alg, Input::Hash)?;
        validate_bitlength_for_digest(attrs, sign, hash.len())?;
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        if hash.is_empty() {
            return Err(Error::InvalidArgument("empty hash"));
        }
        self.sign_prepared(attrs, key, alg, hw_alg, hash, signature)
    }

    /// Verifies `signature` over the digest `hash`.
    ///
    /// Any failure reported by the enclave while verifying is
    /// reported as [`Error::InvalidSignature`].
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn verify_hash(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        hash: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let (sign, hw_alg) = self.sign_params(attrs, alg, Input::Hash)?;
        validate_bitlength_for_digest(attrs, sign, hash.len())?;
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        if hash.is_empty() {
            return Err(Error::InvalidArgument("empty hash"));
        }
        if signature.is_empty() {
            return Err(Error::InvalidArgument("empty signature"));
        }
        self.verify_prepared(attrs, key, alg, hw_alg, hash, signature)
    }

    /// Signs `input`.
    ///
    /// Hash-and-sign algorithms hash `input` in software first.
    /// Returns the number of bytes written to `signature`.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn sign_message(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        input: &[u8],
        signature: &mut [u8],
    ) -> Result<usize> {
        let (sign, hw_alg) = self.sign_params(attrs, alg, Input::Message)?;
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        if input.is_empty() {
            return Err(Error::InvalidArgument("empty message"));
        }
        let mut digest = [0u8; MAX_HASH_LEN];
        let data = match sign.hash() {
            Some(hash) => {
                let n = prehash(hash, input, &mut digest)?;
                &digest[..n]
            }
            None => input,
        };
        self.sign_prepared(attrs, key, alg, hw_alg, data, signature)
    }

    /// Verifies `signature` over `input`.
    ///
    /// Any failure reported by the enclave while verifying is
    /// reported as [`Error::InvalidSignature`].
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn verify_message(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        input: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let (sign, hw_alg) = self.sign_params(attrs, alg, Input::Message)?;
        if key.is_empty() {
            return Err(Error::InvalidArgument("empty key"));
        }
        if input.is_empty() {
            return Err(Error::InvalidArgument("empty message"));
        }
        if signature.is_empty() {
            return Err(Error::InvalidArgument("empty signature"));
        }
        let mut digest = [0u8; MAX_HASH_LEN];
        let data = match sign.hash() {
            Some(hash) => {
                let n = prehash(hash, input, &mut digest)?;
                &digest[..n]
            }
            None => input,
        };
        self.verify_prepared(attrs, key, alg, hw_alg, data, signature)
    }
}
