//! Translation from generic identifiers to hardware
//! identifiers.
//!
//! Nothing in this module touches the enclave. Every request is
//! translated and validated here before the hardware lock is
//! taken, so an unsupported request never reaches the hardware.

use enclave_sscp::{self as sscp, CipherType};
use tracing::debug;

use crate::{
    alg::{AeadAlg, Algorithm, CipherAlg, Hash, KeyAgreementAlg, MacAlg, SignAlg},
    attributes::{EccFamily, KeyAttributes, KeyType},
    caps::Capabilities,
    error::{Error, Result},
};

/// The generic algorithm, with any hash stripped out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Generic {
    /// An unauthenticated cipher.
    Cipher(CipherAlg),
    /// An AEAD.
    Aead(AeadAlg),
    /// CMAC.
    Cmac,
    /// HMAC.
    Hmac,
    /// Randomized ECDSA.
    Ecdsa,
    /// PureEdDSA.
    PureEdDsa,
    /// Ed25519ph.
    Ed25519ph,
    /// ECDH.
    Ecdh,
    /// ECDH with the end-to-end blob derivation.
    EcdhCkdf,
    /// A plain hash.
    Digest,
}

/// The class of key an algorithm is used with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyClass {
    /// No key.
    None,
    /// An AES key.
    Aes,
    /// An HMAC key.
    Hmac,
    /// A short Weierstrass curve key.
    Weierstrass,
    /// A Montgomery curve key.
    Montgomery,
    /// A twisted Edwards curve key.
    Edwards,
    /// Anything else.
    Other,
}

impl KeyClass {
    /// Classifies `key_type`.
    pub const fn of(key_type: KeyType) -> Self {
        match key_type {
            KeyType::None => Self::None,
            KeyType::Aes => Self::Aes,
            KeyType::Hmac => Self::Hmac,
            KeyType::EccKeyPair(family) | KeyType::EccPublicKey(family) => match family {
                EccFamily::SecpR1 | EccFamily::SecpK1 | EccFamily::BrainpoolPR1 => {
                    Self::Weierstrass
                }
                EccFamily::Montgomery => Self::Montgomery,
                EccFamily::TwistedEdwards => Self::Edwards,
            },
            _ => Self::Other,
        }
    }
}

/// The capability a mapping requires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Requires {
    /// Always available.
    Always,
    /// Requires [`Capabilities::extended_hmac`].
    ExtendedHmac,
    /// Requires [`Capabilities::sha3`].
    Sha3,
}

impl Requires {
    const fn is_enabled(self, caps: &Capabilities) -> bool {
        match self {
            Self::Always => true,
            Self::ExtendedHmac => caps.extended_hmac,
            Self::Sha3 => caps.sha3,
        }
    }
}

/// One row of the algorithm table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    /// The generic algorithm.
    pub generic: Generic,
    /// The key class.
    pub key: KeyClass,
    /// The embedded hash, if any.
    pub hash: Option<Hash>,
    /// The hardware algorithm.
    pub hw: sscp::Algorithm,
    /// The capability the row requires.
    pub requires: Requires,
}

const fn row(
    generic: Generic,
    key: KeyClass,
    hash: Option<Hash>,
    hw: sscp::Algorithm,
    requires: Requires,
) -> Mapping {
    Mapping {
        generic,
        key,
        hash,
        hw,
        requires,
    }
}

use sscp::Algorithm as Hw;
use Generic as G;
use KeyClass as K;
use Requires as R;

#[rustfmt::skip]
static MAPPINGS: &[Mapping] = &[
    row(G::Cipher(CipherAlg::CbcNoPadding), K::Aes, None, Hw::AesCbc, R::Always),
    row(G::Cipher(CipherAlg::EcbNoPadding), K::Aes, None, Hw::AesEcb, R::Always),
    row(G::Cipher(CipherAlg::Ctr), K::Aes, None, Hw::AesCtr, R::Always),

    row(G::Aead(AeadAlg::Ccm), K::Aes, None, Hw::AesCcm, R::Always),
    row(G::Aead(AeadAlg::Gcm), K::Aes, None, Hw::AesGcm, R::Always),

    row(G::Cmac, K::Aes, None, Hw::CmacAes, R::Always),
    row(G::Hmac, K::Hmac, Some(Hash::Sha256), Hw::HmacSha256, R::Always),
    row(G::Hmac, K::Hmac, Some(Hash::Sha1), Hw::HmacSha1, R::ExtendedHmac),
    row(G::Hmac, K::Hmac, Some(Hash::Sha224), Hw::HmacSha224, R::ExtendedHmac),
    row(G::Hmac, K::Hmac, Some(Hash::Sha384), Hw::HmacSha384, R::ExtendedHmac),
    row(G::Hmac, K::Hmac, Some(Hash::Sha512), Hw::HmacSha512, R::ExtendedHmac),

    row(G::Ecdsa, K::Weierstrass, Some(Hash::Sha224), Hw::EcdsaSha224, R::Always),
    row(G::Ecdsa, K::Weierstrass, Some(Hash::Sha256), Hw::EcdsaSha256, R::Always),
    row(G::Ecdsa, K::Weierstrass, Some(Hash::Sha384), Hw::EcdsaSha384, R::Always),
    row(G::Ecdsa, K::Weierstrass, Some(Hash::Sha512), Hw::EcdsaSha512, R::Always),
    row(G::PureEdDsa, K::Edwards, None, Hw::EdDsaEd25519, R::Always),
    row(G::Ed25519ph, K::Edwards, Some(Hash::Sha512), Hw::EdDsaEd25519, R::Always),

    row(G::Ecdh, K::Weierstrass, None, Hw::Ecdh, R::Always),
    row(G::Ecdh, K::Montgomery, None, Hw::MontDh, R::Always),
    row(G::EcdhCkdf, K::Weierstrass, None, Hw::E2eBlob, R::Always),
    row(G::EcdhCkdf, K::Montgomery, None, Hw::E2eBlob, R::Always),

    row(G::Digest, K::None, Some(Hash::Sha1), Hw::Sha1, R::Always),
    row(G::Digest, K::None, Some(Hash::Sha224), Hw::Sha224, R::Always),
    row(G::Digest, K::None, Some(Hash::Sha256), Hw::Sha256, R::Always),
    row(G::Digest, K::None, Some(Hash::Sha384), Hw::Sha384, R::Always),
    row(G::Digest, K::None, Some(Hash::Sha512), Hw::Sha512, R::Always),
    row(G::Digest, K::None, Some(Hash::Sha3_224), Hw::Sha3_224, R::Sha3),
    row(G::Digest, K::None, Some(Hash::Sha3_256), Hw::Sha3_256, R::Sha3),
    row(G::Digest, K::None, Some(Hash::Sha3_384), Hw::Sha3_384, R::Sha3),
    row(G::Digest, K::None, Some(Hash::Sha3_512), Hw::Sha3_512, R::Sha3),
];

/// Returns every row of the algorithm table.
pub fn mappings() -> impl Iterator<Item = &'static Mapping> {
    MAPPINGS.iter()
}

/// Splits `alg` into its generic algorithm and embedded hash.
fn decompose(alg: Algorithm) -> Option<(Generic, Option<Hash>)> {
    let parts = match alg {
        Algorithm::Cipher(c) => (G::Cipher(c), None),
        Algorithm::Aead { aead, .. } => (G::Aead(aead), None),
        Algorithm::Mac {
            mac: MacAlg::Cmac, ..
        } => (G::Cmac, None),
        Algorithm::Mac {
            mac: MacAlg::Hmac(hash),
            ..
        } => (G::Hmac, Some(hash)),
        Algorithm::Sign(SignAlg::Ecdsa(hash)) => (G::Ecdsa, Some(hash)),
        Algorithm::Sign(SignAlg::PureEdDsa) => (G::PureEdDsa, None),
        Algorithm::Sign(SignAlg::Ed25519ph) => (G::Ed25519ph, Some(Hash::Sha512)),
        Algorithm::KeyAgreement(KeyAgreementAlg::Ecdh) => (G::Ecdh, None),
        Algorithm::KeyAgreement(KeyAgreementAlg::EcdhCkdf) => (G::EcdhCkdf, None),
        Algorithm::Hash(hash) => (G::Digest, Some(hash)),
        _ => return None,
    };
    Some(parts)
}

/// Maps a generic algorithm used with `key_type` to the
/// enclave's algorithm identifier.
pub fn translate_algorithm(
    caps: &Capabilities,
    alg: Algorithm,
    key_type: KeyType,
) -> Result<sscp::Algorithm> {
    let key = KeyClass::of(key_type);
    let found = decompose(alg).and_then(|(generic, hash)| {
        MAPPINGS
            .iter()
            .find(|m| m.generic == generic && m.key == key && m.hash == hash)
    });
    match found {
        Some(m) if m.requires.is_enabled(caps) => Ok(m.hw),
        Some(m) => {
            debug!(?alg, ?key_type, requires = ?m.requires, "algorithm disabled");
            Err(Error::NotSupported("algorithm disabled by capability profile"))
        }
        None => {
            debug!(?alg, ?key_type, "no hardware algorithm");
            Err(Error::NotSupported("algorithm/key type combination"))
        }
    }
}

/// Maps an elliptic curve key's family to the enclave's cipher
/// type.
pub fn translate_cipher_type(caps: &Capabilities, attrs: &KeyAttributes) -> Result<CipherType> {
    match attrs.key_type.ecc_family() {
        Some(EccFamily::SecpR1) => Ok(CipherType::EcNistP),
        Some(EccFamily::Montgomery) => Ok(CipherType::EcMontgomery),
        Some(EccFamily::TwistedEdwards) => Ok(CipherType::EcTwistedEd),
        Some(EccFamily::BrainpoolPR1) if caps.brainpool => Ok(CipherType::EcBrainpool),
        _ => {
            debug!(key_type = ?attrs.key_type, "no hardware cipher type");
            Err(Error::NotSupported("curve family"))
        }
    }
}

/// Maps a symmetric key type to the enclave's cipher type.
pub fn symmetric_cipher_type(key_type: KeyType) -> Result<CipherType> {
    match key_type {
        KeyType::Aes => Ok(CipherType::Aes),
        KeyType::Hmac => Ok(CipherType::Mac),
        _ => Err(Error::NotSupported("symmetric key type")),
    }
}

/// Reports whether `bits` is a valid size for an Ed25519 or
/// X25519 key.
pub const fn is_valid_ed25519_bits(bits: usize) -> bool {
    bits == 255 || bits == 256
}

/// Checks that a digest of `digest_len` bytes can be signed
/// with the key described by `attrs`.
///
/// The enclave requires the digest to be at least as long as
/// the key. P-521 keys count as 512 bits so they can sign
/// SHA-512 digests.
pub fn validate_bitlength_for_digest(
    attrs: &KeyAttributes,
    alg: SignAlg,
    digest_len: usize,
) -> Result<()> {
    match alg {
        SignAlg::Ecdsa(hash) | SignAlg::DeterministicEcdsa(hash) => {
            let key_bits = match attrs.bits {
                521 => 512,
                bits => bits,
            };
            let hash_bits = hash.digest_len().saturating_mul(8);
            let input_bits = digest_len.saturating_mul(8);
            if key_bits > hash_bits || key_bits > input_bits {
                debug!(key_bits, hash_bits, input_bits, "digest shorter than key");
                return Err(Error::NotSupported("digest shorter than key"));
            }
            Ok(())
        }
        SignAlg::Ed25519ph => {
            if !is_valid_ed25519_bits(attrs.bits) {
                return Err(Error::InvalidArgument("Ed25519 key size"));
            }
            Ok(())
        }
        _ => Err(Error::NotSupported("signature algorithm")),
    }
}

/// Checks the tag length of an AEAD algorithm.
///
/// Only AES keys are supported.
pub fn validate_tag_length(alg: Algorithm, key_type: KeyType) -> Result<()> {
    let Algorithm::Aead { aead, tag_len } = alg else {
        return Err(Error::InvalidArgument("not an AEAD"));
    };
    if key_type != KeyType::Aes {
        return Err(Error::NotSupported("AEAD key type"));
    }
    let valid: &[u8] = match aead {
        AeadAlg::Ccm => &[4, 6, 8, 10, 12, 14, 16],
        AeadAlg::Gcm => &[4, 8, 12, 13, 14, 15, 16],
        AeadAlg::ChaCha20Poly1305 => return Err(Error::NotSupported("AEAD mode")),
    };
    if !valid.contains(&tag_len) {
        debug!(?aead, tag_len, "invalid tag length");
        return Err(Error::InvalidArgument("tag length"));
    }
    Ok(())
}
