//! Generic algorithm identifiers.

use serde::{Deserialize, Serialize};

/// A hash algorithm.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Hash {
    /// SHA-1.
    Sha1,
    /// SHA-224.
    Sha224,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
    /// SHA3-224.
    Sha3_224,
    /// SHA3-256.
    Sha3_256,
    /// SHA3-384.
    Sha3_384,
    /// SHA3-512.
    Sha3_512,
}

impl Hash {
    /// The size in bytes of the digest.
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 | Self::Sha3_224 => 28,
            Self::Sha256 | Self::Sha3_256 => 32,
            Self::Sha384 | Self::Sha3_384 => 48,
            Self::Sha512 | Self::Sha3_512 => 64,
        }
    }
}

/// The largest digest of any [`Hash`].
pub const MAX_HASH_LEN: usize = 64;

/// An unauthenticated cipher mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CipherAlg {
    /// Counter mode.
    Ctr,
    /// Cipher feedback mode.
    Cfb,
    /// Output feedback mode.
    Ofb,
    /// XEX-based tweaked codebook mode.
    Xts,
    /// Electronic codebook mode without padding.
    EcbNoPadding,
    /// Cipher block chaining mode without padding.
    CbcNoPadding,
    /// Cipher block chaining mode with PKCS#7 padding.
    CbcPkcs7,
}

impl CipherAlg {
    /// The size of the IV the mode requires.
    pub const fn iv_len(self) -> usize {
        match self {
            Self::EcbNoPadding => 0,
            _ => 16,
        }
    }

    /// Reports whether the mode only accepts whole blocks.
    pub const fn is_block_mode(self) -> bool {
        matches!(self, Self::EcbNoPadding | Self::CbcNoPadding)
    }
}

/// An AEAD mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AeadAlg {
    /// Counter with CBC-MAC.
    Ccm,
    /// Galois/counter mode.
    Gcm,
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305,
}

/// A MAC algorithm.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MacAlg {
    /// HMAC.
    Hmac(Hash),
    /// CMAC.
    Cmac,
    /// CBC-MAC.
    CbcMac,
}

impl MacAlg {
    /// The size in bytes of an untruncated MAC.
    pub const fn full_len(self) -> usize {
        match self {
            Self::Hmac(hash) => hash.digest_len(),
            Self::Cmac | Self::CbcMac => 16,
        }
    }
}

/// A signature algorithm.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SignAlg {
    /// Randomized ECDSA.
    Ecdsa(Hash),
    /// Deterministic ECDSA.
    DeterministicEcdsa(Hash),
    /// EdDSA over the message itself.
    PureEdDsa,
    /// Ed25519ph.
    Ed25519ph,
    /// RSA PKCS#1 v1.5.
    RsaPkcs1v15(Hash),
    /// RSA-PSS.
    RsaPss(Hash),
}

impl SignAlg {
    /// The hash embedded in the algorithm, if any.
    pub const fn hash(self) -> Option<Hash> {
        match self {
            Self::Ecdsa(hash)
            | Self::DeterministicEcdsa(hash)
            | Self::RsaPkcs1v15(hash)
            | Self::RsaPss(hash) => Some(hash),
            Self::Ed25519ph => Some(Hash::Sha512),
            Self::PureEdDsa => None,
        }
    }

    /// Reports whether this is randomized ECDSA.
    pub const fn is_randomized_ecdsa(self) -> bool {
        matches!(self, Self::Ecdsa(_))
    }

    /// Reports whether this is either flavor of ECDSA.
    pub const fn is_ecdsa(self) -> bool {
        matches!(self, Self::Ecdsa(_) | Self::DeterministicEcdsa(_))
    }
}

/// A key agreement algorithm.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum KeyAgreementAlg {
    /// Elliptic curve Diffie-Hellman.
    Ecdh,
    /// ECDH followed by the enclave's proprietary end-to-end
    /// blob derivation.
    EcdhCkdf,
    /// Finite field Diffie-Hellman.
    Ffdh,
}

/// An algorithm, as named by the generic driver interface.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// No algorithm.
    #[default]
    None,
    /// A hash.
    Hash(Hash),
    /// A MAC, possibly truncated to `len` bytes.
    Mac {
        /// The MAC.
        mac: MacAlg,
        /// The truncated length, or `None` for the full length.
        len: Option<u8>,
    },
    /// An unauthenticated cipher.
    Cipher(CipherAlg),
    /// An AEAD with a `tag_len` byte tag.
    Aead {
        /// The AEAD.
        aead: AeadAlg,
        /// The size in bytes of the tag.
        tag_len: u8,
    },
    /// A signature.
    Sign(SignAlg),
    /// A key agreement.
    KeyAgreement(KeyAgreementAlg),
}

impl Algorithm {
    /// HMAC with a full-length tag.
    pub const fn hmac(hash: Hash) -> Self {
        Self::Mac {
            mac: MacAlg::Hmac(hash),
            len: None,
        }
    }

    /// CMAC with a full-length tag.
    pub const fn cmac() -> Self {
        Self::Mac {
            mac: MacAlg::Cmac,
            len: None,
        }
    }

    /// An AEAD with its default (16 byte) tag.
    pub const fn aead(aead: AeadAlg) -> Self {
        Self::Aead { aead, tag_len: 16 }
    }

    /// An AEAD with a shortened tag.
    pub const fn aead_with_tag(aead: AeadAlg, tag_len: u8) -> Self {
        Self::Aead { aead, tag_len }
    }

    /// Randomized ECDSA.
    pub const fn ecdsa(hash: Hash) -> Self {
        Self::Sign(SignAlg::Ecdsa(hash))
    }

    /// Reports whether this is an unauthenticated cipher.
    pub const fn is_cipher(&self) -> bool {
        matches!(self, Self::Cipher(_))
    }

    /// Reports whether this is an AEAD.
    pub const fn is_aead(&self) -> bool {
        matches!(self, Self::Aead { .. })
    }

    /// Reports whether this is a MAC.
    pub const fn is_mac(&self) -> bool {
        matches!(self, Self::Mac { .. })
    }

    /// The length of the MAC this algorithm produces, if it is
    /// a MAC.
    pub fn mac_len(&self) -> Option<usize> {
        match *self {
            Self::Mac { mac, len } => Some(len.map_or(mac.full_len(), usize::from)),
            _ => None,
        }
    }
}
