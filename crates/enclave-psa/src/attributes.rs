//! Key attributes.

use core::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::alg::Algorithm;

/// An elliptic curve family.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EccFamily {
    /// SEC random curves over prime fields (the NIST P curves).
    SecpR1,
    /// SEC Koblitz curves over prime fields.
    SecpK1,
    /// Brainpool P random curves.
    BrainpoolPR1,
    /// Montgomery curves (Curve25519, Curve448).
    Montgomery,
    /// Twisted Edwards curves (Edwards25519, Edwards448).
    TwistedEdwards,
}

impl EccFamily {
    /// Reports whether the family uses short Weierstrass
    /// curves.
    pub const fn is_weierstrass(self) -> bool {
        matches!(self, Self::SecpR1 | Self::SecpK1 | Self::BrainpoolPR1)
    }
}

/// The type of a key.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// No key.
    #[default]
    None,
    /// Raw data.
    RawData,
    /// An HMAC key.
    Hmac,
    /// An AES key.
    Aes,
    /// A ChaCha20 key.
    ChaCha20,
    /// An elliptic curve key pair.
    EccKeyPair(EccFamily),
    /// An elliptic curve public key.
    EccPublicKey(EccFamily),
    /// An RSA key pair.
    RsaKeyPair,
    /// An RSA public key.
    RsaPublicKey,
}

impl KeyType {
    /// The curve family of an elliptic curve key.
    pub const fn ecc_family(self) -> Option<EccFamily> {
        match self {
            Self::EccKeyPair(family) | Self::EccPublicKey(family) => Some(family),
            _ => None,
        }
    }

    /// Reports whether this is an elliptic curve key.
    pub const fn is_ecc(self) -> bool {
        self.ecc_family().is_some()
    }

    /// Reports whether this is an elliptic curve key pair.
    pub const fn is_ecc_key_pair(self) -> bool {
        matches!(self, Self::EccKeyPair(_))
    }

    /// Reports whether this is a public key.
    pub const fn is_public_key(self) -> bool {
        matches!(self, Self::EccPublicKey(_) | Self::RsaPublicKey)
    }

    /// Reports whether this is an asymmetric key.
    pub const fn is_asymmetric(self) -> bool {
        matches!(
            self,
            Self::EccKeyPair(_) | Self::EccPublicKey(_) | Self::RsaKeyPair | Self::RsaPublicKey
        )
    }
}

/// Where key material legally resides.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum KeyLocation {
    /// Plaintext key material held by the caller.
    #[default]
    Local,
    /// A blob provisioned through the provisioning gateway.
    Gateway,
    /// A blob wrapped under the device's die-unique key,
    /// bypassing the provisioning gateway.
    DieUnique,
    /// Non-key data provisioned through the gateway and
    /// tunnelled through the enclave.
    Data,
    /// Some other location this driver does not handle.
    Other(u32),
}

impl KeyLocation {
    /// Reports whether the key material is an opaque blob.
    pub const fn is_opaque(self) -> bool {
        matches!(self, Self::Gateway | Self::DieUnique | Self::Data)
    }
}

/// The permitted uses of a key.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct KeyUsage(u32);

impl KeyUsage {
    /// No usage.
    pub const NONE: Self = Self(0);
    /// The key may be exported.
    pub const EXPORT: Self = Self(0x0001);
    /// The key may be copied.
    pub const COPY: Self = Self(0x0002);
    /// The key may encrypt.
    pub const ENCRYPT: Self = Self(0x0100);
    /// The key may decrypt.
    pub const DECRYPT: Self = Self(0x0200);
    /// The key may sign messages.
    pub const SIGN_MESSAGE: Self = Self(0x0400);
    /// The key may verify messages.
    pub const VERIFY_MESSAGE: Self = Self(0x0800);
    /// The key may sign hashes.
    pub const SIGN_HASH: Self = Self(0x1000);
    /// The key may verify hashes.
    pub const VERIFY_HASH: Self = Self(0x2000);
    /// The key may be used for key derivation.
    pub const DERIVE: Self = Self(0x4000);

    /// Reports whether no usage is permitted.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Reports whether every usage in `other` is permitted.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Describes a key.
///
/// The driver never stores attributes; they accompany every
/// call that uses a key.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct KeyAttributes {
    /// The key's type.
    pub key_type: KeyType,
    /// The key's size in bits.
    pub bits: usize,
    /// The key's permitted uses.
    pub usage: KeyUsage,
    /// The algorithm the key is bound to.
    pub alg: Algorithm,
    /// Where the key material resides.
    pub location: KeyLocation,
    /// The key's identifier, or zero for volatile keys.
    pub id: u32,
}

impl KeyAttributes {
    /// Creates attributes for a local key.
    pub const fn new(key_type: KeyType, bits: usize) -> Self {
        Self {
            key_type,
            bits,
            usage: KeyUsage::NONE,
            alg: Algorithm::None,
            location: KeyLocation::Local,
            id: 0,
        }
    }

    /// Sets the algorithm.
    #[must_use]
    pub const fn with_alg(mut self, alg: Algorithm) -> Self {
        self.alg = alg;
        self
    }

    /// Sets the permitted uses.
    #[must_use]
    pub const fn with_usage(mut self, usage: KeyUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Sets the location.
    #[must_use]
    pub const fn with_location(mut self, location: KeyLocation) -> Self {
        self.location = location;
        self
    }

    /// Sets the identifier.
    #[must_use]
    pub const fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }
}
