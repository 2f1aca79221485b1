use core::{fmt, ops::BitOr};

/// A handle to a key object resident in the enclave's
/// keystore.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// A handle to an operation context inside the enclave.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// An algorithm implemented by the enclave.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Algorithm {
    /// AES in ECB mode, no padding.
    AesEcb,
    /// AES in CBC mode, no padding.
    AesCbc,
    /// AES in counter mode.
    AesCtr,
    /// AES-CCM.
    AesCcm,
    /// AES-GCM.
    AesGcm,
    /// AES-CMAC.
    CmacAes,
    /// HMAC-SHA-1.
    HmacSha1,
    /// HMAC-SHA-224.
    HmacSha224,
    /// HMAC-SHA-256.
    HmacSha256,
    /// HMAC-SHA-384.
    HmacSha384,
    /// HMAC-SHA-512.
    HmacSha512,
    /// ECDSA over a SHA-224 digest.
    EcdsaSha224,
    /// ECDSA over a SHA-256 digest.
    EcdsaSha256,
    /// ECDSA over a SHA-384 digest.
    EcdsaSha384,
    /// ECDSA over a SHA-512 digest.
    EcdsaSha512,
    /// EdDSA over Ed25519.
    EdDsaEd25519,
    /// Elliptic curve Diffie-Hellman over short Weierstrass
    /// curves.
    Ecdh,
    /// Diffie-Hellman over Montgomery curves.
    MontDh,
    /// The enclave's proprietary end-to-end blob derivation.
    E2eBlob,
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

/// The direction of an operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Encrypt.
    Encrypt,
    /// Decrypt.
    Decrypt,
    /// Create a signature.
    Sign,
    /// Verify a signature.
    Verify,
    /// Compute a MAC.
    Mac,
    /// Compute a digest.
    Digest,
    /// Derive a shared secret.
    ComputeSharedSecret,
}

/// Which part of a key a key object holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum KeyPart {
    /// A symmetric key.
    Default = 1,
    /// The public half of an asymmetric key.
    Public = 2,
    /// The private half of an asymmetric key.
    Private = 3,
    /// Both halves of an asymmetric key.
    Pair = 4,
}

impl KeyPart {
    /// Converts the wire encoding back into a [`KeyPart`].
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Default),
            2 => Some(Self::Public),
            3 => Some(Self::Private),
            4 => Some(Self::Pair),
            _ => None,
        }
    }

    /// Returns the wire encoding.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// The family of key material held by a key object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CipherType {
    /// An AES key.
    Aes = 1,
    /// A MAC key.
    Mac = 2,
    /// Generic symmetric key material, e.g. a shared secret.
    Symmetric = 3,
    /// A NIST P curve key.
    EcNistP = 4,
    /// A Montgomery curve key.
    EcMontgomery = 5,
    /// A twisted Edwards curve key.
    EcTwistedEd = 6,
    /// A Brainpool R1 curve key.
    EcBrainpool = 7,
}

impl CipherType {
    /// Converts the wire encoding back into a [`CipherType`].
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Aes),
            2 => Some(Self::Mac),
            3 => Some(Self::Symmetric),
            4 => Some(Self::EcNistP),
            5 => Some(Self::EcMontgomery),
            6 => Some(Self::EcTwistedEd),
            7 => Some(Self::EcBrainpool),
            _ => None,
        }
    }

    /// Returns the wire encoding.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Reports whether this is an elliptic curve family.
    pub const fn is_ecc(self) -> bool {
        matches!(
            self,
            Self::EcNistP | Self::EcMontgomery | Self::EcTwistedEd | Self::EcBrainpool
        )
    }
}

/// Restrictions and permitted uses attached to a key object.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct KeyProperties(u32);

impl KeyProperties {
    /// No properties.
    pub const NONE: Self = Self(0);
    /// The key may be used for AES ciphers.
    pub const CRYPTO_AES: Self = Self(1 << 0);
    /// The key may be used for AEADs.
    pub const CRYPTO_AEAD: Self = Self(1 << 1);
    /// The key may be used for MACs.
    pub const CRYPTO_MAC: Self = Self(1 << 2);
    /// The key may be used to sign and verify.
    pub const CRYPTO_ASYM_SIGN_VERIFY: Self = Self(1 << 3);
    /// The key may be used for key derivation.
    pub const CRYPTO_KDF: Self = Self(1 << 4);
    /// Every crypto usage.
    pub const CRYPTO_ALL: Self = Self(0x1f);
    /// The key cannot be imported or exported.
    pub const NO_IMPORT_EXPORT: Self = Self(1 << 8);
    /// The key cannot be written in plaintext.
    pub const NO_PLAIN_WRITE: Self = Self(1 << 9);
    /// The key cannot be used to verify.
    pub const NO_VERIFY: Self = Self(1 << 10);
    /// The key cannot be used to sign.
    pub const NO_SIGN: Self = Self(1 << 11);

    /// Creates properties from their raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Reports whether every property in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Reports whether any property in `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the union of both sets of properties.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for KeyProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// The format of a wrapped key blob.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlobType {
    /// A blob provisioned through the provisioning gateway.
    Gateway,
    /// A blob wrapped under the device's die-unique key.
    DieUnique,
}

/// The kind of data tunnelled through the enclave.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TunnelType {
    /// Data provisioned through the provisioning gateway.
    GatewayData,
}

/// How a key object is released.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FreeMode {
    /// Release the handle only.
    Default,
    /// Release the handle and defragment the keystore.
    Defragment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_properties() {
        let props = KeyProperties::NO_IMPORT_EXPORT | KeyProperties::NO_SIGN;
        assert!(props.contains(KeyProperties::NO_SIGN));
        assert!(!props.contains(KeyProperties::NO_SIGN | KeyProperties::NO_VERIFY));
        assert!(props.intersects(KeyProperties::NO_SIGN | KeyProperties::NO_VERIFY));
        assert!(KeyProperties::CRYPTO_ALL.contains(
            KeyProperties::CRYPTO_AES
                | KeyProperties::CRYPTO_AEAD
                | KeyProperties::CRYPTO_MAC
                | KeyProperties::CRYPTO_ASYM_SIGN_VERIFY
                | KeyProperties::CRYPTO_KDF
        ));
    }

    #[test]
    fn test_wire_encodings() {
        for part in [KeyPart::Default, KeyPart::Public, KeyPart::Private, KeyPart::Pair] {
            assert_eq!(KeyPart::from_u8(part.to_u8()), Some(part));
        }
        assert_eq!(KeyPart::from_u8(0), None);
        assert_eq!(CipherType::from_u8(0), None);
        assert_eq!(CipherType::from_u8(8), None);
        assert!(CipherType::EcTwistedEd.is_ecc());
        assert!(!CipherType::Symmetric.is_ecc());
    }
}
