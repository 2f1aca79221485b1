//! Key objects and the material they hold.

use enclave_sscp::{CipherType, KeyPart, KeyProperties, SssError, SssResult};

use crate::crypto::Curve;

/// What [`key_object_allocate_handle`] bound to an object.
///
/// [`key_object_allocate_handle`]: enclave_sscp::Session::key_object_allocate_handle
#[derive(Copy, Clone, Debug)]
pub(crate) struct Handle {
    pub key_id: u32,
    pub part: KeyPart,
    pub cipher: CipherType,
    pub size: usize,
    pub props: KeyProperties,
}

/// Plaintext key material.
///
/// Symmetric keys and shared secrets live in `secret`.
/// Asymmetric keys keep the private scalar (if any) in `secret`
/// and the public key in `public`.
#[derive(Clone, Debug, Default)]
pub(crate) struct Material {
    pub bits: usize,
    pub secret: Vec<u8>,
    pub public: Vec<u8>,
}

impl Material {
    pub(crate) fn symmetric(secret: &[u8], bits: usize) -> Self {
        Self {
            bits,
            secret: secret.to_vec(),
            public: Vec::new(),
        }
    }

    /// Builds material from the encoding `set_key` accepts.
    ///
    /// Key pairs are `public ‖ private`, where the public field
    /// is two coordinates wide and zero padded for 25519 keys.
    pub(crate) fn decode(
        cipher: CipherType,
        part: KeyPart,
        bits: usize,
        data: &[u8],
    ) -> SssResult<Self> {
        if !cipher.is_ecc() {
            if part != KeyPart::Default {
                return Err(SssError::InvalidArgument);
            }
            return Ok(Self::symmetric(data, bits));
        }
        let curve = Curve::of(cipher, bits)?;
        let n = curve.scalar_len();
        match part {
            KeyPart::Private => {
                if data.len() != n {
                    return Err(SssError::InvalidArgument);
                }
                Ok(Self {
                    bits,
                    secret: data.to_vec(),
                    public: curve.public_from_private(data)?,
                })
            }
            KeyPart::Public => {
                if data.len() != curve.public_len() {
                    return Err(SssError::InvalidArgument);
                }
                curve.check_public(data)?;
                Ok(Self {
                    bits,
                    secret: Vec::new(),
                    public: data.to_vec(),
                })
            }
            KeyPart::Pair => {
                if data.len() != n.saturating_mul(3) {
                    return Err(SssError::InvalidArgument);
                }
                let (field, d) = data.split_at(n.saturating_mul(2));
                let public = curve.public_from_private(d)?;
                if field.get(..public.len()) != Some(&public[..]) {
                    return Err(SssError::InvalidArgument);
                }
                Ok(Self {
                    bits,
                    secret: d.to_vec(),
                    public,
                })
            }
            KeyPart::Default => Err(SssError::InvalidArgument),
        }
    }

    /// Generates fresh material for an object bound to
    /// `handle`.
    pub(crate) fn generate<R: rand::RngCore + rand::CryptoRng>(
        handle: &Handle,
        bits: usize,
        rng: &mut R,
    ) -> SssResult<Self> {
        if !handle.cipher.is_ecc() {
            let mut secret = vec![0u8; bits.div_ceil(8)];
            rng.fill_bytes(&mut secret);
            return Ok(Self::symmetric(&secret, bits));
        }
        if !matches!(handle.part, KeyPart::Pair | KeyPart::Private) {
            return Err(SssError::InvalidArgument);
        }
        let curve = Curve::of(handle.cipher, bits)?;
        let secret = curve.generate(rng)?;
        let public = curve.public_from_private(&secret)?;
        Ok(Self {
            bits,
            secret,
            public,
        })
    }

    /// Encodes `part` of the material, in the same encoding
    /// [`Material::decode`] takes except that public keys are
    /// padded to two coordinates when `padded` is set.
    pub(crate) fn encode(&self, cipher: CipherType, part: KeyPart, padded: bool) -> SssResult<Vec<u8>> {
        if !cipher.is_ecc() {
            return match part {
                KeyPart::Default => Ok(self.secret.clone()),
                _ => Err(SssError::InvalidArgument),
            };
        }
        let n = Curve::of(cipher, self.bits)?.scalar_len();
        let wide = |public: &[u8]| {
            let mut field = public.to_vec();
            field.resize(n.saturating_mul(2).max(public.len()), 0);
            field
        };
        match part {
            KeyPart::Public if padded => Ok(wide(&self.public)),
            KeyPart::Public => Ok(self.public.clone()),
            KeyPart::Private if !self.secret.is_empty() => Ok(self.secret.clone()),
            KeyPart::Pair if !self.secret.is_empty() => {
                let mut out = wide(&self.public);
                out.extend_from_slice(&self.secret);
                Ok(out)
            }
            _ => Err(SssError::InvalidArgument),
        }
    }
}

/// A key object.
#[derive(Clone, Debug, Default)]
pub(crate) struct Object {
    pub handle: Option<Handle>,
    pub material: Option<Material>,
}

impl Object {
    pub(crate) fn handle(&self) -> SssResult<&Handle> {
        self.handle.as_ref().ok_or(SssError::InvalidArgument)
    }

    /// Returns the material, or an error if the object is empty.
    ///
    /// Empty MAC objects stand for a zero-length key.
    pub(crate) fn material(&self) -> SssResult<Material> {
        match (&self.material, self.handle()?.cipher) {
            (Some(m), _) => Ok(m.clone()),
            (None, CipherType::Mac) => Ok(Material::default()),
            (None, _) => Err(SssError::Fail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_pair_must_match() {
        let d = [0x11u8; 32];
        let public = Curve::P256.public_from_private(&d).expect("public");
        let mut pair = public.clone();
        pair.extend_from_slice(&d);
        let m = Material::decode(CipherType::EcNistP, KeyPart::Pair, 256, &pair).expect("decode");
        assert_eq!(m.public, public);
        assert_eq!(m.encode(CipherType::EcNistP, KeyPart::Pair, true).expect("encode"), pair);

        pair[0] ^= 1;
        assert_eq!(
            Material::decode(CipherType::EcNistP, KeyPart::Pair, 256, &pair).map(|_| ()),
            Err(SssError::InvalidArgument)
        );
    }

    #[test_log::test]
    fn test_x25519_pair_is_padded() {
        let d = [0x22u8; 32];
        let m = Material::decode(CipherType::EcMontgomery, KeyPart::Private, 256, &d)
            .expect("decode");
        let pair = m
            .encode(CipherType::EcMontgomery, KeyPart::Pair, true)
            .expect("encode");
        assert_eq!(pair.len(), 96);
        assert_eq!(&pair[32..64], &[0u8; 32]);
        assert_eq!(&pair[64..], &d);
        let back = Material::decode(CipherType::EcMontgomery, KeyPart::Pair, 256, &pair)
            .expect("decode");
        assert_eq!(back.public, m.public);
    }
}
