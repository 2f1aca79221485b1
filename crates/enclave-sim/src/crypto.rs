//! The primitives behind the simulated enclave.
//!
//! Everything here works on plaintext key material. The
//! keystore and contexts decide which key reaches which
//! primitive.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    AesGcm,
    aead::{
        AeadInPlace, KeyInit,
        consts::{U4, U6, U7, U8, U9, U10, U11, U12, U13, U14, U16},
        generic_array::GenericArray,
    },
};
use ccm::Ccm;
use cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyIvInit, StreamCipher,
    block_padding::NoPadding,
};
use cmac::Cmac;
use ed25519_dalek::{Signer, Verifier};
use enclave_sscp::{Algorithm, CipherType, Mode, SssError, SssResult};
use hmac::{Hmac, Mac};
use p256::{
    ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier},
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::{CryptoRng, RngCore};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};

/// The AES block size.
pub(crate) const BLOCK_LEN: usize = 16;

/// Runs `$body` with `$aes` bound to the AES variant that
/// matches the length of `$key`.
macro_rules! with_aes {
    ($key:expr, $aes:ident => $body:expr) => {
        match $key.len() {
            16 => {
                type $aes = Aes128;
                $body
            }
            24 => {
                type $aes = Aes192;
                $body
            }
            32 => {
                type $aes = Aes256;
                $body
            }
            _ => Err(SssError::InvalidArgument),
        }
    };
}

/// Binds `$t` to the CCM tag size `$len`.
macro_rules! ccm_tag {
    ($len:expr, $t:ident => $body:expr) => {
        match $len {
            4 => {
                type $t = U4;
                $body
            }
            6 => {
                type $t = U6;
                $body
            }
            8 => {
                type $t = U8;
                $body
            }
            10 => {
                type $t = U10;
                $body
            }
            12 => {
                type $t = U12;
                $body
            }
            14 => {
                type $t = U14;
                $body
            }
            16 => {
                type $t = U16;
                $body
            }
            _ => Err(SssError::InvalidArgument),
        }
    };
}

/// Binds `$n` to the CCM nonce size `$len`.
macro_rules! ccm_nonce {
    ($len:expr, $n:ident => $body:expr) => {
        match $len {
            7 => {
                type $n = U7;
                $body
            }
            8 => {
                type $n = U8;
                $body
            }
            9 => {
                type $n = U9;
                $body
            }
            10 => {
                type $n = U10;
                $body
            }
            11 => {
                type $n = U11;
                $body
            }
            12 => {
                type $n = U12;
                $body
            }
            13 => {
                type $n = U13;
                $body
            }
            _ => Err(SssError::InvalidArgument),
        }
    };
}

/// Constant time comparison.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Runs an unpadded AES cipher mode.
pub(crate) fn block_cipher(
    alg: Algorithm,
    mode: Mode,
    key: &[u8],
    iv: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> SssResult<()> {
    let output = output
        .get_mut(..input.len())
        .ok_or(SssError::InvalidArgument)?;
    let inv = |_| SssError::InvalidArgument;
    match (alg, mode) {
        (Algorithm::AesEcb, mode) => {
            if input.len() % BLOCK_LEN != 0 {
                return Err(SssError::InvalidArgument);
            }
            with_aes!(key, A => {
                let c = A::new_from_slice(key).map_err(inv)?;
                for (i, o) in input.chunks_exact(BLOCK_LEN).zip(output.chunks_exact_mut(BLOCK_LEN)) {
                    let (i, o) = (GenericArray::from_slice(i), GenericArray::from_mut_slice(o));
                    if mode == Mode::Encrypt {
                        c.encrypt_block_b2b(i, o);
                    } else {
                        c.decrypt_block_b2b(i, o);
                    }
                }
                Ok(())
            })
        }
        (Algorithm::AesCbc, Mode::Encrypt) => with_aes!(key, A => {
            cbc::Encryptor::<A>::new_from_slices(key, iv)
                .map_err(inv)?
                .encrypt_padded_b2b_mut::<NoPadding>(input, output)
                .map_err(|_| SssError::InvalidArgument)?;
            Ok(())
        }),
        (Algorithm::AesCbc, Mode::Decrypt) => with_aes!(key, A => {
            cbc::Decryptor::<A>::new_from_slices(key, iv)
                .map_err(inv)?
                .decrypt_padded_b2b_mut::<NoPadding>(input, output)
                .map_err(|_| SssError::InvalidArgument)?;
            Ok(())
        }),
        (Algorithm::AesCtr, Mode::Encrypt | Mode::Decrypt) => with_aes!(key, A => {
            ctr::Ctr128BE::<A>::new_from_slices(key, iv)
                .map_err(inv)?
                .apply_keystream_b2b(input, output)
                .map_err(|_| SssError::InvalidArgument)
        }),
        _ => Err(SssError::InvalidArgument),
    }
}

/// Seals `output` in place under CCM or GCM.
///
/// GCM tags shorter than 16 bytes are truncations of the full
/// tag.
fn seal(
    alg: Algorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &mut [u8],
) -> SssResult<()> {
    let inv = |_| SssError::InvalidArgument;
    match alg {
        Algorithm::AesGcm => {
            if nonce.len() != 12 || !(4..=16).contains(&tag.len()) {
                return Err(SssError::InvalidArgument);
            }
            with_aes!(key, A => {
                let full = AesGcm::<A, U12>::new_from_slice(key)
                    .map_err(inv)?
                    .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buf)
                    .map_err(|_| SssError::Fail)?;
                tag.copy_from_slice(&full[..tag.len()]);
                Ok(())
            })
        }
        Algorithm::AesCcm => with_aes!(key, A => ccm_tag!(tag.len(), T => ccm_nonce!(nonce.len(), N => {
            let full = Ccm::<A, T, N>::new_from_slice(key)
                .map_err(inv)?
                .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buf)
                .map_err(|_| SssError::Fail)?;
            tag.copy_from_slice(&full);
            Ok(())
        }))),
        _ => Err(SssError::InvalidArgument),
    }
}

/// Encrypts or decrypts with an AEAD.
///
/// On decryption failure `output` is zeroed.
pub(crate) fn aead(
    alg: Algorithm,
    mode: Mode,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    input: &[u8],
    output: &mut [u8],
    tag: &mut [u8],
) -> SssResult<()> {
    let buf = output
        .get_mut(..input.len())
        .ok_or(SssError::InvalidArgument)?;
    buf.copy_from_slice(input);
    match mode {
        Mode::Encrypt => seal(alg, key, nonce, aad, buf, tag),
        Mode::Decrypt => {
            let res = open(alg, key, nonce, aad, buf, tag);
            if res.is_err() {
                buf.fill(0);
            }
            res
        }
        _ => Err(SssError::InvalidArgument),
    }
}

fn open(
    alg: Algorithm,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8],
) -> SssResult<()> {
    let inv = |_| SssError::InvalidArgument;
    match alg {
        Algorithm::AesGcm => {
            // GCM is CTR underneath, so sealing the ciphertext
            // recovers the plaintext. Sealing that again yields
            // the real tag.
            let mut scratch = [0u8; 16];
            let expected = scratch
                .get_mut(..tag.len())
                .ok_or(SssError::InvalidArgument)?;
            seal(alg, key, nonce, aad, buf, expected)?;
            let mut again = buf.to_vec();
            seal(alg, key, nonce, aad, &mut again, expected)?;
            if ct_eq(expected, tag) {
                Ok(())
            } else {
                Err(SssError::Fail)
            }
        }
        Algorithm::AesCcm => with_aes!(key, A => ccm_tag!(tag.len(), T => ccm_nonce!(nonce.len(), N => {
            Ccm::<A, T, N>::new_from_slice(key)
                .map_err(inv)?
                .decrypt_in_place_detached(
                    GenericArray::from_slice(nonce),
                    aad,
                    buf,
                    GenericArray::from_slice(tag),
                )
                .map_err(|_| SssError::Fail)
        }))),
        _ => Err(SssError::InvalidArgument),
    }
}

/// A running MAC computation.
#[derive(Clone)]
pub(crate) enum MacState {
    HmacSha1(Hmac<Sha1>),
    HmacSha224(Hmac<Sha224>),
    HmacSha256(Hmac<Sha256>),
    HmacSha384(Hmac<Sha384>),
    HmacSha512(Hmac<Sha512>),
    Cmac128(Cmac<Aes128>),
    Cmac192(Cmac<Aes192>),
    Cmac256(Cmac<Aes256>),
}

macro_rules! each_mac {
    ($state:expr, $m:ident => $body:expr) => {
        match $state {
            MacState::HmacSha1($m) => $body,
            MacState::HmacSha224($m) => $body,
            MacState::HmacSha256($m) => $body,
            MacState::HmacSha384($m) => $body,
            MacState::HmacSha512($m) => $body,
            MacState::Cmac128($m) => $body,
            MacState::Cmac192($m) => $body,
            MacState::Cmac256($m) => $body,
        }
    };
}

impl MacState {
    pub(crate) fn new(alg: Algorithm, key: &[u8]) -> SssResult<Self> {
        let inv = |_| SssError::InvalidArgument;
        let state = match alg {
            Algorithm::HmacSha1 => Self::HmacSha1(Mac::new_from_slice(key).map_err(inv)?),
            Algorithm::HmacSha224 => Self::HmacSha224(Mac::new_from_slice(key).map_err(inv)?),
            Algorithm::HmacSha256 => Self::HmacSha256(Mac::new_from_slice(key).map_err(inv)?),
            Algorithm::HmacSha384 => Self::HmacSha384(Mac::new_from_slice(key).map_err(inv)?),
            Algorithm::HmacSha512 => Self::HmacSha512(Mac::new_from_slice(key).map_err(inv)?),
            Algorithm::CmacAes => match key.len() {
                16 => Self::Cmac128(Mac::new_from_slice(key).map_err(inv)?),
                24 => Self::Cmac192(Mac::new_from_slice(key).map_err(inv)?),
                32 => Self::Cmac256(Mac::new_from_slice(key).map_err(inv)?),
                _ => return Err(SssError::InvalidArgument),
            },
            _ => return Err(SssError::InvalidArgument),
        };
        Ok(state)
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        each_mac!(self, m => m.update(data))
    }

    pub(crate) fn finish(self, out: &mut [u8]) -> SssResult<usize> {
        each_mac!(self, m => {
            let tag = m.finalize().into_bytes();
            out.get_mut(..tag.len())
                .ok_or(SssError::InvalidArgument)?
                .copy_from_slice(&tag);
            Ok(tag.len())
        })
    }
}

/// A running digest.
#[derive(Clone)]
pub(crate) enum DigestState {
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Sha3_224(Sha3_224),
    Sha3_256(Sha3_256),
    Sha3_384(Sha3_384),
    Sha3_512(Sha3_512),
}

macro_rules! each_digest {
    ($state:expr, $d:ident => $body:expr) => {
        match $state {
            DigestState::Sha1($d) => $body,
            DigestState::Sha224($d) => $body,
            DigestState::Sha256($d) => $body,
            DigestState::Sha384($d) => $body,
            DigestState::Sha512($d) => $body,
            DigestState::Sha3_224($d) => $body,
            DigestState::Sha3_256($d) => $body,
            DigestState::Sha3_384($d) => $body,
            DigestState::Sha3_512($d) => $body,
        }
    };
}

impl DigestState {
    pub(crate) fn new(alg: Algorithm) -> SssResult<Self> {
        let state = match alg {
            Algorithm::Sha1 => Self::Sha1(Default::default()),
            Algorithm::Sha224 => Self::Sha224(Default::default()),
            Algorithm::Sha256 => Self::Sha256(Default::default()),
            Algorithm::Sha384 => Self::Sha384(Default::default()),
            Algorithm::Sha512 => Self::Sha512(Default::default()),
            Algorithm::Sha3_224 => Self::Sha3_224(Default::default()),
            Algorithm::Sha3_256 => Self::Sha3_256(Default::default()),
            Algorithm::Sha3_384 => Self::Sha3_384(Default::default()),
            Algorithm::Sha3_512 => Self::Sha3_512(Default::default()),
            _ => return Err(SssError::InvalidArgument),
        };
        Ok(state)
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        each_digest!(self, d => Digest::update(d, data))
    }

    pub(crate) fn finish(self, out: &mut [u8]) -> SssResult<usize> {
        each_digest!(self, d => {
            let digest = Digest::finalize(d);
            out.get_mut(..digest.len())
                .ok_or(SssError::InvalidArgument)?
                .copy_from_slice(&digest);
            Ok(digest.len())
        })
    }
}

/// Hashes `input` into `out`.
pub(crate) fn digest(alg: Algorithm, input: &[u8], out: &mut [u8]) -> SssResult<usize> {
    fn run<D: Digest>(input: &[u8], out: &mut [u8]) -> SssResult<usize> {
        let digest = D::digest(input);
        out.get_mut(..digest.len())
            .ok_or(SssError::InvalidArgument)?
            .copy_from_slice(&digest);
        Ok(digest.len())
    }
    match alg {
        Algorithm::Sha1 => run::<Sha1>(input, out),
        Algorithm::Sha224 => run::<Sha224>(input, out),
        Algorithm::Sha256 => run::<Sha256>(input, out),
        Algorithm::Sha384 => run::<Sha384>(input, out),
        Algorithm::Sha512 => run::<Sha512>(input, out),
        Algorithm::Sha3_224 => run::<Sha3_224>(input, out),
        Algorithm::Sha3_256 => run::<Sha3_256>(input, out),
        Algorithm::Sha3_384 => run::<Sha3_384>(input, out),
        Algorithm::Sha3_512 => run::<Sha3_512>(input, out),
        _ => Err(SssError::InvalidArgument),
    }
}

/// A curve the simulator implements.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Curve {
    P256,
    P384,
    X25519,
    Ed25519,
}

/// Runs `$body` with `$c` bound to the crate of a NIST curve.
macro_rules! nist {
    ($curve:expr, $c:ident => $body:expr) => {
        match $curve {
            Curve::P256 => {
                use ::p256 as $c;
                $body
            }
            Curve::P384 => {
                use ::p384 as $c;
                $body
            }
            Curve::X25519 | Curve::Ed25519 => Err(SssError::InvalidArgument),
        }
    };
}

fn sec1(public: &[u8]) -> Vec<u8> {
    let mut point = Vec::with_capacity(public.len().saturating_add(1));
    point.push(0x04);
    point.extend_from_slice(public);
    point
}

fn array32(data: &[u8]) -> SssResult<[u8; 32]> {
    data.try_into().map_err(|_| SssError::InvalidArgument)
}

impl Curve {
    /// Returns the curve of a `bits`-sized key of type
    /// `cipher`.
    pub(crate) fn of(cipher: CipherType, bits: usize) -> SssResult<Self> {
        match (cipher, bits) {
            (CipherType::EcNistP, 256) => Ok(Self::P256),
            (CipherType::EcNistP, 384) => Ok(Self::P384),
            (CipherType::EcMontgomery, 255 | 256) => Ok(Self::X25519),
            (CipherType::EcTwistedEd, 255 | 256) => Ok(Self::Ed25519),
            _ => Err(SssError::Fail),
        }
    }

    /// The size in bytes of a scalar or coordinate.
    pub(crate) const fn scalar_len(self) -> usize {
        match self {
            Self::P384 => 48,
            Self::P256 | Self::X25519 | Self::Ed25519 => 32,
        }
    }

    /// The size in bytes of a public key: both coordinates for
    /// NIST curves, the encoded point otherwise.
    pub(crate) const fn public_len(self) -> usize {
        match self {
            Self::P256 => 64,
            Self::P384 => 96,
            Self::X25519 | Self::Ed25519 => 32,
        }
    }

    pub(crate) fn generate<R: RngCore + CryptoRng>(self, rng: &mut R) -> SssResult<Vec<u8>> {
        match self {
            Self::X25519 | Self::Ed25519 => {
                let mut d = vec![0u8; 32];
                rng.fill_bytes(&mut d);
                Ok(d)
            }
            _ => nist!(self, c => Ok(c::SecretKey::random(rng).to_bytes().to_vec())),
        }
    }

    pub(crate) fn public_from_private(self, d: &[u8]) -> SssResult<Vec<u8>> {
        match self {
            Self::X25519 => {
                let sk = x25519_dalek::StaticSecret::from(array32(d)?);
                Ok(x25519_dalek::PublicKey::from(&sk).to_bytes().to_vec())
            }
            Self::Ed25519 => {
                let sk = ed25519_dalek::SigningKey::from_bytes(&array32(d)?);
                Ok(sk.verifying_key().to_bytes().to_vec())
            }
            _ => nist!(self, c => {
                let sk = c::SecretKey::from_slice(d).map_err(|_| SssError::InvalidArgument)?;
                let point = sk.public_key().to_encoded_point(false);
                Ok(point.as_bytes()[1..].to_vec())
            }),
        }
    }

    pub(crate) fn check_public(self, public: &[u8]) -> SssResult<()> {
        match self {
            Self::X25519 => array32(public).map(|_| ()),
            Self::Ed25519 => {
                ed25519_dalek::VerifyingKey::from_bytes(&array32(public)?)
                    .map_err(|_| SssError::InvalidArgument)?;
                Ok(())
            }
            _ => nist!(self, c => {
                c::PublicKey::from_sec1_bytes(&sec1(public))
                    .map_err(|_| SssError::InvalidArgument)?;
                Ok(())
            }),
        }
    }

    /// Signs `data`, a digest for ECDSA and the message itself
    /// for EdDSA.
    pub(crate) fn sign(self, d: &[u8], data: &[u8]) -> SssResult<Vec<u8>> {
        match self {
            Self::X25519 => Err(SssError::InvalidArgument),
            Self::Ed25519 => {
                let sk = ed25519_dalek::SigningKey::from_bytes(&array32(d)?);
                Ok(sk.sign(data).to_bytes().to_vec())
            }
            _ => nist!(self, c => {
                let sk = c::ecdsa::SigningKey::from_slice(d)
                    .map_err(|_| SssError::InvalidArgument)?;
                let sig: c::ecdsa::Signature =
                    sk.sign_prehash(data).map_err(|_| SssError::Fail)?;
                Ok(sig.to_bytes().to_vec())
            }),
        }
    }

    pub(crate) fn verify(self, public: &[u8], data: &[u8], sig: &[u8]) -> SssResult<()> {
        match self {
            Self::X25519 => Err(SssError::InvalidArgument),
            Self::Ed25519 => {
                let vk = ed25519_dalek::VerifyingKey::from_bytes(&array32(public)?)
                    .map_err(|_| SssError::InvalidArgument)?;
                let sig =
                    ed25519_dalek::Signature::from_slice(sig).map_err(|_| SssError::Fail)?;
                vk.verify(data, &sig).map_err(|_| SssError::Fail)
            }
            _ => nist!(self, c => {
                let vk = c::ecdsa::VerifyingKey::from_sec1_bytes(&sec1(public))
                    .map_err(|_| SssError::InvalidArgument)?;
                let sig = c::ecdsa::Signature::from_slice(sig).map_err(|_| SssError::Fail)?;
                vk.verify_prehash(data, &sig).map_err(|_| SssError::Fail)
            }),
        }
    }

    /// Computes the raw Diffie-Hellman shared secret.
    pub(crate) fn diffie_hellman(self, d: &[u8], peer: &[u8]) -> SssResult<Vec<u8>> {
        match self {
            Self::Ed25519 => Err(SssError::InvalidArgument),
            Self::X25519 => {
                let sk = x25519_dalek::StaticSecret::from(array32(d)?);
                let pk = x25519_dalek::PublicKey::from(array32(peer)?);
                Ok(sk.diffie_hellman(&pk).as_bytes().to_vec())
            }
            _ => nist!(self, c => {
                let sk = c::SecretKey::from_slice(d).map_err(|_| SssError::InvalidArgument)?;
                let pk = c::PublicKey::from_sec1_bytes(&sec1(peer))
                    .map_err(|_| SssError::InvalidArgument)?;
                let shared = c::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }),
        }
    }
}

/// Derives the end-to-end secret from a raw shared secret.
pub(crate) fn e2e_secret(raw: &[u8]) -> Vec<u8> {
    let mut h = Sha256::new();
    h.update(b"enclave e2e blob");
    h.update(raw);
    let mut out = h.finalize().to_vec();
    out.truncate(raw.len());
    out
}
