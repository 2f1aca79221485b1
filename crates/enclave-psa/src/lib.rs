//! A PSA-style cryptographic driver backed by a secure enclave.
//!
//! # Overview
//!
//! The enclave is a co-processor with its own keystore,
//! algorithm set and session protocol. This crate makes it look
//! like an ordinary cryptographic backend: callers pass key
//! attributes, a key buffer and an algorithm, and get back a
//! result with one status code per call.
//!
//! Key buffers hold either plaintext key material
//! ([`KeyLocation::Local`], "transparent" keys) or material that
//! only the enclave can read ("opaque" keys): wrapped blobs
//! provisioned through the gateway, blobs generated on the
//! device under its die-unique key, or data passed through the
//! enclave's data tunnel.
//!
//! # Design
//!
//! Every entry point of [`Driver`] follows the same shape:
//!
//! 1. Translate and validate the request. Nothing here touches
//!    the enclave, so an unsupported or malformed request never
//!    reaches the hardware.
//! 2. Take the hardware lock.
//! 3. Bind the caller's key to transient key objects.
//! 4. Run the operation.
//! 5. Destroy the key objects and release the lock, on every
//!    path.
//!
//! The driver keeps no keys between calls. The only state that
//! survives a call is a [`MacOperation`] or a [`HashOperation`].
//!
//! Failures that could tell an attacker why authentication
//! failed are reported as [`Error::InvalidSignature`], whatever
//! the enclave said.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod aead;
pub mod alg;
pub mod attributes;
mod caps;
mod cipher;
mod compute;
mod driver;
mod error;
mod guard;
mod hash;
mod keygen;
mod keys;
mod mac;
mod misc;
mod opaque;
mod sign;
#[cfg(feature = "test_util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test_util")))]
pub mod test_util;
pub mod translate;
mod util;

pub use alg::{AeadAlg, Algorithm, CipherAlg, Hash, KeyAgreementAlg, MacAlg, SignAlg};
pub use attributes::{EccFamily, KeyAttributes, KeyLocation, KeyType, KeyUsage};
pub use caps::{Capabilities, DriverConfig};
pub use driver::Driver;
pub use enclave_sscp;
pub use error::{Error, Result, status_code, translate_status};
pub use guard::{LockError, LockHook};
pub use hash::{HASH_CONTEXT_SIZE, HashOperation};
pub use mac::{MAC_CONTEXT_SIZE, MacOperation};
pub use util::{
    UNCOMPRESSED_POINT, bits_to_bytes, ct_memcmp, ecc_keypair_size, ecc_public_key_export_size,
};
