//! A software enclave.
//!
//! [`SoftEnclave`] implements [`enclave_sscp::Session`] with
//! RustCrypto primitives. It stands in for the hardware in tests
//! and benchmarks: it counts the calls it receives and can be
//! told to fail specific calls.
//!
//! It supports P-256, P-384, X25519 and Ed25519 keys. Other
//! curves are rejected when a key object is bound to them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod enclave;
mod keystore;
mod wrap;

pub use enclave::{MAX_OBJECTS, Op, SoftEnclave, Stats};
