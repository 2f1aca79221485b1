//! The session-layer contract for a secure enclave.
//!
//! # Overview
//!
//! The enclave is a side co-processor with its own keystore and
//! its own algorithm set. The host never touches key material
//! inside the enclave directly. Instead, it drives the enclave
//! through a narrow command API: it creates *key objects*
//! (handles to key material resident in the enclave's
//! keystore), opens *contexts* bound to those objects, runs
//! one-shot operations on the contexts, then frees everything.
//!
//! This crate describes that command API as the [`Session`]
//! trait, along with the hardware identifiers it speaks in
//! ([`Algorithm`], [`Mode`], [`KeyPart`], [`CipherType`],
//! [`KeyProperties`], ...) and the layout of the wrapped key
//! blobs the enclave produces ([`blob`]).
//!
//! It contains no cryptography and performs no I/O. Drivers
//! consume a [`Session`]; enclaves (or test doubles) implement
//! it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
mod error;
mod session;
mod types;

pub use error::*;
pub use session::*;
pub use types::*;
