//! Utilities for testing the driver against a [`SoftEnclave`].

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::panic)]

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub use enclave_sim::{MAX_OBJECTS, Op, SoftEnclave, Stats};

use crate::{
    attributes::{KeyAttributes, KeyLocation, KeyType},
    caps::DriverConfig,
    driver::Driver,
    guard::{LockError, LockHook},
    keygen::stored_bits,
    keys::layout,
    util::UNCOMPRESSED_POINT,
};

/// A driver backed by a [`SoftEnclave`].
pub type SimDriver<L = ()> = Driver<SoftEnclave, L>;

/// Creates a driver over a fresh [`SoftEnclave`] with the
/// default configuration.
pub fn sim_driver() -> SimDriver {
    Driver::new(SoftEnclave::new())
}

/// Creates a driver over a fresh [`SoftEnclave`].
pub fn sim_driver_with(config: DriverConfig) -> SimDriver {
    Driver::with_config(SoftEnclave::new(), config)
}

/// A [`LockHook`] that counts how often it is used and can be
/// told to fail.
#[derive(Debug, Default)]
pub struct CountingHook {
    locks: AtomicUsize,
    unlocks: AtomicUsize,
    fail_lock: AtomicBool,
    fail_unlock: AtomicBool,
}

impl CountingHook {
    /// Creates a hook that always succeeds.
    pub const fn new() -> Self {
        Self {
            locks: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
            fail_lock: AtomicBool::new(false),
            fail_unlock: AtomicBool::new(false),
        }
    }

    /// The number of successful acquisitions.
    pub fn locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    /// The number of successful releases.
    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    /// Makes acquisitions fail.
    pub fn set_fail_lock(&self, fail: bool) {
        self.fail_lock.store(fail, Ordering::SeqCst);
    }

    /// Makes releases fail.
    pub fn set_fail_unlock(&self, fail: bool) {
        self.fail_unlock.store(fail, Ordering::SeqCst);
    }
}

impl LockHook for CountingHook {
    fn lock(&self) -> Result<(), LockError> {
        if self.fail_lock.load(Ordering::SeqCst) {
            return Err(LockError);
        }
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlock(&self) -> Result<(), LockError> {
        if self.fail_unlock.load(Ordering::SeqCst) {
            return Err(LockError);
        }
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps `key` into a gateway blob for the key described by
/// `attrs`, as the provisioning gateway would.
///
/// `key` is in the format of a transparent key: the private key
/// for key pairs, an uncompressed point for short Weierstrass
/// public keys.
pub fn provision_key<L: LockHook>(
    driver: &SimDriver<L>,
    attrs: &KeyAttributes,
    key: &[u8],
) -> Vec<u8> {
    let attrs = attrs.with_location(KeyLocation::Gateway);
    let (part, cipher) = layout(&driver.caps, &attrs).expect("key type should be supported");
    let data = match attrs.key_type {
        KeyType::EccPublicKey(family) if family.is_weierstrass() => key
            .strip_prefix(&[UNCOMPRESSED_POINT])
            .expect("public key should be uncompressed"),
        _ => key,
    };
    driver
        .with_session(|se| se.provision_key(cipher, part, stored_bits(&attrs), data))
        .expect("lock should not fail")
        .expect("enclave should wrap key")
}

/// Wraps `data` into a gateway data blob.
pub fn provision_data<L: LockHook>(driver: &SimDriver<L>, data: &[u8]) -> Vec<u8> {
    driver
        .with_session(|se| se.provision_data(data))
        .expect("lock should not fail")
        .expect("enclave should wrap data")
}

/// Returns the enclave's counters.
pub fn stats<L: LockHook>(driver: &SimDriver<L>) -> Stats {
    driver
        .with_session(|se| se.stats())
        .expect("lock should not fail")
}

/// Asserts that every key object and context the enclave has
/// handed out has been freed.
#[track_caller]
pub fn assert_no_leaks<L: LockHook>(driver: &SimDriver<L>) {
    let (stats, objects, contexts) = driver
        .with_session(|se| (se.stats(), se.live_objects(), se.live_contexts()))
        .expect("lock should not fail");
    assert_eq!(objects, 0, "leaked key objects: {stats:?}");
    assert_eq!(contexts, 0, "leaked contexts: {stats:?}");
    assert_eq!(stats.objects_created, stats.objects_freed, "{stats:?}");
    assert_eq!(stats.contexts_opened, stats.contexts_freed, "{stats:?}");
}
