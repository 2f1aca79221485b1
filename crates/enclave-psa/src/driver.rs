use enclave_sscp::Session;

use crate::{
    caps::{Capabilities, DriverConfig},
    error::Result,
    guard::{HwMutex, LockHook},
    keys::HwScope,
};

/// A cryptographic driver backed by an enclave.
///
/// The driver owns an open [`Session`] and serializes every use
/// of it. Each entry point validates its arguments before it
/// takes the hardware lock, binds the caller's key to transient
/// key objects, runs the operation and destroys the key objects
/// before releasing the lock.
///
/// Keys are never cached: every call carries the key's
/// attributes and key buffer.
pub struct Driver<S, L = ()> {
    hw: HwMutex<S, L>,
    pub(crate) caps: Capabilities,
}

impl<S: Session> Driver<S> {
    /// Creates a driver with the default capability profile.
    pub fn new(session: S) -> Self {
        Self::with_config(session, DriverConfig::default())
    }

    /// Creates a driver from `config`.
    pub fn with_config(session: S, config: DriverConfig) -> Self {
        Self::with_lock_hook(session, config, ())
    }
}

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Creates a driver that also holds the platform lock `hook`
    /// while it uses the enclave.
    pub fn with_lock_hook(session: S, config: DriverConfig, hook: L) -> Self {
        Self {
            hw: HwMutex::new(session, hook),
            caps: config.capabilities,
        }
    }

    /// Returns the capability profile.
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Returns the platform lock hook.
    pub fn lock_hook(&self) -> &L {
        self.hw.hook()
    }

    /// Runs `f` with exclusive access to the session.
    ///
    /// This bypasses the driver entirely and is meant for
    /// inspecting the session, e.g. in tests.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut S) -> T) -> Result<T> {
        self.hw.run(|session| Ok(f(session)))
    }

    /// Returns the session so its owner can close it.
    pub fn into_session(self) -> S {
        self.hw.into_inner()
    }

    /// Runs `f` under the hardware lock.
    ///
    /// Key objects created through the scope are deleted before
    /// the lock is released.
    pub(crate) fn with_hw<T>(&self, f: impl FnOnce(&mut HwScope<'_, S>) -> Result<T>) -> Result<T> {
        self.hw.run(|session| {
            let mut hw = HwScope::new(session);
            f(&mut hw)
        })
    }
}
