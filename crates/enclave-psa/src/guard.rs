//! The hardware lock.

use tracing::error;

use crate::error::{Error, Result};

/// An error returned by a [`LockHook`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("platform lock failure")]
pub struct LockError;

/// A platform lock that must be held while the enclave is in
/// use.
///
/// The enclave is frequently shared with other subsystems (for
/// example, a random number generator service), so the platform
/// usually provides its own mutex for it. Unlike the driver's
/// internal lock, the platform's mutex can fail.
///
/// The unit type is a hook that always succeeds.
pub trait LockHook: Send + Sync {
    /// Acquires the platform lock.
    fn lock(&self) -> Result<(), LockError>;
    /// Releases the platform lock.
    fn unlock(&self) -> Result<(), LockError>;
}

impl LockHook for () {
    fn lock(&self) -> Result<(), LockError> {
        Ok(())
    }

    fn unlock(&self) -> Result<(), LockError> {
        Ok(())
    }
}

impl<L: LockHook + ?Sized> LockHook for &L {
    fn lock(&self) -> Result<(), LockError> {
        (**self).lock()
    }

    fn unlock(&self) -> Result<(), LockError> {
        (**self).unlock()
    }
}

/// Releases the platform lock when dropped.
#[clippy::has_significant_drop]
#[must_use]
struct Locked<'a, L: LockHook> {
    hook: &'a L,
    armed: bool,
}

impl<'a, L: LockHook> Locked<'a, L> {
    fn acquire(hook: &'a L) -> Result<Self> {
        hook.lock().map_err(|err| {
            error!(target: "enclave_psa::guard", %err, "unable to acquire hardware lock");
            Error::ServiceFailure
        })?;
        Ok(Self { hook, armed: true })
    }

    fn release(mut self) -> Result<()> {
        self.armed = false;
        self.hook.unlock().map_err(|err| {
            error!(target: "enclave_psa::guard", %err, "unable to release hardware lock");
            Error::ServiceFailure
        })
    }
}

impl<L: LockHook> Drop for Locked<'_, L> {
    fn drop(&mut self) {
        // Only reached when unwinding out of the critical
        // section.
        if self.armed && self.hook.unlock().is_err() {
            error!(target: "enclave_psa::guard", "unable to release hardware lock");
        }
    }
}

/// Serializes every use of the enclave session.
pub(crate) struct HwMutex<S, L> {
    session: spin::Mutex<S>,
    hook: L,
}

impl<S, L: LockHook> HwMutex<S, L> {
    pub fn new(session: S, hook: L) -> Self {
        Self {
            session: spin::Mutex::new(session),
            hook,
        }
    }

    /// Runs `f` with exclusive access to the session.
    ///
    /// A failure to release the lock takes precedence over
    /// whatever `f` returned.
    pub fn run<T>(&self, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        let locked = Locked::acquire(&self.hook)?;
        let res = {
            let mut session = self.session.lock();
            f(&mut session)
        };
        locked.release()?;
        res
    }

    pub fn hook(&self) -> &L {
        &self.hook
    }

    pub fn into_inner(self) -> S {
        self.session.into_inner()
    }
}
