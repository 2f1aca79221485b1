//! Entropy.

use enclave_sscp::Session;
use tracing::instrument;

use crate::{
    compute,
    driver::Driver,
    error::{Error, Result},
    guard::LockHook,
};

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Fills `out` with random bytes from the enclave's RNG.
    ///
    /// Returns the estimated entropy of `out` in bits.
    #[instrument(skip_all, fields(len = out.len()))]
    pub fn get_entropy(&self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Err(Error::InvalidArgument("empty output"));
        }
        self.with_hw(|hw| {
            compute::random(hw.session(), out).map_err(|_| Error::HardwareFailure)
        })?;
        Ok(out.len().saturating_mul(8))
    }
}
