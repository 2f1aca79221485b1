//! Hashing.
//!
//! Like MACs, digests can be computed in one go with
//! [`Driver::hash_compute`] or in several steps with a
//! [`HashOperation`]. The running digest is exported after
//! every step and re-imported by the next one, so no enclave
//! context stays open between calls.

use enclave_sscp::{Algorithm as HwAlgorithm, Session};
use tracing::{debug, instrument};

use crate::{
    alg::{Algorithm, Hash},
    attributes::KeyType,
    compute,
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    translate::translate_algorithm,
};

/// The size of an exported digest context.
pub const HASH_CONTEXT_SIZE: usize = 256;

struct Active {
    alg: Hash,
    hw_alg: HwAlgorithm,
    ctx: [u8; HASH_CONTEXT_SIZE],
    ctx_len: usize,
}

/// The state of a multi-part hash computation.
///
/// An operation starts out idle, becomes active with
/// [`Driver::hash_setup`] or [`Driver::hash_clone`] and returns
/// to idle after [`Driver::hash_finish`] or
/// [`Driver::hash_abort`]. It holds no enclave resources, so
/// dropping an active operation is harmless.
#[derive(Default)]
pub struct HashOperation {
    active: Option<Active>,
}

impl HashOperation {
    /// Creates an idle operation.
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Reports whether the operation is active.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The hash of an active operation.
    pub fn alg(&self) -> Option<Hash> {
        self.active.as_ref().map(|a| a.alg)
    }
}

impl<S: Session, L: LockHook> Driver<S, L> {
    fn translate_hash(&self, alg: Hash) -> Result<HwAlgorithm> {
        translate_algorithm(&self.caps, Algorithm::Hash(alg), KeyType::None)
    }

    /// Hashes `input` inside the enclave.
    ///
    /// Returns the number of bytes written to `hash`.
    #[instrument(skip_all, fields(alg = ?alg))]
    pub fn hash_compute(&self, alg: Hash, input: &[u8], hash: &mut [u8]) -> Result<usize> {
        let hw_alg = self.translate_hash(alg)?;
        let out = hash
            .get_mut(..alg.digest_len())
            .ok_or(Error::BufferTooSmall)?;
        self.with_hw(|hw| compute::digest(hw.session(), hw_alg, input, out).or_generic())
    }

    /// Starts hashing with `alg`.
    #[instrument(skip_all, fields(alg = ?alg))]
    pub fn hash_setup(&self, op: &mut HashOperation, alg: Hash) -> Result<()> {
        if op.is_active() {
            return Err(Error::BadState);
        }
        let hw_alg = self.translate_hash(alg)?;
        let mut ctx = [0u8; HASH_CONTEXT_SIZE];
        let ctx_len =
            self.with_hw(|hw| compute::digest_start(hw.session(), hw_alg, &mut ctx).or_generic())?;
        op.active = Some(Active {
            alg,
            hw_alg,
            ctx,
            ctx_len,
        });
        Ok(())
    }

    /// Feeds `input` into an active operation.
    ///
    /// On failure the operation must be aborted.
    #[instrument(skip_all)]
    pub fn hash_update(&self, op: &mut HashOperation, input: &[u8]) -> Result<()> {
        let active = op.active.as_mut().ok_or(Error::BadState)?;
        if input.is_empty() {
            return Ok(());
        }
        let n = self.with_hw(|hw| {
            compute::digest_resume(
                hw.session(),
                active.hw_alg,
                &mut active.ctx,
                active.ctx_len,
                input,
            )
            .or_generic()
        })?;
        active.ctx_len = n;
        Ok(())
    }

    /// Finishes hashing.
    ///
    /// Returns the number of bytes written to `hash`. The
    /// operation is idle afterwards, unless `hash` is too small
    /// or the lock could not be taken.
    #[instrument(skip_all)]
    pub fn hash_finish(&self, op: &mut HashOperation, hash: &mut [u8]) -> Result<usize> {
        let active = op.active.as_ref().ok_or(Error::BadState)?;
        let out = hash
            .get_mut(..active.alg.digest_len())
            .ok_or(Error::BufferTooSmall)?;
        let mut ran = false;
        let res = self.with_hw(|hw| {
            ran = true;
            let ctx = &active.ctx[..active.ctx_len];
            compute::digest_finish(hw.session(), active.hw_alg, ctx, out).or_generic()
        });
        if ran {
            op.active = None;
        }
        let n = res?;
        if n != out.len() {
            return Err(Error::GenericError);
        }
        Ok(n)
    }

    /// Copies the state of `source` into the idle operation
    /// `target`.
    ///
    /// Snapshots can only be restored once, so `source` is
    /// re-exported as well. If this fails, `source` must be
    /// aborted.
    #[instrument(skip_all)]
    pub fn hash_clone(&self, source: &mut HashOperation, target: &mut HashOperation) -> Result<()> {
        if target.is_active() {
            return Err(Error::BadState);
        }
        let active = source.active.as_mut().ok_or(Error::BadState)?;
        let mut ctx = [0u8; HASH_CONTEXT_SIZE];
        let (n, m) = self
            .with_hw(|hw| {
                compute::digest_fork(
                    hw.session(),
                    active.hw_alg,
                    &mut active.ctx,
                    active.ctx_len,
                    &mut ctx,
                )
                .or_generic()
            })
            .inspect_err(|err| debug!(%err, "unable to clone digest"))?;
        active.ctx_len = n;
        target.active = Some(Active {
            alg: active.alg,
            hw_alg: active.hw_alg,
            ctx,
            ctx_len: m,
        });
        Ok(())
    }

    /// Aborts an operation.
    ///
    /// Aborting an idle operation does nothing.
    #[instrument(skip_all)]
    pub fn hash_abort(&self, op: &mut HashOperation) -> Result<()> {
        op.active = None;
        Ok(())
    }
}

