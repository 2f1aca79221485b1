//! Message authentication codes.
//!
//! Besides the one-shot [`Driver::mac_compute`], MACs can be
//! computed in several steps with a [`MacOperation`]. The
//! enclave cannot keep a MAC context open across calls, so
//! after every step the context is exported into a fixed-size
//! blob held by the operation and re-imported by the next step.
//! The hardware lock is released between steps.

use enclave_sscp::{Algorithm as HwAlgorithm, KeyPart, KeyProperties, ObjectId, Session};
use tracing::{debug, instrument, warn};

use crate::{
    alg::{Algorithm, MAX_HASH_LEN},
    attributes::{KeyAttributes, KeyLocation, KeyType},
    cipher::check_symmetric_key,
    compute,
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    keys::{HwScope, KeyObject, ObjectSpec},
    translate::{symmetric_cipher_type, translate_algorithm},
    util::ct_memcmp,
};

/// The size of an exported MAC context.
pub const MAC_CONTEXT_SIZE: usize = 384;

/// The largest MAC of any supported algorithm.
const MAX_MAC_LEN: usize = MAX_HASH_LEN;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Role {
    Sign,
    Verify,
}

/// A multi-part MAC stream.
struct Active {
    /// Owned by the stream until it finishes or is aborted.
    key: ObjectId,
    alg: HwAlgorithm,
    mac_len: usize,
    role: Role,
    ctx: [u8; MAC_CONTEXT_SIZE],
    ctx_len: usize,
}

/// The state of a multi-part MAC computation.
///
/// An operation starts out idle. It becomes active with
/// [`Driver::mac_sign_setup`] or [`Driver::mac_verify_setup`]
/// and returns to idle after [`Driver::mac_sign_finish`],
/// [`Driver::mac_verify_finish`] or [`Driver::mac_abort`].
///
/// An active operation holds a key object inside the enclave.
/// It must be finished or aborted; dropping it leaks the key
/// object until the session is closed.
#[derive(Default)]
pub struct MacOperation {
    active: Option<Active>,
}

impl MacOperation {
    /// Creates an idle operation.
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Reports whether the operation is active.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for MacOperation {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            warn!(key = %active.key, "active MAC operation dropped");
        }
    }
}

/// Validated parameters of a MAC request.
struct MacParams {
    alg: HwAlgorithm,
    mac_len: usize,
}

impl<S: Session, L: LockHook> Driver<S, L> {
    fn check_mac(&self, attrs: &KeyAttributes, key: &[u8], alg: Algorithm) -> Result<MacParams> {
        let Algorithm::Mac { mac, .. } = alg else {
            return Err(Error::InvalidArgument("not a MAC"));
        };
        let hw_alg = translate_algorithm(&self.caps, alg, attrs.key_type)?;
        // HMAC keys may be empty.
        if attrs.key_type != KeyType::Hmac || !key.is_empty() || attrs.bits != 0 {
            check_symmetric_key(attrs, key)?;
        }
        let mac_len = alg
            .mac_len()
            .ok_or(Error::InvalidArgument("not a MAC"))?;
        if mac_len == 0 || mac_len > mac.full_len() {
            return Err(Error::InvalidArgument("MAC length"));
        }
        Ok(MacParams {
            alg: hw_alg,
            mac_len,
        })
    }

    /// Binds a MAC key to a fresh key object.
    fn mac_key(
        &self,
        hw: &mut HwScope<'_, S>,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
    ) -> Result<KeyObject> {
        let attrs = attrs.with_alg(alg);
        if attrs.location != KeyLocation::Local {
            return hw.import_key(&self.caps, &attrs, key);
        }
        let spec = ObjectSpec {
            key_id: attrs.id,
            part: KeyPart::Default,
            cipher: symmetric_cipher_type(attrs.key_type)?,
            props: KeyProperties::CRYPTO_MAC,
            // The enclave cannot allocate an empty key.
            size: key.len().max(1),
        };
        if key.is_empty() {
            hw.create_object(spec)
        } else {
            hw.set_key(spec, key, attrs.bits)
        }
    }

    /// Computes the MAC of `input`.
    ///
    /// Returns the number of bytes written to `mac`.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn mac_compute(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        input: &[u8],
        mac: &mut [u8],
    ) -> Result<usize> {
        let params = self.check_mac(attrs, key, alg)?;
        let out = mac.get_mut(..params.mac_len).ok_or(Error::BufferTooSmall)?;

        let mut full = [0u8; MAX_MAC_LEN];
        self.with_hw(|hw| {
            let obj = self.mac_key(hw, attrs, key, alg)?;
            let n = compute::mac(hw, &obj, params.alg, input, &mut full).or_generic()?;
            if n < params.mac_len {
                return Err(Error::GenericError);
            }
            Ok(())
        })
        .inspect_err(|err| debug!(%err, "MAC failed"))?;
        out.copy_from_slice(&full[..params.mac_len]);
        Ok(params.mac_len)
    }

    fn mac_setup(
        &self,
        op: &mut MacOperation,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        role: Role,
    ) -> Result<()> {
        if !self.caps.mac_multipart {
            return Err(Error::NotSupported("multi-part MAC"));
        }
        if op.is_active() {
            return Err(Error::BadState);
        }
        let params = self.check_mac(attrs, key, alg)?;

        let mut ctx = [0u8; MAC_CONTEXT_SIZE];
        let mut started = None;
        let res = self.with_hw(|hw| {
            let obj = self.mac_key(hw, attrs, key, alg)?;
            let n = compute::mac_start(hw, &obj, params.alg, &mut ctx).or_generic()?;
            // The stream owns the key object from now on.
            started = Some((hw.detach(obj)?, n));
            Ok(())
        });
        // Even if releasing the lock failed, the key object now
        // exists and only an abort can destroy it.
        if let Some((key, ctx_len)) = started {
            op.active = Some(Active {
                key,
                alg: params.alg,
                mac_len: params.mac_len,
                role,
                ctx,
                ctx_len,
            });
        }
        res
    }

    /// Starts computing a MAC.
    ///
    /// If this fails with [`Error::ServiceFailure`] the
    /// operation may already be active and must be aborted.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn mac_sign_setup(
        &self,
        op: &mut MacOperation,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
    ) -> Result<()> {
        self.mac_setup(op, attrs, key, alg, Role::Sign)
    }

    /// Starts verifying a MAC.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn mac_verify_setup(
        &self,
        op: &mut MacOperation,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
    ) -> Result<()> {
        self.mac_setup(op, attrs, key, alg, Role::Verify)
    }

    /// Feeds `input` into an active operation.
    ///
    /// On failure the operation stays active and must be
    /// aborted.
    #[instrument(skip_all)]
    pub fn mac_update(&self, op: &mut MacOperation, input: &[u8]) -> Result<()> {
        if !self.caps.mac_multipart {
            return Err(Error::NotSupported("multi-part MAC"));
        }
        let active = op.active.as_mut().ok_or(Error::BadState)?;
        if input.is_empty() {
            return Ok(());
        }
        let n = self.with_hw(|hw| {
            let obj = KeyObject::borrowed(active.key);
            compute::mac_resume(hw, &obj, active.alg, &mut active.ctx, active.ctx_len, input)
                .or_generic()
        })?;
        active.ctx_len = n;
        Ok(())
    }

    /// Finishes the stream, destroying its key object, and
    /// returns the MAC computed so far.
    ///
    /// The operation only goes idle once the key object has been
    /// handed to the hardware scope. If the lock cannot be
    /// taken it stays active.
    fn mac_finish(&self, op: &mut MacOperation, role: Role, full: &mut [u8]) -> Result<usize> {
        let Some(active) = op.active.as_ref().filter(|a| a.role == role) else {
            return Err(Error::BadState);
        };
        let mut adopted = false;
        let res = self.with_hw(|hw| {
            let obj = hw.adopt(active.key)?;
            adopted = true;
            let ctx = &active.ctx[..active.ctx_len];
            let n = compute::mac_finish(hw, &obj, active.alg, ctx, full).or_generic()?;
            if n < active.mac_len {
                return Err(Error::GenericError);
            }
            Ok(active.mac_len)
        });
        if adopted {
            op.active = None;
        }
        res
    }

    /// Finishes computing a MAC.
    ///
    /// Returns the number of bytes written to `mac`. The
    /// operation is idle afterwards, unless `mac` is too small.
    #[instrument(skip_all)]
    pub fn mac_sign_finish(&self, op: &mut MacOperation, mac: &mut [u8]) -> Result<usize> {
        if !self.caps.mac_multipart {
            return Err(Error::NotSupported("multi-part MAC"));
        }
        match &op.active {
            Some(active) if active.role == Role::Sign => {
                if mac.len() < active.mac_len {
                    return Err(Error::BufferTooSmall);
                }
            }
            _ => return Err(Error::BadState),
        }
        let mut full = [0u8; MAX_MAC_LEN];
        let n = self.mac_finish(op, Role::Sign, &mut full)?;
        mac[..n].copy_from_slice(&full[..n]);
        Ok(n)
    }

    /// Finishes verifying a MAC.
    ///
    /// The MAC is compared in constant time. A mismatch is
    /// reported as [`Error::InvalidSignature`]. The operation is
    /// idle afterwards.
    #[instrument(skip_all)]
    pub fn mac_verify_finish(&self, op: &mut MacOperation, mac: &[u8]) -> Result<()> {
        if !self.caps.mac_multipart {
            return Err(Error::NotSupported("multi-part MAC"));
        }
        let mut full = [0u8; MAX_MAC_LEN];
        let n = self.mac_finish(op, Role::Verify, &mut full)?;
        if mac.len() != n || ct_memcmp(&full[..n], mac) != 0 {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }

    /// Aborts an operation, destroying its key object.
    ///
    /// Aborting an idle operation does nothing. If the lock
    /// cannot be taken the operation stays active and the abort
    /// can be retried.
    #[instrument(skip_all)]
    pub fn mac_abort(&self, op: &mut MacOperation) -> Result<()> {
        if !self.caps.mac_multipart {
            return Err(Error::NotSupported("multi-part MAC"));
        }
        let Some(active) = &op.active else {
            return Ok(());
        };
        let mut adopted = false;
        let res = self.with_hw(|hw| {
            let obj = hw.adopt(active.key)?;
            adopted = true;
            // Cleanup failures are not the caller's problem.
            let _ = hw.delete_key(obj);
            Ok(())
        });
        if adopted {
            op.active = None;
        }
        res
    }
}
