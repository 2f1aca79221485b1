//! One-shot primitives over bound key objects.
//!
//! Every function here opens a context, runs one operation and
//! frees the context. Errors are reported as enclave statuses so
//! callers can apply the error kind their operation requires.

use enclave_sscp::{Algorithm, ContextId, Mode, Session, SssError, SssResult};
use tracing::error;

use crate::keys::{HwScope, KeyObject};

/// Runs `f` inside `ctx`, always freeing `ctx` afterwards.
///
/// A failure to free the context is only reported if `f`
/// succeeded.
fn in_context<S: Session, T>(
    session: &mut S,
    ctx: ContextId,
    f: impl FnOnce(&mut S) -> SssResult<T>,
) -> SssResult<T> {
    let res = f(session);
    let freed = session.context_free(ctx);
    match (res, freed) {
        (Ok(v), Ok(())) => Ok(v),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), freed) => {
            if freed.is_err() {
                error!(target: "enclave_psa::compute", %ctx, "unable to free context");
            }
            Err(err)
        }
    }
}

/// Encrypts or decrypts `input` into `output`.
pub(crate) fn cipher<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    mode: Mode,
    iv: &[u8],
    input: &[u8],
    output: &mut [u8],
) -> SssResult<()> {
    let session = hw.session();
    let ctx = session.symmetric_context_init(key.id(), alg, mode)?;
    in_context(session, ctx, |s| s.cipher_one_go(ctx, iv, input, output))
}

/// The inputs of an AEAD operation.
pub(crate) struct AeadArgs<'a> {
    pub nonce: &'a [u8],
    pub aad: &'a [u8],
    pub input: &'a [u8],
}

/// Seals or opens `args.input` into `output`.
pub(crate) fn aead<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    mode: Mode,
    args: AeadArgs<'_>,
    output: &mut [u8],
    tag: &mut [u8],
) -> SssResult<()> {
    let session = hw.session();
    let ctx = session.aead_context_init(key.id(), alg, mode)?;
    in_context(session, ctx, |s| {
        s.aead_one_go(ctx, args.input, output, args.nonce, args.aad, tag)
    })
}

/// Computes a MAC over `input`.
pub(crate) fn mac<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    input: &[u8],
    out: &mut [u8],
) -> SssResult<usize> {
    let session = hw.session();
    let ctx = session.mac_context_init(key.id(), alg, Mode::Mac)?;
    in_context(session, ctx, |s| s.mac_one_go(ctx, input, out))
}

/// Starts a multi-part MAC and snapshots it into `state`.
pub(crate) fn mac_start<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    state: &mut [u8],
) -> SssResult<usize> {
    let session = hw.session();
    let ctx = session.mac_context_init(key.id(), alg, Mode::Mac)?;
    in_context(session, ctx, |s| {
        s.mac_init(ctx)?;
        s.mac_export_context(ctx, state)
    })
}

/// Restores a multi-part MAC from `state`, feeds it `input` and
/// snapshots it again.
pub(crate) fn mac_resume<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    state: &mut [u8],
    state_len: usize,
    input: &[u8],
) -> SssResult<usize> {
    let session = hw.session();
    let ctx = session.mac_context_init(key.id(), alg, Mode::Mac)?;
    in_context(session, ctx, |s| {
        let saved = state.get(..state_len).ok_or(SssError::InvalidArgument)?;
        s.mac_import_context(ctx, saved)?;
        s.mac_update(ctx, input)?;
        s.mac_export_context(ctx, state)
    })
}

/// Restores a multi-part MAC from `state` and finishes it.
pub(crate) fn mac_finish<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    state: &[u8],
    out: &mut [u8],
) -> SssResult<usize> {
    let session = hw.session();
    let ctx = session.mac_context_init(key.id(), alg, Mode::Mac)?;
    in_context(session, ctx, |s| {
        s.mac_import_context(ctx, state)?;
        s.mac_finish(ctx, out)
    })
}

/// Signs `digest`.
pub(crate) fn sign_digest<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    digest: &[u8],
    sig: &mut [u8],
) -> SssResult<usize> {
    let session = hw.session();
    let ctx = session.asymmetric_context_init(key.id(), alg, Mode::Sign)?;
    in_context(session, ctx, |s| s.asymmetric_sign_digest(ctx, digest, sig))
}

/// Verifies `sig` over `digest`.
pub(crate) fn verify_digest<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    digest: &[u8],
    sig: &[u8],
) -> SssResult<()> {
    let session = hw.session();
    let ctx = session.asymmetric_context_init(key.id(), alg, Mode::Verify)?;
    in_context(session, ctx, |s| s.asymmetric_verify_digest(ctx, digest, sig))
}

/// Derives a shared secret from `key` and `peer` into
/// `derived`.
pub(crate) fn derive_dh<S: Session>(
    hw: &mut HwScope<'_, S>,
    key: &KeyObject,
    alg: Algorithm,
    peer: &KeyObject,
    derived: &KeyObject,
) -> SssResult<()> {
    let session = hw.session();
    let ctx = session.derive_key_context_init(key.id(), alg, Mode::ComputeSharedSecret)?;
    in_context(session, ctx, |s| s.derive_key_dh(ctx, peer.id(), derived.id()))
}

/// Hashes `input`.
pub(crate) fn digest<S: Session>(
    session: &mut S,
    alg: Algorithm,
    input: &[u8],
    out: &mut [u8],
) -> SssResult<usize> {
    let ctx = session.digest_context_init(alg, Mode::Digest)?;
    in_context(session, ctx, |s| s.digest_one_go(ctx, input, out))
}

/// Starts a multi-part digest and snapshots it into `state`.
pub(crate) fn digest_start<S: Session>(
    session: &mut S,
    alg: Algorithm,
    state: &mut [u8],
) -> SssResult<usize> {
    let ctx = session.digest_context_init(alg, Mode::Digest)?;
    in_context(session, ctx, |s| {
        s.digest_init(ctx)?;
        s.digest_export_context(ctx, state)
    })
}

/// Restores a multi-part digest from `state`, feeds it `input`
/// and snapshots it again.
pub(crate) fn digest_resume<S: Session>(
    session: &mut S,
    alg: Algorithm,
    state: &mut [u8],
    state_len: usize,
    input: &[u8],
) -> SssResult<usize> {
    let ctx = session.digest_context_init(alg, Mode::Digest)?;
    in_context(session, ctx, |s| {
        let saved = state.get(..state_len).ok_or(SssError::InvalidArgument)?;
        s.digest_import_context(ctx, saved)?;
        s.digest_update(ctx, input)?;
        s.digest_export_context(ctx, state)
    })
}

/// Restores a multi-part digest from `state` and snapshots it
/// twice, into `state` and into `copy`.
pub(crate) fn digest_fork<S: Session>(
    session: &mut S,
    alg: Algorithm,
    state: &mut [u8],
    state_len: usize,
    copy: &mut [u8],
) -> SssResult<(usize, usize)> {
    let ctx = session.digest_context_init(alg, Mode::Digest)?;
    in_context(session, ctx, |s| {
        let saved = state.get(..state_len).ok_or(SssError::InvalidArgument)?;
        s.digest_import_context(ctx, saved)?;
        let n = s.digest_export_context(ctx, state)?;
        let m = s.digest_export_context(ctx, copy)?;
        Ok((n, m))
    })
}

/// Restores a multi-part digest from `state` and finishes it.
pub(crate) fn digest_finish<S: Session>(
    session: &mut S,
    alg: Algorithm,
    state: &[u8],
    out: &mut [u8],
) -> SssResult<usize> {
    let ctx = session.digest_context_init(alg, Mode::Digest)?;
    in_context(session, ctx, |s| {
        s.digest_import_context(ctx, state)?;
        s.digest_finish(ctx, out)
    })
}

/// Fills `out` with random bytes.
pub(crate) fn random<S: Session>(session: &mut S, out: &mut [u8]) -> SssResult<()> {
    let ctx = session.rng_context_init()?;
    in_context(session, ctx, |s| s.rng_get_random(ctx, out))
}

/// Passes `data` through the enclave's data tunnel.
pub(crate) fn tunnel<S: Session>(
    session: &mut S,
    kind: enclave_sscp::TunnelType,
    data: &[u8],
    out: &mut [u8],
) -> SssResult<usize> {
    let ctx = session.tunnel_context_init(kind)?;
    in_context(session, ctx, |s| s.tunnel(ctx, data, out))
}
