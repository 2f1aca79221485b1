use std::collections::{BTreeMap, HashMap};

use enclave_sscp::{
    Algorithm, BlobType, CipherType, ContextId, FreeMode, KeyLen, KeyPart, KeyProperties, Mode,
    ObjectId, Session, SssError, SssResult, TunnelType,
    blob::{BlobHeader, NONCE_LEN, Origin},
};
use rand::{RngCore, SeedableRng, rngs::StdRng};
use tracing::{debug, trace};

use crate::{
    crypto::{self, Curve, DigestState, MacState},
    keystore::{Handle, Material, Object},
    wrap,
};

/// The number of key objects the keystore can hold at once.
pub const MAX_OBJECTS: usize = 32;

/// Identifies an exported MAC context.
const MAC_SNAPSHOT_MAGIC: [u8; 2] = *b"MS";
/// Identifies an exported digest context.
const DIGEST_SNAPSHOT_MAGIC: [u8; 2] = *b"DS";
const SNAPSHOT_LEN: usize = MAC_SNAPSHOT_MAGIC.len() + 8;

/// A [`Session`] method, for fault injection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Op {
    KeyObjectInit,
    AllocateHandle,
    KeyObjectFree,
    SetKey,
    GetKey,
    GenerateKey,
    ExportKey,
    ImportKey,
    EraseKey,
    SymmetricInit,
    Cipher,
    AeadInit,
    Aead,
    MacContextInit,
    MacOneGo,
    MacInit,
    MacUpdate,
    MacFinish,
    MacExport,
    MacImport,
    AsymmetricInit,
    Sign,
    Verify,
    DeriveInit,
    DeriveDh,
    DigestContextInit,
    Digest,
    DigestInit,
    DigestUpdate,
    DigestFinish,
    DigestExport,
    DigestImport,
    RngInit,
    Random,
    TunnelInit,
    Tunnel,
    ContextFree,
}

impl Op {
    /// Reports whether the operation releases resources.
    pub const fn is_cleanup(self) -> bool {
        matches!(self, Self::KeyObjectFree | Self::EraseKey | Self::ContextFree)
    }
}

/// Counters kept by a [`SoftEnclave`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Session calls, including failed ones.
    pub calls: u64,
    /// Key objects created.
    pub objects_created: u64,
    /// Key objects freed.
    pub objects_freed: u64,
    /// Contexts opened.
    pub contexts_opened: u64,
    /// Contexts freed.
    pub contexts_freed: u64,
}

enum Context {
    Symmetric {
        key: ObjectId,
        alg: Algorithm,
        mode: Mode,
    },
    Aead {
        key: ObjectId,
        alg: Algorithm,
        mode: Mode,
    },
    Mac {
        key: ObjectId,
        alg: Algorithm,
        state: Option<MacState>,
    },
    Asymmetric {
        key: ObjectId,
        alg: Algorithm,
        mode: Mode,
    },
    Derive {
        key: ObjectId,
        alg: Algorithm,
    },
    Digest {
        alg: Algorithm,
        state: Option<DigestState>,
    },
    Rng,
    Tunnel,
}

/// A context exported by the host.
enum Snapshot {
    Mac(Algorithm, MacState),
    Digest(Algorithm, DigestState),
}

/// An enclave implemented in software.
///
/// It keeps the same rules as the hardware: key objects must be
/// allocated before use, contexts are bound to key objects with
/// matching properties, and key material only leaves as blobs
/// wrapped under keys the host never sees.
///
/// MAC and digest contexts are exported as tokens referring to
/// state kept by the simulator. Each token can be imported
/// once.
pub struct SoftEnclave {
    objects: BTreeMap<u32, Object>,
    contexts: BTreeMap<u32, Context>,
    next_id: u32,
    die_unique_key: [u8; 32],
    gateway_key: [u8; 32],
    rng: StdRng,
    snapshots: HashMap<u64, Snapshot>,
    next_snapshot: u64,
    stats: Stats,
    fail_ops: Vec<Op>,
    fail_at: Option<u64>,
    faults: Vec<Op>,
}

impl Default for SoftEnclave {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftEnclave {
    /// Creates an enclave with a fixed seed.
    pub fn new() -> Self {
        Self::with_seed(0x5eed)
    }

    /// Creates an enclave whose wrapping keys and randomness
    /// derive from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut die_unique_key = [0u8; 32];
        rng.fill_bytes(&mut die_unique_key);
        let mut gateway_key = [0u8; 32];
        rng.fill_bytes(&mut gateway_key);
        Self {
            objects: BTreeMap::new(),
            contexts: BTreeMap::new(),
            next_id: 1,
            die_unique_key,
            gateway_key,
            rng,
            snapshots: HashMap::new(),
            next_snapshot: 1,
            stats: Stats::default(),
            fail_ops: Vec::new(),
            fail_at: None,
            faults: Vec::new(),
        }
    }

    /// Returns the counters.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Resets the counters.
    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
        self.fail_at = None;
    }

    /// The number of key objects that have not been freed.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// The number of contexts that have not been freed.
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Makes every call to `op` fail.
    pub fn fail_on(&mut self, op: Op) {
        self.fail_ops.push(op);
    }

    /// Makes the `n`th call from now fail, counting from zero.
    pub fn fail_nth_call(&mut self, n: u64) {
        self.fail_at = Some(self.stats.calls.saturating_add(n));
    }

    /// Removes every injected fault.
    pub fn clear_faults(&mut self) {
        self.fail_ops.clear();
        self.fail_at = None;
        self.faults.clear();
    }

    /// The operations that failed because of an injected fault.
    pub fn injected_faults(&self) -> &[Op] {
        &self.faults
    }

    /// Wraps key material the way the provisioning gateway
    /// does.
    ///
    /// `data` uses the encoding of
    /// [`Session::key_store_set_key`]. Key pairs may also be
    /// given as just the private key.
    pub fn provision_key(
        &mut self,
        cipher: CipherType,
        part: KeyPart,
        bits: usize,
        data: &[u8],
    ) -> SssResult<Vec<u8>> {
        let material = match Material::decode(cipher, part, bits, data) {
            Err(_) if part == KeyPart::Pair => {
                Material::decode(cipher, KeyPart::Private, bits, data)?
            }
            res => res?,
        };
        let body = material.encode(cipher, part, true)?;
        let bits = u16::try_from(bits).map_err(|_| SssError::InvalidArgument)?;
        let header = BlobHeader::for_key(Origin::Gateway, cipher, part, bits);
        let nonce = self.nonce();
        wrap::seal(&self.gateway_key, header, nonce, &body)
    }

    /// Wraps data the way the provisioning gateway does.
    pub fn provision_data(&mut self, data: &[u8]) -> SssResult<Vec<u8>> {
        let nonce = self.nonce();
        wrap::seal(&self.gateway_key, BlobHeader::for_data(), nonce, data)
    }

    fn nonce(&mut self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill_bytes(&mut nonce);
        nonce
    }

    fn enter(&mut self, op: Op) -> SssResult<()> {
        let call = self.stats.calls;
        self.stats.calls = call.saturating_add(1);
        if self.fail_at == Some(call) || self.fail_ops.contains(&op) {
            debug!(?op, call, "injected fault");
            self.faults.push(op);
            return Err(SssError::Fail);
        }
        Ok(())
    }

    fn next_id(&mut self) -> SssResult<u32> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(SssError::ResourceBusy)?;
        Ok(id)
    }

    fn object(&self, obj: ObjectId) -> SssResult<&Object> {
        self.objects.get(&obj.0).ok_or(SssError::InvalidArgument)
    }

    fn object_mut(&mut self, obj: ObjectId) -> SssResult<&mut Object> {
        self.objects.get_mut(&obj.0).ok_or(SssError::InvalidArgument)
    }

    fn context(&self, ctx: ContextId) -> SssResult<&Context> {
        self.contexts.get(&ctx.0).ok_or(SssError::InvalidArgument)
    }

    /// Checks that `obj` may back a context that needs `props`.
    fn bind(&self, obj: ObjectId, props: KeyProperties) -> SssResult<&Handle> {
        let handle = self.object(obj)?.handle()?;
        if !handle.props.contains(props) {
            debug!(%obj, key_id = handle.key_id, ?props, have = ?handle.props, "key object lacks properties");
            return Err(SssError::Fail);
        }
        Ok(handle)
    }

    fn open_context(&mut self, ctx: Context) -> SssResult<ContextId> {
        let id = self.next_id()?;
        self.contexts.insert(id, ctx);
        self.stats.contexts_opened = self.stats.contexts_opened.saturating_add(1);
        Ok(ContextId(id))
    }

    fn secret_key(&self, obj: ObjectId) -> SssResult<Vec<u8>> {
        Ok(self.object(obj)?.material()?.secret)
    }

    fn mac_state(&mut self, ctx: ContextId) -> SssResult<&mut MacState> {
        match self.contexts.get_mut(&ctx.0) {
            Some(Context::Mac {
                state: Some(state), ..
            }) => Ok(state),
            Some(Context::Mac { state: None, .. }) => Err(SssError::Fail),
            _ => Err(SssError::InvalidArgument),
        }
    }

    fn digest_state(&mut self, ctx: ContextId) -> SssResult<&mut DigestState> {
        match self.contexts.get_mut(&ctx.0) {
            Some(Context::Digest {
                state: Some(state), ..
            }) => Ok(state),
            Some(Context::Digest { state: None, .. }) => Err(SssError::Fail),
            _ => Err(SssError::InvalidArgument),
        }
    }

    /// Stores `snapshot` and writes a token for it to `out`.
    fn save_snapshot(
        &mut self,
        magic: [u8; 2],
        snapshot: Snapshot,
        out: &mut [u8],
    ) -> SssResult<usize> {
        let out = out
            .get_mut(..SNAPSHOT_LEN)
            .ok_or(SssError::InvalidArgument)?;
        let token = self.next_snapshot;
        self.next_snapshot = token.wrapping_add(1);
        self.snapshots.insert(token, snapshot);

        let (head, rest) = out.split_at_mut(magic.len());
        head.copy_from_slice(&magic);
        rest.copy_from_slice(&token.to_le_bytes());
        Ok(SNAPSHOT_LEN)
    }

    /// Removes the snapshot `blob` refers to.
    fn take_snapshot(&mut self, magic: [u8; 2], blob: &[u8]) -> SssResult<Snapshot> {
        let token = blob
            .strip_prefix(&magic)
            .and_then(|rest| <[u8; 8]>::try_from(rest).ok())
            .map(u64::from_le_bytes)
            .ok_or(SssError::InvalidArgument)?;
        self.snapshots
            .remove(&token)
            .ok_or(SssError::InvalidArgument)
    }

    /// Returns the curve and material of the asymmetric key
    /// `obj`.
    fn ecc_key(&self, obj: ObjectId) -> SssResult<(Curve, Material)> {
        let object = self.object(obj)?;
        let cipher = object.handle()?.cipher;
        let material = object.material()?;
        Ok((Curve::of(cipher, material.bits)?, material))
    }
}

impl Session for SoftEnclave {
    fn key_object_init(&mut self) -> SssResult<ObjectId> {
        self.enter(Op::KeyObjectInit)?;
        if self.objects.len() >= MAX_OBJECTS {
            return Err(SssError::ResourceBusy);
        }
        let id = self.next_id()?;
        self.objects.insert(id, Object::default());
        self.stats.objects_created = self.stats.objects_created.saturating_add(1);
        trace!(id, "key object created");
        Ok(ObjectId(id))
    }

    fn key_object_allocate_handle(
        &mut self,
        obj: ObjectId,
        key_id: u32,
        part: KeyPart,
        cipher: CipherType,
        size: usize,
        props: KeyProperties,
    ) -> SssResult<()> {
        self.enter(Op::AllocateHandle)?;
        let object = self.object_mut(obj)?;
        if object.handle.is_some() {
            return Err(SssError::Fail);
        }
        if cipher == CipherType::EcBrainpool {
            return Err(SssError::Fail);
        }
        object.handle = Some(Handle {
            key_id,
            part,
            cipher,
            size,
            props,
        });
        Ok(())
    }

    fn key_object_free(&mut self, obj: ObjectId, _mode: FreeMode) -> SssResult<()> {
        self.enter(Op::KeyObjectFree)?;
        self.objects
            .remove(&obj.0)
            .ok_or(SssError::InvalidArgument)?;
        self.stats.objects_freed = self.stats.objects_freed.saturating_add(1);
        trace!(%obj, "key object freed");
        Ok(())
    }

    fn key_store_set_key(
        &mut self,
        obj: ObjectId,
        data: &[u8],
        bits: usize,
        part: KeyPart,
    ) -> SssResult<()> {
        self.enter(Op::SetKey)?;
        let object = self.object_mut(obj)?;
        let handle = *object.handle()?;
        if handle.props.contains(KeyProperties::NO_PLAIN_WRITE) {
            return Err(SssError::Fail);
        }
        if part != handle.part || data.len() > handle.size {
            return Err(SssError::InvalidArgument);
        }
        object.material = Some(Material::decode(handle.cipher, part, bits, data)?);
        Ok(())
    }

    fn key_store_get_key(
        &mut self,
        obj: ObjectId,
        part: KeyPart,
        out: &mut [u8],
    ) -> SssResult<KeyLen> {
        self.enter(Op::GetKey)?;
        let object = self.object(obj)?;
        let cipher = object.handle()?.cipher;
        let material = object.material()?;
        let data = material.encode(cipher, part, false)?;
        out.get_mut(..data.len())
            .ok_or(SssError::InvalidArgument)?
            .copy_from_slice(&data);
        Ok(KeyLen {
            len: data.len(),
            bits: material.bits,
        })
    }

    fn key_store_generate_key(&mut self, obj: ObjectId, bits: usize) -> SssResult<()> {
        self.enter(Op::GenerateKey)?;
        let handle = *self.object(obj)?.handle()?;
        let material = Material::generate(&handle, bits, &mut self.rng)?;
        let needed = if handle.cipher.is_ecc() {
            let n = Curve::of(handle.cipher, bits)?.scalar_len();
            if handle.part == KeyPart::Pair {
                n.saturating_mul(3)
            } else {
                n
            }
        } else {
            material.secret.len()
        };
        if handle.size < needed {
            return Err(SssError::Fail);
        }
        self.object_mut(obj)?.material = Some(material);
        Ok(())
    }

    fn key_store_export_key(
        &mut self,
        obj: ObjectId,
        blob: BlobType,
        out: &mut [u8],
    ) -> SssResult<usize> {
        self.enter(Op::ExportKey)?;
        if blob != BlobType::DieUnique {
            return Err(SssError::Fail);
        }
        let object = self.object(obj)?;
        let handle = *object.handle()?;
        if handle.props.contains(KeyProperties::NO_IMPORT_EXPORT) {
            return Err(SssError::Fail);
        }
        let material = object.material()?;
        let body = material.encode(handle.cipher, handle.part, true)?;
        let bits = u16::try_from(material.bits).map_err(|_| SssError::InvalidArgument)?;
        let header = BlobHeader::for_key(Origin::DieUnique, handle.cipher, handle.part, bits);
        let nonce = self.nonce();
        let wrapped = wrap::seal(&self.die_unique_key, header, nonce, &body)?;
        out.get_mut(..wrapped.len())
            .ok_or(SssError::InvalidArgument)?
            .copy_from_slice(&wrapped);
        Ok(wrapped.len())
    }

    fn key_store_import_key(
        &mut self,
        obj: ObjectId,
        blob: BlobType,
        data: &[u8],
    ) -> SssResult<()> {
        self.enter(Op::ImportKey)?;
        let handle = *self.object(obj)?.handle()?;
        let (kek, origin) = match blob {
            BlobType::Gateway => (&self.gateway_key, Origin::Gateway),
            BlobType::DieUnique => (&self.die_unique_key, Origin::DieUnique),
        };
        let (parsed, body) = wrap::open(kek, data)?;
        if parsed.origin() != origin
            || parsed.cipher() != Some(handle.cipher)
            || parsed.part() != Some(handle.part)
        {
            debug!(%obj, ?origin, blob_origin = ?parsed.origin(), "blob does not fit key object");
            return Err(SssError::Fail);
        }
        if body.len() > handle.size {
            return Err(SssError::Fail);
        }
        let bits = usize::from(parsed.bits());
        let body = if handle.part == KeyPart::Public && handle.cipher.is_ecc() {
            let len = Curve::of(handle.cipher, bits)?.public_len();
            body.get(..len).ok_or(SssError::InvalidArgument)?
        } else {
            &body[..]
        };
        let material = Material::decode(handle.cipher, handle.part, bits, body)?;
        self.object_mut(obj)?.material = Some(material);
        Ok(())
    }

    fn key_store_erase_key(&mut self, obj: ObjectId) -> SssResult<()> {
        self.enter(Op::EraseKey)?;
        self.object_mut(obj)?.material = None;
        Ok(())
    }

    fn symmetric_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId> {
        self.enter(Op::SymmetricInit)?;
        let handle = self.bind(obj, KeyProperties::CRYPTO_AES)?;
        if handle.cipher != CipherType::Aes
            || !matches!(alg, Algorithm::AesEcb | Algorithm::AesCbc | Algorithm::AesCtr)
            || !matches!(mode, Mode::Encrypt | Mode::Decrypt)
        {
            return Err(SssError::InvalidArgument);
        }
        self.open_context(Context::Symmetric { key: obj, alg, mode })
    }

    fn cipher_one_go(
        &mut self,
        ctx: ContextId,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> SssResult<()> {
        self.enter(Op::Cipher)?;
        let &Context::Symmetric { key, alg, mode } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let key = self.secret_key(key)?;
        crypto::block_cipher(alg, mode, &key, iv, input, output)
    }

    fn aead_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId> {
        self.enter(Op::AeadInit)?;
        let handle = self.bind(obj, KeyProperties::CRYPTO_AEAD)?;
        if handle.cipher != CipherType::Aes
            || !matches!(alg, Algorithm::AesCcm | Algorithm::AesGcm)
            || !matches!(mode, Mode::Encrypt | Mode::Decrypt)
        {
            return Err(SssError::InvalidArgument);
        }
        self.open_context(Context::Aead { key: obj, alg, mode })
    }

    fn aead_one_go(
        &mut self,
        ctx: ContextId,
        input: &[u8],
        output: &mut [u8],
        nonce: &[u8],
        aad: &[u8],
        tag: &mut [u8],
    ) -> SssResult<()> {
        self.enter(Op::Aead)?;
        let &Context::Aead { key, alg, mode } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let key = self.secret_key(key)?;
        crypto::aead(alg, mode, &key, nonce, aad, input, output, tag)
    }

    fn mac_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId> {
        self.enter(Op::MacContextInit)?;
        let handle = self.bind(obj, KeyProperties::CRYPTO_MAC)?;
        let ok = match alg {
            Algorithm::CmacAes => handle.cipher == CipherType::Aes,
            Algorithm::HmacSha1
            | Algorithm::HmacSha224
            | Algorithm::HmacSha256
            | Algorithm::HmacSha384
            | Algorithm::HmacSha512 => {
                matches!(handle.cipher, CipherType::Mac | CipherType::Symmetric)
            }
            _ => false,
        };
        if !ok || mode != Mode::Mac {
            return Err(SssError::InvalidArgument);
        }
        self.open_context(Context::Mac {
            key: obj,
            alg,
            state: None,
        })
    }

    fn mac_one_go(&mut self, ctx: ContextId, input: &[u8], out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::MacOneGo)?;
        let &Context::Mac { key, alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let mut state = MacState::new(alg, &self.secret_key(key)?)?;
        state.update(input);
        state.finish(out)
    }

    fn mac_init(&mut self, ctx: ContextId) -> SssResult<()> {
        self.enter(Op::MacInit)?;
        let &Context::Mac { key, alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let fresh = MacState::new(alg, &self.secret_key(key)?)?;
        if let Some(Context::Mac { state, .. }) = self.contexts.get_mut(&ctx.0) {
            *state = Some(fresh);
        }
        Ok(())
    }

    fn mac_update(&mut self, ctx: ContextId, input: &[u8]) -> SssResult<()> {
        self.enter(Op::MacUpdate)?;
        self.mac_state(ctx)?.update(input);
        Ok(())
    }

    fn mac_finish(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::MacFinish)?;
        let Some(Context::Mac { state, .. }) = self.contexts.get_mut(&ctx.0) else {
            return Err(SssError::InvalidArgument);
        };
        state.take().ok_or(SssError::Fail)?.finish(out)
    }

    fn mac_export_context(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::MacExport)?;
        let &Context::Mac { alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let state = self.mac_state(ctx)?.clone();
        self.save_snapshot(MAC_SNAPSHOT_MAGIC, Snapshot::Mac(alg, state), out)
    }

    fn mac_import_context(&mut self, ctx: ContextId, blob: &[u8]) -> SssResult<()> {
        self.enter(Op::MacImport)?;
        let &Context::Mac { alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let Snapshot::Mac(saved_alg, saved) = self.take_snapshot(MAC_SNAPSHOT_MAGIC, blob)? else {
            return Err(SssError::InvalidArgument);
        };
        if saved_alg != alg {
            return Err(SssError::InvalidArgument);
        }
        if let Some(Context::Mac { state, .. }) = self.contexts.get_mut(&ctx.0) {
            *state = Some(saved);
        }
        Ok(())
    }

    fn asymmetric_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId> {
        self.enter(Op::AsymmetricInit)?;
        let handle = self.bind(obj, KeyProperties::CRYPTO_ASYM_SIGN_VERIFY)?;
        let ok = match alg {
            Algorithm::EcdsaSha224
            | Algorithm::EcdsaSha256
            | Algorithm::EcdsaSha384
            | Algorithm::EcdsaSha512 => handle.cipher == CipherType::EcNistP,
            Algorithm::EdDsaEd25519 => handle.cipher == CipherType::EcTwistedEd,
            _ => false,
        };
        if !ok || !matches!(mode, Mode::Sign | Mode::Verify) {
            return Err(SssError::InvalidArgument);
        }
        self.open_context(Context::Asymmetric { key: obj, alg, mode })
    }

    fn asymmetric_sign_digest(
        &mut self,
        ctx: ContextId,
        digest: &[u8],
        sig: &mut [u8],
    ) -> SssResult<usize> {
        self.enter(Op::Sign)?;
        let &Context::Asymmetric {
            key,
            mode: Mode::Sign,
            ..
        } = self.context(ctx)?
        else {
            return Err(SssError::InvalidArgument);
        };
        let (curve, material) = self.ecc_key(key)?;
        if material.secret.is_empty() {
            return Err(SssError::Fail);
        }
        let signature = curve.sign(&material.secret, digest)?;
        sig.get_mut(..signature.len())
            .ok_or(SssError::InvalidArgument)?
            .copy_from_slice(&signature);
        Ok(signature.len())
    }

    fn asymmetric_verify_digest(
        &mut self,
        ctx: ContextId,
        digest: &[u8],
        sig: &[u8],
    ) -> SssResult<()> {
        self.enter(Op::Verify)?;
        let &Context::Asymmetric {
            key,
            mode: Mode::Verify,
            ..
        } = self.context(ctx)?
        else {
            return Err(SssError::InvalidArgument);
        };
        let (curve, material) = self.ecc_key(key)?;
        curve.verify(&material.public, digest, sig)
    }

    fn derive_key_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId> {
        self.enter(Op::DeriveInit)?;
        let handle = self.bind(obj, KeyProperties::CRYPTO_KDF)?;
        let ok = match alg {
            Algorithm::Ecdh => handle.cipher == CipherType::EcNistP,
            Algorithm::MontDh => handle.cipher == CipherType::EcMontgomery,
            Algorithm::E2eBlob => {
                matches!(handle.cipher, CipherType::EcNistP | CipherType::EcMontgomery)
            }
            _ => false,
        };
        if !ok || mode != Mode::ComputeSharedSecret {
            return Err(SssError::InvalidArgument);
        }
        self.open_context(Context::Derive { key: obj, alg })
    }

    fn derive_key_dh(
        &mut self,
        ctx: ContextId,
        peer: ObjectId,
        derived: ObjectId,
    ) -> SssResult<()> {
        self.enter(Op::DeriveDh)?;
        let &Context::Derive { key, alg } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let (curve, own) = self.ecc_key(key)?;
        let (peer_curve, peer) = self.ecc_key(peer)?;
        if peer_curve != curve || own.secret.is_empty() {
            return Err(SssError::InvalidArgument);
        }
        let raw = curve.diffie_hellman(&own.secret, &peer.public)?;
        let secret = if alg == Algorithm::E2eBlob {
            crypto::e2e_secret(&raw)
        } else {
            raw
        };

        let target = self.object_mut(derived)?;
        if target.handle()?.size < secret.len() {
            return Err(SssError::Fail);
        }
        let bits = secret.len().saturating_mul(8);
        target.material = Some(Material::symmetric(&secret, bits));
        Ok(())
    }

    fn digest_context_init(&mut self, alg: Algorithm, mode: Mode) -> SssResult<ContextId> {
        self.enter(Op::DigestContextInit)?;
        if mode != Mode::Digest {
            return Err(SssError::InvalidArgument);
        }
        self.open_context(Context::Digest { alg, state: None })
    }

    fn digest_one_go(&mut self, ctx: ContextId, input: &[u8], out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::Digest)?;
        let &Context::Digest { alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        crypto::digest(alg, input, out)
    }

    fn digest_init(&mut self, ctx: ContextId) -> SssResult<()> {
        self.enter(Op::DigestInit)?;
        let Some(Context::Digest { alg, state }) = self.contexts.get_mut(&ctx.0) else {
            return Err(SssError::InvalidArgument);
        };
        *state = Some(DigestState::new(*alg)?);
        Ok(())
    }

    fn digest_update(&mut self, ctx: ContextId, input: &[u8]) -> SssResult<()> {
        self.enter(Op::DigestUpdate)?;
        self.digest_state(ctx)?.update(input);
        Ok(())
    }

    fn digest_finish(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::DigestFinish)?;
        let Some(Context::Digest { state, .. }) = self.contexts.get_mut(&ctx.0) else {
            return Err(SssError::InvalidArgument);
        };
        state.take().ok_or(SssError::Fail)?.finish(out)
    }

    fn digest_export_context(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::DigestExport)?;
        let &Context::Digest { alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let state = self.digest_state(ctx)?.clone();
        self.save_snapshot(DIGEST_SNAPSHOT_MAGIC, Snapshot::Digest(alg, state), out)
    }

    fn digest_import_context(&mut self, ctx: ContextId, blob: &[u8]) -> SssResult<()> {
        self.enter(Op::DigestImport)?;
        let &Context::Digest { alg, .. } = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let Snapshot::Digest(saved_alg, saved) =
            self.take_snapshot(DIGEST_SNAPSHOT_MAGIC, blob)?
        else {
            return Err(SssError::InvalidArgument);
        };
        if saved_alg != alg {
            return Err(SssError::InvalidArgument);
        }
        if let Some(Context::Digest { state, .. }) = self.contexts.get_mut(&ctx.0) {
            *state = Some(saved);
        }
        Ok(())
    }

    fn rng_context_init(&mut self) -> SssResult<ContextId> {
        self.enter(Op::RngInit)?;
        self.open_context(Context::Rng)
    }

    fn rng_get_random(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<()> {
        self.enter(Op::Random)?;
        let Context::Rng = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        self.rng.fill_bytes(out);
        Ok(())
    }

    fn tunnel_context_init(&mut self, kind: TunnelType) -> SssResult<ContextId> {
        self.enter(Op::TunnelInit)?;
        match kind {
            TunnelType::GatewayData => self.open_context(Context::Tunnel),
        }
    }

    fn tunnel(&mut self, ctx: ContextId, data: &[u8], out: &mut [u8]) -> SssResult<usize> {
        self.enter(Op::Tunnel)?;
        let Context::Tunnel = self.context(ctx)? else {
            return Err(SssError::InvalidArgument);
        };
        let (parsed, body) = wrap::open(&self.gateway_key, data)?;
        if parsed.origin() != Origin::Data {
            return Err(SssError::InvalidArgument);
        }
        out.get_mut(..body.len())
            .ok_or(SssError::InvalidArgument)?
            .copy_from_slice(&body);
        Ok(body.len())
    }

    fn context_free(&mut self, ctx: ContextId) -> SssResult<()> {
        self.enter(Op::ContextFree)?;
        self.contexts
            .remove(&ctx.0)
            .ok_or(SssError::InvalidArgument)?;
        self.stats.contexts_freed = self.stats.contexts_freed.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    fn aes_key(se: &mut SoftEnclave, key: &[u8], props: KeyProperties) -> ObjectId {
        let obj = se.key_object_init().expect("init");
        se.key_object_allocate_handle(obj, 1, KeyPart::Default, CipherType::Aes, key.len(), props)
            .expect("allocate");
        se.key_store_set_key(obj, key, key.len() * 8, KeyPart::Default)
            .expect("set");
        obj
    }

    #[test_log::test]
    fn test_properties_are_enforced() {
        let mut se = SoftEnclave::new();
        let obj = aes_key(&mut se, &[0; 16], KeyProperties::CRYPTO_AEAD);
        assert_eq!(
            se.symmetric_context_init(obj, Algorithm::AesCbc, Mode::Encrypt),
            Err(SssError::Fail)
        );
        let ctx = se
            .aead_context_init(obj, Algorithm::AesGcm, Mode::Encrypt)
            .expect("aead context");
        se.context_free(ctx).expect("free");
    }

    #[test_log::test]
    fn test_cipher_context() {
        let mut se = SoftEnclave::new();
        let key = hex!("000102030405060708090a0b0c0d0e0f");
        let obj = aes_key(&mut se, &key, KeyProperties::CRYPTO_AES);
        let ctx = se
            .symmetric_context_init(obj, Algorithm::AesEcb, Mode::Encrypt)
            .expect("context");
        let mut out = [0u8; 16];
        se.cipher_one_go(ctx, &[], &hex!("00112233445566778899aabbccddeeff"), &mut out)
            .expect("encrypt");
        assert_eq!(out, hex!("69c4e0d86a7b0430d8cdb78070b4c55a"));
        se.context_free(ctx).expect("free");
        se.key_store_erase_key(obj).expect("erase");
        se.key_object_free(obj, FreeMode::Defragment).expect("free");

        assert_eq!(se.live_objects(), 0);
        assert_eq!(se.live_contexts(), 0);
        let stats = se.stats();
        assert_eq!(stats.objects_created, stats.objects_freed);
        assert_eq!(stats.contexts_opened, stats.contexts_freed);
    }

    #[test_log::test]
    fn test_digest_snapshots() {
        let mut se = SoftEnclave::new();
        let ctx = se
            .digest_context_init(Algorithm::Sha256, Mode::Digest)
            .expect("context");
        se.digest_init(ctx).expect("digest init");
        se.digest_update(ctx, b"a").expect("update");
        let mut snapshot = [0u8; 16];
        let n = se
            .digest_export_context(ctx, &mut snapshot)
            .expect("export");
        se.digest_update(ctx, b"x").expect("update");

        se.digest_import_context(ctx, &snapshot[..n])
            .expect("import");
        assert_eq!(
            se.digest_import_context(ctx, &snapshot[..n]),
            Err(SssError::InvalidArgument)
        );
        se.digest_update(ctx, b"bc").expect("update");
        let mut out = [0u8; 32];
        assert_eq!(se.digest_finish(ctx, &mut out), Ok(32));
        assert_eq!(
            out,
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        // Finishing consumes the running digest.
        assert_eq!(se.digest_update(ctx, b"more"), Err(SssError::Fail));
        se.context_free(ctx).expect("free");
    }

    #[test_log::test]
    fn test_mac_snapshot_is_single_use() {
        let mut se = SoftEnclave::new();
        let obj = se.key_object_init().expect("init");
        se.key_object_allocate_handle(
            obj,
            1,
            KeyPart::Default,
            CipherType::Mac,
            4,
            KeyProperties::CRYPTO_MAC,
        )
        .expect("allocate");
        se.key_store_set_key(obj, b"Jefe", 32, KeyPart::Default)
            .expect("set");
        let ctx = se
            .mac_context_init(obj, Algorithm::HmacSha256, Mode::Mac)
            .expect("context");
        se.mac_init(ctx).expect("mac init");
        let mut snapshot = [0u8; 64];
        let n = se.mac_export_context(ctx, &mut snapshot).expect("export");

        se.mac_import_context(ctx, &snapshot[..n]).expect("import");
        assert_eq!(
            se.mac_import_context(ctx, &snapshot[..n]),
            Err(SssError::InvalidArgument)
        );
        se.mac_update(ctx, b"what do ya want for nothing?")
            .expect("update");
        let mut out = [0u8; 32];
        assert_eq!(se.mac_finish(ctx, &mut out), Ok(32));
        assert_eq!(
            out,
            hex!("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
        assert_eq!(se.mac_update(ctx, b"more"), Err(SssError::Fail));
    }

    #[test_log::test]
    fn test_blob_round_trip_through_keystore() {
        let mut se = SoftEnclave::new();
        let obj = se.key_object_init().expect("init");
        se.key_object_allocate_handle(
            obj,
            7,
            KeyPart::Pair,
            CipherType::EcNistP,
            96,
            KeyProperties::CRYPTO_ALL,
        )
        .expect("allocate");
        se.key_store_generate_key(obj, 256).expect("generate");
        let mut blob = [0u8; 120];
        assert_eq!(se.key_store_export_key(obj, BlobType::DieUnique, &mut blob), Ok(120));
        assert_eq!(
            se.key_store_export_key(obj, BlobType::Gateway, &mut blob),
            Err(SssError::Fail)
        );

        let mut public = [0u8; 64];
        se.key_store_get_key(obj, KeyPart::Public, &mut public)
            .expect("public");

        let copy = se.key_object_init().expect("init");
        se.key_object_allocate_handle(
            copy,
            7,
            KeyPart::Pair,
            CipherType::EcNistP,
            96,
            KeyProperties::CRYPTO_ALL,
        )
        .expect("allocate");
        se.key_store_import_key(copy, BlobType::DieUnique, &blob)
            .expect("import");
        let mut again = [0u8; 64];
        let len = se
            .key_store_get_key(copy, KeyPart::Public, &mut again)
            .expect("public");
        assert_eq!(len, KeyLen { len: 64, bits: 256 });
        assert_eq!(public, again);

        // Die-unique blobs are not gateway blobs.
        let other = se.key_object_init().expect("init");
        se.key_object_allocate_handle(
            other,
            7,
            KeyPart::Pair,
            CipherType::EcNistP,
            96,
            KeyProperties::CRYPTO_ALL,
        )
        .expect("allocate");
        assert_eq!(
            se.key_store_import_key(other, BlobType::Gateway, &blob),
            Err(SssError::Fail)
        );
    }

    #[test_log::test]
    fn test_nth_call_fault() {
        let mut se = SoftEnclave::new();
        se.fail_nth_call(1);
        let obj = se.key_object_init().expect("first call succeeds");
        assert_eq!(
            se.key_object_allocate_handle(
                obj,
                0,
                KeyPart::Default,
                CipherType::Aes,
                16,
                KeyProperties::NONE
            ),
            Err(SssError::Fail)
        );
        assert_eq!(se.injected_faults(), &[Op::AllocateHandle]);
        se.key_object_free(obj, FreeMode::Default).expect("free");
        assert_eq!(se.live_objects(), 0);
    }

    #[test_log::test]
    fn test_tunnel_only_opens_data() {
        let mut se = SoftEnclave::new();
        let blob = se.provision_data(b"hello").expect("provision");
        let ctx = se.tunnel_context_init(TunnelType::GatewayData).expect("ctx");
        let mut out = [0u8; 16];
        assert_eq!(se.tunnel(ctx, &blob, &mut out), Ok(5));
        assert_eq!(&out[..5], b"hello");

        let key = se
            .provision_key(CipherType::Aes, KeyPart::Default, 128, &[1; 16])
            .expect("provision");
        assert_eq!(se.tunnel(ctx, &key, &mut out), Err(SssError::InvalidArgument));
    }
}
