use crate::{
    Algorithm, BlobType, CipherType, ContextId, FreeMode, KeyPart, KeyProperties, Mode,
    ObjectId, SssResult, TunnelType,
};

/// The length and bit length of key material read back from a
/// key object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyLen {
    /// The number of bytes written.
    pub len: usize,
    /// The key's size in bits.
    pub bits: usize,
}

/// An open session with the enclave.
///
/// A session is opened and closed by whoever owns the enclave;
/// implementations of this trait only describe the commands
/// that can be issued while it is open. None of the methods are
/// reentrant: callers must serialize every use of a session.
///
/// # Key objects
///
/// A key object is created with [`key_object_init`], sized and
/// typed with [`key_object_allocate_handle`], then populated
/// with [`key_store_set_key`], [`key_store_import_key`] or
/// [`key_store_generate_key`]. It stays resident until it is
/// erased with [`key_store_erase_key`] and released with
/// [`key_object_free`].
///
/// # Contexts
///
/// Every operation runs inside a context created by one of the
/// `*_context_init` methods and released with
/// [`context_free`].
///
/// [`key_object_init`]: Session::key_object_init
/// [`key_object_allocate_handle`]: Session::key_object_allocate_handle
/// [`key_store_set_key`]: Session::key_store_set_key
/// [`key_store_import_key`]: Session::key_store_import_key
/// [`key_store_generate_key`]: Session::key_store_generate_key
/// [`key_store_erase_key`]: Session::key_store_erase_key
/// [`key_object_free`]: Session::key_object_free
/// [`context_free`]: Session::context_free
pub trait Session {
    /// Creates an empty key object.
    fn key_object_init(&mut self) -> SssResult<ObjectId>;

    /// Reserves `size` bytes of keystore memory for `obj`.
    fn key_object_allocate_handle(
        &mut self,
        obj: ObjectId,
        key_id: u32,
        part: KeyPart,
        cipher: CipherType,
        size: usize,
        props: KeyProperties,
    ) -> SssResult<()>;

    /// Releases a key object.
    fn key_object_free(&mut self, obj: ObjectId, mode: FreeMode) -> SssResult<()>;

    /// Writes plaintext key material into `obj`.
    fn key_store_set_key(
        &mut self,
        obj: ObjectId,
        data: &[u8],
        bits: usize,
        part: KeyPart,
    ) -> SssResult<()>;

    /// Reads key material (or the public half of a key pair)
    /// out of `obj`.
    fn key_store_get_key(
        &mut self,
        obj: ObjectId,
        part: KeyPart,
        out: &mut [u8],
    ) -> SssResult<KeyLen>;

    /// Generates fresh key material inside `obj`.
    fn key_store_generate_key(&mut self, obj: ObjectId, bits: usize) -> SssResult<()>;

    /// Wraps the contents of `obj` into a blob.
    ///
    /// Returns the number of bytes written to `out`.
    fn key_store_export_key(
        &mut self,
        obj: ObjectId,
        blob: BlobType,
        out: &mut [u8],
    ) -> SssResult<usize>;

    /// Unwraps `data` into `obj`.
    ///
    /// The enclave authenticates the blob before accepting it.
    fn key_store_import_key(&mut self, obj: ObjectId, blob: BlobType, data: &[u8])
    -> SssResult<()>;

    /// Erases the key material held by `obj`.
    fn key_store_erase_key(&mut self, obj: ObjectId) -> SssResult<()>;

    /// Creates a symmetric cipher context.
    fn symmetric_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId>;

    /// Encrypts or decrypts `input` into `output`, which must be
    /// the same length.
    fn cipher_one_go(
        &mut self,
        ctx: ContextId,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> SssResult<()>;

    /// Creates an AEAD context.
    fn aead_context_init(&mut self, obj: ObjectId, alg: Algorithm, mode: Mode)
    -> SssResult<ContextId>;

    /// Seals or opens `input` into `output`, which must be the
    /// same length.
    ///
    /// When sealing, the authentication tag is written to `tag`.
    /// When opening, it is read from `tag`.
    fn aead_one_go(
        &mut self,
        ctx: ContextId,
        input: &[u8],
        output: &mut [u8],
        nonce: &[u8],
        aad: &[u8],
        tag: &mut [u8],
    ) -> SssResult<()>;

    /// Creates a MAC context.
    fn mac_context_init(&mut self, obj: ObjectId, alg: Algorithm, mode: Mode)
    -> SssResult<ContextId>;

    /// Computes a MAC over `input` in one go.
    ///
    /// Returns the number of bytes written to `out`.
    fn mac_one_go(&mut self, ctx: ContextId, input: &[u8], out: &mut [u8]) -> SssResult<usize>;

    /// Starts a multi-part MAC computation.
    fn mac_init(&mut self, ctx: ContextId) -> SssResult<()>;

    /// Feeds `input` into a multi-part MAC computation.
    fn mac_update(&mut self, ctx: ContextId, input: &[u8]) -> SssResult<()>;

    /// Finishes a multi-part MAC computation.
    ///
    /// Returns the number of bytes written to `out`.
    fn mac_finish(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize>;

    /// Snapshots the state of a multi-part MAC computation.
    ///
    /// Returns the number of bytes written to `out`.
    fn mac_export_context(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize>;

    /// Restores a snapshot created by
    /// [`mac_export_context`][Session::mac_export_context].
    fn mac_import_context(&mut self, ctx: ContextId, blob: &[u8]) -> SssResult<()>;

    /// Creates a signing or verification context.
    fn asymmetric_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId>;

    /// Signs `digest`.
    ///
    /// Returns the number of bytes written to `sig`.
    fn asymmetric_sign_digest(
        &mut self,
        ctx: ContextId,
        digest: &[u8],
        sig: &mut [u8],
    ) -> SssResult<usize>;

    /// Verifies `sig` over `digest`.
    fn asymmetric_verify_digest(&mut self, ctx: ContextId, digest: &[u8], sig: &[u8])
    -> SssResult<()>;

    /// Creates a key derivation context.
    fn derive_key_context_init(
        &mut self,
        obj: ObjectId,
        alg: Algorithm,
        mode: Mode,
    ) -> SssResult<ContextId>;

    /// Derives a shared secret from the context's private key
    /// and `peer`, writing it into `derived`.
    fn derive_key_dh(
        &mut self,
        ctx: ContextId,
        peer: ObjectId,
        derived: ObjectId,
    ) -> SssResult<()>;

    /// Creates a digest context.
    fn digest_context_init(&mut self, alg: Algorithm, mode: Mode) -> SssResult<ContextId>;

    /// Hashes `input` in one go.
    ///
    /// Returns the number of bytes written to `out`.
    fn digest_one_go(&mut self, ctx: ContextId, input: &[u8], out: &mut [u8]) -> SssResult<usize>;

    /// Starts a multi-part digest.
    fn digest_init(&mut self, ctx: ContextId) -> SssResult<()>;

    /// Feeds `input` into a multi-part digest.
    fn digest_update(&mut self, ctx: ContextId, input: &[u8]) -> SssResult<()>;

    /// Finishes a multi-part digest.
    ///
    /// Returns the number of bytes written to `out`.
    fn digest_finish(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize>;

    /// Snapshots the state of a multi-part digest.
    ///
    /// Returns the number of bytes written to `out`.
    fn digest_export_context(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<usize>;

    /// Restores a snapshot created by
    /// [`digest_export_context`][Session::digest_export_context].
    fn digest_import_context(&mut self, ctx: ContextId, blob: &[u8]) -> SssResult<()>;

    /// Creates a random number generator context.
    fn rng_context_init(&mut self) -> SssResult<ContextId>;

    /// Fills `out` with random bytes.
    fn rng_get_random(&mut self, ctx: ContextId, out: &mut [u8]) -> SssResult<()>;

    /// Creates a data tunnel context.
    fn tunnel_context_init(&mut self, kind: TunnelType) -> SssResult<ContextId>;

    /// Passes `data` through the enclave.
    ///
    /// Returns the number of bytes written to `out`.
    fn tunnel(&mut self, ctx: ContextId, data: &[u8], out: &mut [u8]) -> SssResult<usize>;

    /// Releases a context.
    fn context_free(&mut self, ctx: ContextId) -> SssResult<()>;
}
