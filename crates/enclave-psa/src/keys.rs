//! Transient hardware key objects.
//!
//! Every key object created through a [`HwScope`] is destroyed
//! when the scope ends, whether the operation succeeded or not.

use enclave_sscp::{
    BlobType, CipherType, FreeMode, KeyLen, KeyPart, KeyProperties, ObjectId, Session,
    blob::BLOB_OVERHEAD,
};
use tracing::{error, trace};

use crate::{
    alg::Algorithm,
    attributes::{KeyAttributes, KeyLocation, KeyType},
    caps::Capabilities,
    error::{Error, Result, StatusExt},
    opaque::validate_blob_attributes,
    translate::{symmetric_cipher_type, translate_cipher_type},
    util::UNCOMPRESSED_POINT,
};

/// The most key objects a single operation needs at once.
const MAX_OBJECTS: usize = 4;

/// Slack the enclave needs on top of the raw size of an
/// elliptic curve key.
pub(crate) const ECC_ALLOC_SLACK: usize = 6;

/// A key object owned by a [`HwScope`].
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct KeyObject(ObjectId);

impl KeyObject {
    /// Refers to a key object owned by someone else, such as a
    /// multi-part operation. No scope deletes it.
    pub fn borrowed(id: ObjectId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> ObjectId {
        self.0
    }
}

/// How a key object is laid out.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ObjectSpec {
    pub key_id: u32,
    pub part: KeyPart,
    pub cipher: CipherType,
    pub props: KeyProperties,
    pub size: usize,
}

/// Exclusive use of the session for the duration of one
/// operation.
pub(crate) struct HwScope<'a, S: Session> {
    session: &'a mut S,
    objects: heapless::Vec<ObjectId, MAX_OBJECTS>,
}

impl<'a, S: Session> HwScope<'a, S> {
    pub fn new(session: &'a mut S) -> Self {
        Self {
            session,
            objects: heapless::Vec::new(),
        }
    }

    pub fn session(&mut self) -> &mut S {
        self.session
    }

    /// Creates an empty key object.
    pub fn create_object(&mut self, spec: ObjectSpec) -> Result<KeyObject> {
        let obj = self.session.key_object_init().or_hw()?;
        trace!(%obj, ?spec, "created key object");
        if self.objects.push(obj).is_err() {
            let _ = self.session.key_object_free(obj, FreeMode::Defragment);
            buggy::bug!("too many key objects");
        }
        self.session
            .key_object_allocate_handle(
                obj,
                spec.key_id,
                spec.part,
                spec.cipher,
                spec.size,
                spec.props,
            )
            .or_hw()?;
        Ok(KeyObject(obj))
    }

    /// Creates a key object holding `data`.
    pub fn set_key(&mut self, spec: ObjectSpec, data: &[u8], bits: usize) -> Result<KeyObject> {
        let obj = self.create_object(spec)?;
        self.session
            .key_store_set_key(obj.id(), data, bits, spec.part)
            .or_hw()?;
        Ok(obj)
    }

    /// Reads key material out of `obj`.
    pub fn get_key(&mut self, obj: &KeyObject, part: KeyPart, out: &mut [u8]) -> Result<KeyLen> {
        self.session.key_store_get_key(obj.id(), part, out).or_hw()
    }

    /// Creates a key object holding the material wrapped in
    /// `blob`.
    pub fn import_blob(
        &mut self,
        spec: ObjectSpec,
        blob_type: BlobType,
        blob: &[u8],
    ) -> Result<KeyObject> {
        let obj = self.create_object(spec)?;
        self.session
            .key_store_import_key(obj.id(), blob_type, blob)
            .or_hw()?;
        Ok(obj)
    }

    /// Binds the caller's key to a fresh key object.
    ///
    /// Local keys are written in plaintext. Opaque keys are
    /// checked against their attributes, then unwrapped by the
    /// enclave.
    pub fn import_key(
        &mut self,
        caps: &Capabilities,
        attrs: &KeyAttributes,
        key_buffer: &[u8],
    ) -> Result<KeyObject> {
        let (part, cipher) = layout(caps, attrs)?;
        let props = properties_for(attrs.alg);
        match attrs.location {
            KeyLocation::Local => {
                let (data, size) = match attrs.key_type {
                    KeyType::EccPublicKey(family) if family.is_weierstrass() => {
                        let point = key_buffer
                            .strip_prefix(&[UNCOMPRESSED_POINT])
                            .ok_or(Error::InvalidArgument("public key format"))?;
                        (point, point.len().saturating_add(ECC_ALLOC_SLACK))
                    }
                    KeyType::EccKeyPair(_) | KeyType::EccPublicKey(_) => {
                        (key_buffer, key_buffer.len().saturating_add(ECC_ALLOC_SLACK))
                    }
                    _ => (key_buffer, key_buffer.len()),
                };
                let spec = ObjectSpec {
                    key_id: attrs.id,
                    part,
                    cipher,
                    props,
                    size,
                };
                self.set_key(spec, data, attrs.bits)
            }
            KeyLocation::Gateway | KeyLocation::DieUnique => {
                validate_blob_attributes(caps, attrs, key_buffer)?;
                let spec = ObjectSpec {
                    key_id: attrs.id,
                    part,
                    cipher,
                    props,
                    size: key_buffer.len().saturating_sub(BLOB_OVERHEAD),
                };
                let blob_type = if attrs.location == KeyLocation::Gateway {
                    BlobType::Gateway
                } else {
                    BlobType::DieUnique
                };
                self.import_blob(spec, blob_type, key_buffer)
            }
            KeyLocation::Data => Err(Error::NotSupported("data is not a key")),
            KeyLocation::Other(_) => Err(Error::InvalidArgument("key location")),
        }
    }

    /// Generates key material inside `obj`.
    pub fn generate(&mut self, obj: &KeyObject, bits: usize) -> Result<()> {
        self.session
            .key_store_generate_key(obj.id(), bits)
            .or_hw()
    }

    /// Wraps `obj` into a blob.
    pub fn export_blob(
        &mut self,
        obj: &KeyObject,
        blob_type: BlobType,
        out: &mut [u8],
    ) -> Result<usize> {
        self.session
            .key_store_export_key(obj.id(), blob_type, out)
            .or_hw()
    }

    /// Destroys `obj` now instead of when the scope ends.
    pub fn delete_key(&mut self, obj: KeyObject) -> Result<()> {
        let Some(pos) = self.objects.iter().position(|&id| id == obj.id()) else {
            buggy::bug!("key object not owned by this scope");
        };
        self.objects.remove(pos);
        delete_key(self.session, obj.id())
    }

    /// Releases ownership of `obj` to the caller, who becomes
    /// responsible for deleting it.
    pub fn detach(&mut self, obj: KeyObject) -> Result<ObjectId> {
        let Some(pos) = self.objects.iter().position(|&id| id == obj.id()) else {
            buggy::bug!("key object not owned by this scope");
        };
        self.objects.remove(pos);
        Ok(obj.id())
    }

    /// Takes ownership of a key object detached by an earlier
    /// scope.
    pub fn adopt(&mut self, id: ObjectId) -> Result<KeyObject> {
        if self.objects.push(id).is_err() {
            buggy::bug!("too many key objects");
        }
        Ok(KeyObject(id))
    }
}

impl<S: Session> Drop for HwScope<'_, S> {
    fn drop(&mut self) {
        while let Some(obj) = self.objects.pop() {
            // The caller never saw this object, so there is
            // nothing they could do about a failure.
            let _ = delete_key(self.session, obj);
        }
    }
}

/// Erases `obj` and releases it, defragmenting the keystore.
fn delete_key<S: Session>(session: &mut S, obj: ObjectId) -> Result<()> {
    let erased = session.key_store_erase_key(obj);
    let freed = session.key_object_free(obj, FreeMode::Defragment);
    trace!(%obj, "deleted key object");
    if erased.is_err() || freed.is_err() {
        error!(target: "enclave_psa::keys", %obj, ?erased, ?freed, "unable to delete key object");
        return Err(Error::HardwareFailure);
    }
    Ok(())
}

/// Returns the key part and cipher type of the key described
/// by `attrs`.
pub(crate) fn layout(caps: &Capabilities, attrs: &KeyAttributes) -> Result<(KeyPart, CipherType)> {
    match attrs.key_type {
        KeyType::EccKeyPair(_) => {
            // Local key pairs are only the private scalar.
            let part = if attrs.location == KeyLocation::Local {
                KeyPart::Private
            } else {
                KeyPart::Pair
            };
            Ok((part, translate_cipher_type(caps, attrs)?))
        }
        KeyType::EccPublicKey(_) => Ok((KeyPart::Public, translate_cipher_type(caps, attrs)?)),
        key_type => Ok((KeyPart::Default, symmetric_cipher_type(key_type)?)),
    }
}

/// Returns the key object properties needed to use a key with
/// `alg`.
pub(crate) fn properties_for(alg: Algorithm) -> KeyProperties {
    match alg {
        Algorithm::Cipher(_) => KeyProperties::CRYPTO_AES,
        Algorithm::Aead { .. } => KeyProperties::CRYPTO_AEAD,
        Algorithm::Mac { .. } => KeyProperties::CRYPTO_MAC,
        Algorithm::Sign(_) => KeyProperties::CRYPTO_ASYM_SIGN_VERIFY,
        Algorithm::KeyAgreement(_) => KeyProperties::CRYPTO_KDF,
        Algorithm::None | Algorithm::Hash(_) => KeyProperties::NONE,
    }
}
