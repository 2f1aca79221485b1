//! Authenticated encryption.

use enclave_sscp::{Mode, Session};
use tracing::{debug, instrument, warn};

use crate::{
    alg::Algorithm,
    attributes::{KeyAttributes, KeyLocation},
    cipher::check_symmetric_key,
    compute::{self, AeadArgs},
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    translate::{translate_algorithm, validate_tag_length},
};

/// The largest tag of any supported AEAD.
const MAX_TAG_LEN: usize = 16;

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Translates `alg` and returns the hardware algorithm and
    /// tag length.
    fn aead_alg(
        &self,
        attrs: &KeyAttributes,
        alg: Algorithm,
    ) -> Result<(enclave_sscp::Algorithm, usize)> {
        let Algorithm::Aead { tag_len, .. } = alg else {
            return Err(Error::InvalidArgument("not an AEAD"));
        };
        let hw_alg = translate_algorithm(&self.caps, alg, attrs.key_type)?;
        validate_tag_length(alg, attrs.key_type)?;
        Ok((hw_alg, usize::from(tag_len)))
    }

    /// Checks the key and nonce of an AEAD operation.
    fn check_aead_key(attrs: &KeyAttributes, key: &[u8], nonce: &[u8]) -> Result<()> {
        check_symmetric_key(attrs, key)?;
        if attrs.location == KeyLocation::Local && !matches!(attrs.bits, 128 | 192 | 256) {
            return Err(Error::InvalidArgument("AES key size"));
        }
        if nonce.is_empty() {
            return Err(Error::InvalidArgument("empty nonce"));
        }
        Ok(())
    }

    /// Encrypts and authenticates `plaintext` and authenticates
    /// `aad`.
    ///
    /// The tag is written after the ciphertext. Returns the
    /// number of bytes written to `ciphertext`.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    #[allow(clippy::too_many_arguments)]
    pub fn aead_encrypt(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
        ciphertext: &mut [u8],
    ) -> Result<usize> {
        let (hw_alg, tag_len) = self.aead_alg(attrs, alg)?;
        if plaintext.is_empty() {
            // The enclave cannot process empty messages.
            return Err(Error::NotSupported("empty plaintext"));
        }
        Self::check_aead_key(attrs, key, nonce)?;
        let total = plaintext
            .len()
            .checked_add(tag_len)
            .ok_or(Error::InvalidArgument("plaintext too large"))?;
        let out = ciphertext.get_mut(..total).ok_or(Error::BufferTooSmall)?;
        let (out, tag) = out.split_at_mut(plaintext.len());

        let attrs = attrs.with_alg(alg);
        self.with_hw(|hw| {
            let obj = hw.import_key(&self.caps, &attrs, key)?;
            let args = AeadArgs {
                nonce,
                aad,
                input: plaintext,
            };
            compute::aead(hw, &obj, hw_alg, Mode::Encrypt, args, out, tag).or_generic()
        })
        .inspect_err(|err| debug!(%err, "AEAD encryption failed"))?;
        Ok(total)
    }

    /// Decrypts and authenticates `ciphertext`, which is the
    /// ciphertext followed by the tag, and authenticates `aad`.
    ///
    /// Returns the number of bytes written to `plaintext`.
    ///
    /// Every failure reported by the enclave while opening is
    /// reported as [`Error::InvalidSignature`].
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    #[allow(clippy::too_many_arguments)]
    pub fn aead_decrypt(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<usize> {
        let (hw_alg, tag_len) = self.aead_alg(attrs, alg)?;
        Self::check_aead_key(attrs, key, nonce)?;
        if ciphertext.is_empty() {
            return Err(Error::InvalidArgument("empty ciphertext"));
        }
        let body_len = ciphertext
            .len()
            .checked_sub(tag_len)
            .ok_or(Error::InvalidArgument("ciphertext shorter than tag"))?;
        if body_len == 0 {
            return Err(Error::NotSupported("empty ciphertext"));
        }
        let (body, tag) = ciphertext.split_at(body_len);
        let out = plaintext.get_mut(..body_len).ok_or(Error::BufferTooSmall)?;

        let mut tag_buf = [0u8; MAX_TAG_LEN];
        let tag_buf = tag_buf
            .get_mut(..tag_len)
            .ok_or(Error::InvalidArgument("tag length"))?;
        tag_buf.copy_from_slice(tag);

        let attrs = attrs.with_alg(alg);
        let res = self.with_hw(|hw| {
            let obj = hw.import_key(&self.caps, &attrs, key)?;
            let args = AeadArgs {
                nonce,
                aad,
                input: body,
            };
            compute::aead(hw, &obj, hw_alg, Mode::Decrypt, args, &mut *out, tag_buf)
                .or_invalid_signature()
        });
        if let Err(err) = res {
            warn!(%err, "AEAD decryption failed");
            out.fill(0);
            return Err(err);
        }
        Ok(body_len)
    }
}
