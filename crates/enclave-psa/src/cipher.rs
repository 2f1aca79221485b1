//! Unauthenticated ciphers.

use enclave_sscp::{Mode, Session};
use tracing::{debug, instrument};

use crate::{
    alg::{Algorithm, CipherAlg},
    attributes::{KeyAttributes, KeyLocation},
    compute,
    driver::Driver,
    error::{Error, Result, StatusExt},
    guard::LockHook,
    translate::translate_algorithm,
};

/// The AES block size.
const BLOCK_SIZE: usize = 16;

/// Checks the key buffer of a symmetric key.
pub(crate) fn check_symmetric_key(attrs: &KeyAttributes, key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("empty key"));
    }
    if attrs.location == KeyLocation::Local && Some(attrs.bits) != key.len().checked_mul(8) {
        return Err(Error::InvalidArgument("key size does not match key buffer"));
    }
    Ok(())
}

impl<S: Session, L: LockHook> Driver<S, L> {
    /// Encrypts `input` with `iv` into `output`.
    ///
    /// Returns the number of bytes written to `output`, which is
    /// always the length of `input`.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn cipher_encrypt(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        self.cipher(attrs, key, alg, Mode::Encrypt, iv, input, output)
    }

    /// Decrypts `input`, which is the IV followed by the
    /// ciphertext, into `output`.
    ///
    /// Returns the number of bytes written to `output`, which is
    /// always the length of the ciphertext.
    #[instrument(skip_all, fields(alg = ?alg, location = ?attrs.location))]
    pub fn cipher_decrypt(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let Algorithm::Cipher(mode) = alg else {
            return Err(Error::InvalidArgument("not a cipher"));
        };
        let (iv, ciphertext) = input
            .split_at_checked(mode.iv_len())
            .ok_or(Error::InvalidArgument("input shorter than IV"))?;
        self.cipher(attrs, key, alg, Mode::Decrypt, iv, ciphertext, output)
    }

    #[allow(clippy::too_many_arguments)]
    fn cipher(
        &self,
        attrs: &KeyAttributes,
        key: &[u8],
        alg: Algorithm,
        mode: Mode,
        iv: &[u8],
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        check_symmetric_key(attrs, key)?;
        let Algorithm::Cipher(cipher) = alg else {
            return Err(Error::InvalidArgument("not a cipher"));
        };
        let hw_alg = translate_algorithm(&self.caps, alg, attrs.key_type)?;

        if iv.len() != cipher.iv_len() {
            return Err(Error::InvalidArgument("IV length"));
        }
        if input.is_empty() {
            if cipher == CipherAlg::EcbNoPadding {
                return Ok(0);
            }
            return Err(Error::InvalidArgument("empty input"));
        }
        let output = output
            .get_mut(..input.len())
            .ok_or(Error::BufferTooSmall)?;
        if cipher.is_block_mode() && input.len() % BLOCK_SIZE != 0 {
            return Err(Error::InvalidArgument("input is not a multiple of the block size"));
        }

        let attrs = attrs.with_alg(alg);
        self.with_hw(|hw| {
            let obj = hw.import_key(&self.caps, &attrs, key)?;
            compute::cipher(hw, &obj, hw_alg, mode, iv, input, output).or_generic()
        })
        .inspect_err(|err| debug!(%err, "cipher failed"))?;
        Ok(input.len())
    }
}
