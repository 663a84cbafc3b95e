//! Reversible transforms applied to the compressed bytecode block
//!
//! The contract is `decrypt(encrypt(x)) == x`; either direction may change
//! the length of the data. A block that fails to decrypt is rejected with
//! [`CodecError::CipherRejected`].

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use super::{CodecError, CodecResult};

/// Pluggable transform over the compressed block.
pub trait BytecodeCipher: Send + Sync + fmt::Debug {
    /// Transform compressed bytes before they are written to an artifact.
    fn encrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>>;

    /// Undo [`BytecodeCipher::encrypt`].
    fn decrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>>;
}

impl<T: BytecodeCipher + ?Sized> BytecodeCipher for Arc<T> {
    fn encrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        (**self).encrypt(data)
    }

    fn decrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        (**self).decrypt(data)
    }
}

impl<T: BytecodeCipher + ?Sized> BytecodeCipher for &T {
    fn encrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        (**self).encrypt(data)
    }

    fn decrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        (**self).decrypt(data)
    }
}

/// Leaves the block untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl BytecodeCipher for PassthroughCipher {
    fn encrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        Ok(data)
    }

    fn decrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        Ok(data)
    }
}

/// Key used when nothing else is configured.
pub const DEFAULT_KEY: &[u8] = b"launchpack/bytecode";

/// AES-GCM nonce size.
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM over the compressed block.
///
/// The 256-bit key is the SHA-256 digest of the configured key bytes. A
/// random nonce is stored in front of the ciphertext, and the ciphertext
/// carries a 16-byte tag, so the output is `NONCE_LEN + 16` bytes longer
/// than the input.
#[derive(Clone)]
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    pub fn new(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest)),
        }
    }
}

impl Default for AeadCipher {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}

impl fmt::Debug for AeadCipher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("AeadCipher").finish_non_exhaustive()
    }
}

impl BytecodeCipher for AeadCipher {
    fn encrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(nonce, data.as_slice())
            .map_err(|e| CodecError::CipherRejected(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(sealed);
        Ok(out)
    }

    fn decrypt(
        &self,
        data: Vec<u8>,
    ) -> CodecResult<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(CodecError::CipherRejected(format!(
                "block of {} bytes is shorter than its {}-byte nonce",
                data.len(),
                NONCE_LEN
            )));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CodecError::CipherRejected("wrong key or corrupted block".to_string()))
    }
}
