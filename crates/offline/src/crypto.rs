//! At-rest protection for queued payloads using ChaCha20-Poly1305 AEAD.
//!
//! Every sealed blob carries a random nonce prepended to the ciphertext:
//! `[nonce (12 bytes)] + [ciphertext + auth tag (16 bytes)]`. The key lives in
//! the store's metadata table and is rotated at logout; blobs sealed under a
//! previous key fail authentication and are treated as unrecoverable.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use thiserror::Error;

/// Nonce size for ChaCha20-Poly1305 (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Symmetric key size (32 bytes).
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}

/// Cipher protecting persisted queue contents.
pub struct QueueCipher {
    cipher: ChaCha20Poly1305,
}

impl QueueCipher {
    /// Create a cipher from a 32-byte symmetric key.
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key from the OS RNG.
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Seal a payload. A fresh nonce is drawn per call, so identical
    /// plaintexts produce different blobs.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Open a sealed blob. Fails on a wrong key, tampering, or truncation.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed(
                "blob too short to contain nonce".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &blob[NONCE_SIZE..])
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let cipher = QueueCipher::new(&QueueCipher::generate_key());
        let blob = cipher.seal(b"adjust stock -3").unwrap();
        assert_eq!(cipher.open(&blob).unwrap(), b"adjust stock -3");
    }

    #[test]
    fn same_plaintext_different_blobs() {
        let cipher = QueueCipher::new(&QueueCipher::generate_key());
        let a = cipher.seal(b"payload").unwrap();
        let b = cipher.seal(b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rotated_key_cannot_open_old_blobs() {
        let old = QueueCipher::new(&QueueCipher::generate_key());
        let new = QueueCipher::new(&QueueCipher::generate_key());
        let blob = old.seal(b"previous session").unwrap();
        assert!(matches!(new.open(&blob), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let cipher = QueueCipher::new(&QueueCipher::generate_key());
        assert!(matches!(
            cipher.open(&[0u8; NONCE_SIZE - 1]),
            Err(CryptoError::Malformed(_))
        ));
    }
}
