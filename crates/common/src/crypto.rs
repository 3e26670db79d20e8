//! Envelope encryption for operator secrets.
//!
//! Keystores and their unlock passwords are sealed with AES-256-GCM under
//! a server-held key derived from the configured passphrase. Each sealed
//! blob carries its own random nonce, so entries can be opened
//! independently and out of order. Blob layout: `nonce (12 bytes) || ciphertext`,
//! encoded as a single base64 string for storage.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("cipher initialization failed")]
    KeyInit,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or corrupted blob)")]
    Decrypt,
    #[error("invalid sealed blob: {0}")]
    Decode(String),
}

/// Derive a 32-byte cipher key from an operator passphrase.
pub fn derive_key(passphrase: &str) -> [u8; 32] {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// A self-describing ciphertext: the nonce used to seal it travels with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Encode as a single base64 string (`nonce || ciphertext`).
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.ciphertext);
        B64.encode(raw)
    }

    /// Decode a blob previously produced by [`SealedBlob::encode`].
    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let raw = B64
            .decode(encoded)
            .map_err(|e| CryptoError::Decode(format!("invalid base64: {}", e)))?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::Decode(format!(
                "blob too short: {} bytes, need at least {}",
                raw.len(),
                NONCE_LEN,
            )));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(SealedBlob {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Seal plaintext under `key` with a fresh random nonce.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<SealedBlob, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyInit)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(SealedBlob { nonce, ciphertext })
}

/// Open a blob produced by [`seal`].
pub fn open(key: &[u8; 32], blob: &SealedBlob) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyInit)?;
    cipher
        .decrypt(Nonce::from_slice(&blob.nonce), blob.ciphertext.as_slice())
        .map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = derive_key("correct horse battery staple");
        let plaintext = b"{\"crypto\":{\"kdf\":\"scrypt\"}}";
        let blob = seal(&key, plaintext).expect("seal");
        let opened = open(&key, &blob).expect("open");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = derive_key("k");
        let blob = seal(&key, b"secret").expect("seal");
        let encoded = blob.encode();
        let decoded = SealedBlob::decode(&encoded).expect("decode");
        assert_eq!(decoded, blob);
        assert_eq!(open(&key, &decoded).expect("open"), b"secret");
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = seal(&derive_key("a"), b"secret").expect("seal");
        let err = open(&derive_key("b"), &blob);
        assert!(matches!(err, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_nonces_are_unique_per_seal() {
        let key = derive_key("k");
        let a = seal(&key, b"same plaintext").expect("seal");
        let b = seal(&key, b"same plaintext").expect("seal");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SealedBlob::decode("not base64 !!!").is_err());
        // valid base64 but shorter than a nonce
        assert!(SealedBlob::decode(&B64.encode([0u8; 4])).is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        assert_eq!(derive_key("x"), derive_key("x"));
        assert_ne!(derive_key("x"), derive_key("y"));
    }
}
