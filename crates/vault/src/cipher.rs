//! AES-256-GCM encrypt/decrypt primitives: a fresh random 12-byte nonce per
//! call, prepended to the ciphertext for storage.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use shared::error::CommonError;

const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under `key`, returning `nonce || ciphertext`.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CommonError> {
    let cipher_key = aes_gcm::Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(cipher_key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CommonError::Internal {
            source: anyhow::anyhow!("AES-GCM encryption failed: {e}"),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob previously produced by [`encrypt`]. AEAD tag mismatch
/// (tampering, wrong key) surfaces as [`CommonError::InvalidCredentials`]
/// since that's how both call sites (credential read, rotation rollback
/// check) need to react to it.
pub fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, CommonError> {
    if blob.len() < NONCE_LEN {
        return Err(CommonError::InvalidCredentials {
            msg: "encrypted credential blob is truncated".to_string(),
        });
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher_key = aes_gcm::Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(cipher_key);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CommonError::InvalidCredentials {
            msg: "credential decryption failed, key or ciphertext mismatch".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_plaintext() {
        let key = [3u8; 32];
        let plaintext = b"super-secret-api-token";
        let blob = encrypt(&key, plaintext).unwrap();
        assert_eq!(decrypt(&key, &blob).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let blob = encrypt(&[1u8; 32], b"hello").unwrap();
        assert!(decrypt(&[2u8; 32], &blob).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let mut blob = encrypt(&[9u8; 32], b"hello").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(decrypt(&[9u8; 32], &blob).is_err());
    }

    #[test]
    fn truncated_blob_fails_cleanly() {
        assert!(decrypt(&[9u8; 32], b"short").is_err());
    }
}
