//! # AES-256-GCM Encryption
//!
//! Authenticated encryption used to seal disclosed plaintexts to their
//! requester (see [`super::sealing`]). Only the AAD variants exist: every
//! sealed value is bound to the handle and requester it was produced for.
//!
//! Nonces are random 96-bit values from the OS RNG. Every seal uses a fresh
//! ephemeral key as well, so nonce reuse under one key cannot happen.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur during encryption/decryption. Vague on purpose.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("unexpected plaintext length: expected {expected} bytes, got {actual}")]
    UnexpectedLength { expected: usize, actual: usize },
}

/// Encrypt `plaintext` under `key`, authenticating `aad`.
///
/// Returns `(nonce, ciphertext || tag)`.
///
/// ```
/// use veilstream_protocol::crypto::encryption::{encrypt_with_aad, decrypt_with_aad};
///
/// let key = [0x42u8; 32];
/// let (nonce, ct) = encrypt_with_aad(&key, b"1337", b"handle").unwrap();
/// assert_eq!(decrypt_with_aad(&key, &nonce, &ct, b"handle").unwrap(), b"1337");
/// ```
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt a ciphertext produced by [`encrypt_with_aad`]. The AAD must match.
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    let nonce = Nonce::from_slice(nonce);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AES_TAG_LENGTH;

    #[test]
    fn test_roundtrip_with_aad() {
        let key = [7u8; AES_KEY_LENGTH];
        let (nonce, ct) = encrypt_with_aad(&key, b"8663", b"aad").unwrap();
        assert_eq!(ct.len(), 4 + AES_TAG_LENGTH);
        assert_eq!(decrypt_with_aad(&key, &nonce, &ct, b"aad").unwrap(), b"8663");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [7u8; AES_KEY_LENGTH];
        let (nonce, ct) = encrypt_with_aad(&key, b"secret", b"alice").unwrap();
        assert!(decrypt_with_aad(&key, &nonce, &ct, b"bob").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let (nonce, ct) = encrypt_with_aad(&[1u8; AES_KEY_LENGTH], b"secret", b"").unwrap();
        assert!(decrypt_with_aad(&[2u8; AES_KEY_LENGTH], &nonce, &ct, b"").is_err());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = [9u8; AES_KEY_LENGTH];
        let (n1, _) = encrypt_with_aad(&key, b"x", b"").unwrap();
        let (n2, _) = encrypt_with_aad(&key, b"x", b"").unwrap();
        assert_ne!(n1, n2);
    }
}
