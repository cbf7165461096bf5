//! # Sealed Disclosures
//!
//! When the decryption oracle discloses a plaintext to one account, it does
//! not hand the value over in the clear. It seals it to a static X25519 key
//! the requester named in their signed request:
//!
//! ```text
//! eph            = fresh X25519 secret
//! shared         = X25519(eph, requester_pub)
//! key            = BLAKE3-derive-key(ctx, shared || eph_pub || requester_pub)
//! (nonce, ct)    = AES-256-GCM(key, plaintext, aad)
//! ```
//!
//! Only the holder of the matching [`ReencryptionKeypair`] can open the box.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::encryption::{decrypt_with_aad, encrypt_with_aad, EncryptionError};
use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, REENCRYPTION_KDF_CONTEXT, REENCRYPTION_KEY_LENGTH};

/// A plaintext sealed to one X25519 public key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    pub ephemeral_public_key: [u8; REENCRYPTION_KEY_LENGTH],
    pub nonce: [u8; AES_NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for SealedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedBox")
            .field("ephemeral_public_key", &hex::encode(&self.ephemeral_public_key[..8]))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Seal `plaintext` to `recipient`, binding `aad`.
pub fn seal(
    recipient: &[u8; REENCRYPTION_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedBox, EncryptionError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));

    let key = derive_seal_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient);
    let (nonce, ciphertext) = encrypt_with_aad(&key, plaintext, aad)?;

    Ok(SealedBox {
        ephemeral_public_key: ephemeral_public.to_bytes(),
        nonce,
        ciphertext,
    })
}

fn derive_seal_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; REENCRYPTION_KEY_LENGTH],
    recipient: &[u8; REENCRYPTION_KEY_LENGTH],
) -> [u8; AES_KEY_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(REENCRYPTION_KDF_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral_public);
    hasher.update(recipient);
    *hasher.finalize().as_bytes()
}

/// The requester-side key that sealed disclosures are addressed to.
///
/// Typically generated per session by a wallet and thrown away afterwards.
pub struct ReencryptionKeypair {
    secret: StaticSecret,
}

impl ReencryptionKeypair {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// The public key to put into a reencryption request.
    pub fn public_key_bytes(&self) -> [u8; REENCRYPTION_KEY_LENGTH] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Open a box sealed to this key.
    pub fn open(&self, sealed: &SealedBox, aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(sealed.ephemeral_public_key));
        let key = derive_seal_key(
            shared.as_bytes(),
            &sealed.ephemeral_public_key,
            &self.public_key_bytes(),
        );
        decrypt_with_aad(&key, &sealed.nonce, &sealed.ciphertext, aad)
    }
}

impl fmt::Debug for ReencryptionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReencryptionKeypair(pub={})",
            hex::encode(&self.public_key_bytes()[..8])
        )
    }
}
