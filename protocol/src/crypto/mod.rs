//! # Cryptographic Primitives for Veilstream
//!
//! Everything here is a thin, typed wrapper around audited crates:
//!
//! - **Ed25519** (`ed25519-dalek`) for account signatures and input proofs.
//! - **X25519** (`x25519-dalek`) + **AES-256-GCM** (`aes-gcm`) for sealing
//!   disclosed plaintexts to their requester.
//! - **BLAKE3** for handle ids, addresses and key derivation.
//! - **SHA-256** for signed structured-message digests.
//!
//! The homomorphic scheme itself is not in here; see [`crate::fhe`].

pub mod encryption;
pub mod hash;
pub mod keys;
pub mod sealing;

pub use hash::{derive_hash, sha256_parts};
pub use keys::{AccountKeypair, AccountPublicKey, AccountSignature, Address};
pub use sealing::{seal, ReencryptionKeypair, SealedBox};
