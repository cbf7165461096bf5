// Copyright (c) 2026 Veilstream Contributors. MIT License.
// See LICENSE for details.

//! # Veilstream Protocol: Core Library
//!
//! Veilstream is a confidential token with continuous payment streams.
//! Balances are ciphertexts; transfers and stream settlements are computed
//! homomorphically; plaintexts are revealed only to parties that hold an
//! explicit, per-ciphertext grant.
//!
//! This crate holds everything the contracts and the node share. None of it
//! knows what a token or a stream is.
//!
//! ## Architecture
//!
//! - **config**: protocol constants and the deploy-time `TokenConfig`.
//! - **crypto**: Ed25519 accounts and addresses, hashing, sealed boxes.
//! - **fhe**: ciphertext handles and the homomorphic backend seam, plus the
//!   cleartext coprocessor used by dev nodes and tests.
//! - **acl**: per-handle disclosure grants.
//! - **gateway**: signed disclosure requests and the decryption oracle.
//!
//! ## Ground rules
//!
//! 1. Plaintext amounts never appear in logs, events or errors.
//! 2. Every handle a contract hands out has a grant before the call returns.
//! 3. Disclosure checks grants before it checks anything else.

pub mod acl;
pub mod config;
pub mod crypto;
pub mod fhe;
pub mod gateway;

pub use acl::AccessControlRegistry;
pub use crypto::Address;
pub use fhe::{EncryptedInput, FheBackend, Handle, HandleId};
