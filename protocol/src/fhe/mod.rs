//! # Encrypted Values
//!
//! Veilstream never sees a plaintext amount on the critical path. Balances,
//! allowances and stream settlements are [`Handle`]s: opaque references to
//! ciphertexts that live inside a homomorphic coprocessor. The contracts
//! manipulate them only through the [`FheBackend`] trait, which is injected
//! at construction time.
//!
//! ## Trust boundaries
//!
//! ```text
//!   client ── EncryptedInput{handle, proof} ──► contract ── verify_input ──► backend
//!                                                  │
//!                                                  └── add / sub_clamped / min / ... ──► fresh Handle
//!
//!   oracle ── Decryptor::decrypt ──► plaintext (only after an ACL-checked request)
//! ```
//!
//! [`FheBackend`] and [`Decryptor`] are split on purpose: the contracts get
//! arithmetic but cannot decrypt; only the decryption oracle holds a
//! [`Decryptor`].
//!
//! The bundled [`cleartext::CleartextCoprocessor`] implements both for
//! development nodes and tests.

pub mod cleartext;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::HANDLE_LENGTH;
use crate::crypto::Address;

pub use cleartext::CleartextCoprocessor;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Identifier of one ciphertext inside the coprocessor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId([u8; HANDLE_LENGTH]);

impl HandleId {
    pub const fn from_bytes(bytes: [u8; HANDLE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HANDLE_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({}..)", &self.to_hex()[..18])
    }
}

impl FromStr for HandleId {
    type Err = FheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|_| FheError::Backend(format!("malformed handle id: {s}")))?;
        let arr: [u8; HANDLE_LENGTH] = bytes
            .try_into()
            .map_err(|_| FheError::Backend(format!("handle id must be {HANDLE_LENGTH} bytes")))?;
        Ok(Self(arr))
    }
}

impl Serialize for HandleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HandleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Plaintext type carried by a ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FheType {
    Bool,
    Uint64,
}

impl fmt::Display for FheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FheType::Bool => write!(f, "ebool"),
            FheType::Uint64 => write!(f, "euint64"),
        }
    }
}

/// A reference to an encrypted value plus its scheme metadata.
///
/// Handles are immutable. Every homomorphic operation returns a new one;
/// nothing ever rewrites the ciphertext behind an existing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub id: HandleId,
    pub fhe_type: FheType,
    pub scheme_version: u8,
}

// ---------------------------------------------------------------------------
// Encrypted inputs
// ---------------------------------------------------------------------------

/// Opaque proof that an input ciphertext is well formed and was produced
/// for a specific contract and user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputProof(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl fmt::Debug for InputProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputProof({} bytes)", self.0.len())
    }
}

/// A client-supplied ciphertext together with its proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handle: Handle,
    pub proof: InputProof,
}

/// Who an encrypted input was produced for. A proof only verifies for the
/// exact pair it was bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    pub contract: Address,
    pub user: Address,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Backend traits
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FheError {
    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(HandleId),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: FheType, found: FheType },

    #[error("input proof rejected")]
    InvalidProof,

    #[error("coprocessor error: {0}")]
    Backend(String),
}

/// Homomorphic arithmetic over [`Handle`]s.
///
/// Implementations must return a fresh, unique handle from every operation
/// and must never fail on arithmetic overflow. Subtraction clamps at zero;
/// addition and scalar multiplication wrap (the contracts guard the
/// plaintext supply so that balances can never reach the wrap point).
pub trait FheBackend: Send + Sync {
    /// Check an input's proof against `binding` and return its handle.
    fn verify_input(&self, input: &EncryptedInput, binding: &InputBinding)
        -> Result<Handle, FheError>;

    /// Encrypt a public constant.
    fn trivial_encrypt(&self, value: u64) -> Result<Handle, FheError>;

    fn add(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError>;

    /// `max(lhs - rhs, 0)`.
    fn sub_clamped(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError>;

    fn mul_scalar(&self, lhs: &Handle, scalar: u64) -> Result<Handle, FheError>;

    fn min(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError>;

    /// Encrypted `lhs <= rhs`, as an [`FheType::Bool`] handle.
    fn le(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError>;
}

/// Threshold-decryption capability. Held by the decryption oracle only.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, handle: &Handle) -> Result<u64, FheError>;
}
