//! # Account Keys & Addresses
//!
//! Ed25519 keypairs identify every Veilstream account. The on-ledger
//! identity is not the key itself but a 20-byte [`Address`] derived from it,
//! which is what balances, streams and access grants are keyed by.
//!
//! Key bytes are never logged. Addresses are public and logged freely.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    ADDRESS_LENGTH, CONTRACT_ADDRESS_CONTEXT, SIGNATURE_LENGTH, SIGNING_KEY_LENGTH,
    VERIFYING_KEY_LENGTH,
};

/// Errors that can occur during key and address handling.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account or contract address.
///
/// Accounts derive theirs from the last 20 bytes of BLAKE3(public key).
/// Contracts derive theirs from the deployer and a deployment nonce.
/// Rendered as `0x`-prefixed lowercase hex in logs, JSON and URLs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Wrap raw address bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The address controlled by `public_key`.
    pub fn from_public_key(public_key: &AccountPublicKey) -> Self {
        let digest = blake3::hash(public_key.as_bytes());
        Self::from_digest_tail(digest.as_bytes())
    }

    /// Deterministic address of the `nonce`-th contract deployed by `deployer`.
    pub fn derive_contract(deployer: &Address, nonce: u64) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(CONTRACT_ADDRESS_CONTEXT);
        hasher.update(deployer.as_bytes());
        hasher.update(&nonce.to_be_bytes());
        Self::from_digest_tail(hasher.finalize().as_bytes())
    }

    fn from_digest_tail(digest: &[u8; 32]) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|_| KeyError::InvalidAddress(s.to_string()))?;
        let arr: [u8; ADDRESS_LENGTH] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidAddress(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// AccountKeypair
// ---------------------------------------------------------------------------

/// An account keypair wrapping an Ed25519 signing key.
///
/// Deliberately not `Serialize`: exporting secret material goes through
/// [`secret_key_bytes`](Self::secret_key_bytes) and nothing else.
///
/// # Examples
///
/// ```
/// use veilstream_protocol::crypto::keys::AccountKeypair;
///
/// let kp = AccountKeypair::generate();
/// let sig = kp.sign(b"start stream to bob");
/// assert!(kp.public_key().verify(b"start stream to bob", &sig));
/// ```
pub struct AccountKeypair {
    signing_key: SigningKey,
}

impl AccountKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a keypair from a 32-byte seed. Handy for deterministic test
    /// accounts; use [`generate`](Self::generate) for anything real.
    pub fn from_seed(seed: &[u8; SIGNING_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded 32-byte secret.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SIGNING_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> AccountPublicKey {
        AccountPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// The address this keypair controls.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> AccountSignature {
        AccountSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Raw secret key material. Don't log it.
    pub fn secret_key_bytes(&self) -> [u8; SIGNING_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl Clone for AccountKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for AccountKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKeypair(address={})", self.address())
    }
}

// ---------------------------------------------------------------------------
// AccountPublicKey
// ---------------------------------------------------------------------------

/// The public half of an account keypair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountPublicKey {
    bytes: [u8; VERIFYING_KEY_LENGTH],
}

impl AccountPublicKey {
    /// Parse and validate raw key bytes. Rejects bytes that are not a
    /// valid Ed25519 point.
    pub fn from_bytes(bytes: [u8; VERIFYING_KEY_LENGTH]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.bytes
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }

    /// `true` iff `signature` is a valid signature of `message` by this key.
    pub fn verify(&self, message: &[u8], signature: &AccountSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(dalek_sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for AccountPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// AccountSignature
// ---------------------------------------------------------------------------

/// An Ed25519 signature. Stored as a `Vec<u8>` so it survives JSON; a
/// signature of the wrong length simply fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSignature {
    bytes: Vec<u8>,
}

impl AccountSignature {
    /// Wrap raw bytes. Length is checked at verification time.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; SIGNATURE_LENGTH] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }
}

impl fmt::Debug for AccountSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = hex::encode(&self.bytes);
        if hex_str.len() >= 16 {
            write!(f, "AccountSignature({}...)", &hex_str[..16])
        } else {
            write!(f, "AccountSignature({})", hex_str)
        }
    }
}
