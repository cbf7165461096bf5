//! # Protocol Configuration & Constants
//!
//! Every magic number in Veilstream lives here, next to the deploy-time
//! [`TokenConfig`] that a node reads from disk. If you find yourself typing
//! a literal `32` or `1` somewhere else, it probably belongs in this file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version byte stamped into every ciphertext handle. Bump it when the
/// handle derivation or the coprocessor scheme changes.
pub const HANDLE_SCHEME_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ciphertext handle id length in bytes.
pub const HANDLE_LENGTH: usize = 32;

/// Account and contract address length in bytes (the tail of a BLAKE3 digest).
pub const ADDRESS_LENGTH: usize = 20;

/// Ed25519 signing key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 verifying key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// X25519 public key length used for reencryption targets.
pub const REENCRYPTION_KEY_LENGTH: usize = 32;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve, not sixteen.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// BLAKE3 `derive_key` context for handle ids.
pub const HANDLE_DERIVATION_CONTEXT: &str = "veilstream v1 ciphertext handle";

/// BLAKE3 `derive_key` context for contract addresses.
pub const CONTRACT_ADDRESS_CONTEXT: &str = "veilstream v1 contract address";

/// BLAKE3 `derive_key` context for the reencryption session key.
pub const REENCRYPTION_KDF_CONTEXT: &str = "veilstream v1 reencryption session key";

/// Domain tag prefixed to every encrypted-input proof message.
pub const INPUT_PROOF_DOMAIN: &[u8] = b"veilstream/input-proof/v1";

/// Structured-signature domain name for reencryption authorizations.
pub const REENCRYPT_DOMAIN_NAME: &str = "Authorization token";

/// Structured-signature domain version for reencryption authorizations.
pub const REENCRYPT_DOMAIN_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Token Defaults
// ---------------------------------------------------------------------------

/// Default token name.
pub const DEFAULT_TOKEN_NAME: &str = "Confidential Stream Token";

/// Default ticker symbol.
pub const DEFAULT_TOKEN_SYMBOL: &str = "CST";

/// Default decimals. Balances are whole units in the encrypted domain.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// Default chain id bound into reencryption signatures.
pub const DEFAULT_CHAIN_ID: u64 = 9000;

/// Tokens accrued per second on a stream unless configured otherwise.
pub const DEFAULT_RATE_PER_SECOND: u64 = 1;

/// Maximum number of decryption jobs the local oracle will hold.
pub const DEFAULT_ORACLE_QUEUE_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Block time of the development node. Stream accrual is per second, so
/// one block advances the clock by this many seconds.
pub const BLOCK_TIME: Duration = Duration::from_secs(1);

/// Block time in whole seconds, for timestamp arithmetic.
/// Keep this in sync with BLOCK_TIME.
pub const BLOCK_TIME_SECS: u64 = 1;

/// How often the node drains the decryption oracle queue.
pub const ORACLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Deploy-time configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`TokenConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// How streams accrue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamPolicy {
    /// Plaintext, public rate shared by every stream of the contract.
    pub rate_per_second: u64,
    /// Optional lifetime cap. `None` means streams run until cancelled.
    pub max_duration_secs: Option<u64>,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            rate_per_second: DEFAULT_RATE_PER_SECOND,
            max_duration_secs: None,
        }
    }
}

/// Everything a node needs to deploy one confidential stream token.
///
/// Every field has a default, so `{}` is a valid config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Chain id bound into reencryption authorizations.
    pub chain_id: u64,
    pub stream: StreamPolicy,
    /// Bound on queued decryption jobs before the oracle pushes back.
    pub oracle_queue_capacity: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_TOKEN_NAME.to_string(),
            symbol: DEFAULT_TOKEN_SYMBOL.to_string(),
            decimals: DEFAULT_TOKEN_DECIMALS,
            chain_id: DEFAULT_CHAIN_ID,
            stream: StreamPolicy::default(),
            oracle_queue_capacity: DEFAULT_ORACLE_QUEUE_CAPACITY,
        }
    }
}

impl TokenConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TokenConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Pretty-printed JSON, as written by `veilstream-node init`.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects configurations that would deploy a useless or broken token.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("token name must not be empty".into()));
        }
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("token symbol must not be empty".into()));
        }
        if self.stream.rate_per_second == 0 {
            return Err(ConfigError::Invalid(
                "stream.rate_per_second must be positive".into(),
            ));
        }
        if self.stream.max_duration_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "stream.max_duration_secs must be positive when set".into(),
            ));
        }
        if self.oracle_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "oracle_queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
