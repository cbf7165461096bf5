//! Contract error taxonomy.
//!
//! Every error aborts the call before any state is written. There is no
//! `InsufficientBalance`: debits clamp to the available encrypted balance
//! instead of reverting, so a short balance is never observable on-path.

use thiserror::Error;
use veilstream_protocol::fhe::FheError;
use veilstream_protocol::gateway::DisclosureError;
use veilstream_protocol::Address;

use crate::stream::{StreamId, StreamStatus};

pub const ONLY_SENDER: &str = "Only stream sender call";
pub const ONLY_RECEIVER: &str = "Only stream receiver call";
pub const ONLY_PARTICIPANT: &str = "Only stream sender or receiver call";
pub const ONLY_ACCOUNT_OWNER: &str = "Only the account owner can request its balance decryption";

#[derive(Debug, Error)]
pub enum ContractError {
    /// The encrypted input failed proof verification.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// The caller is not allowed to perform this operation.
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("stream {id} is {status}, not active")]
    InactiveStream { id: StreamId, status: StreamStatus },

    #[error("an active stream from {sender} to {receiver} already exists (id {existing})")]
    DuplicateStream {
        sender: Address,
        receiver: Address,
        existing: StreamId,
    },

    /// Streams to oneself are rejected.
    #[error("invalid stream receiver {0}")]
    InvalidReceiver(Address),

    /// Minting `amount` would overflow the plaintext total supply.
    #[error("minting {amount} would overflow the total supply")]
    SupplyOverflow { amount: u64 },

    #[error("coprocessor error: {0}")]
    Backend(#[from] FheError),

    #[error(transparent)]
    Disclosure(#[from] DisclosureError),
}

impl ContractError {
    /// Map a failed input verification to `InvalidCiphertext`.
    pub(crate) fn invalid_input(err: FheError) -> Self {
        ContractError::InvalidCiphertext(err.to_string())
    }
}
