//! # Veilstream Contracts
//!
//! The confidential stream token: an encrypted-balance ledger with
//! continuous payment streams on top.
//!
//! - **Ledger**: mint, transfer, approve and transfer-from over encrypted
//!   balances. Debits clamp to the available balance instead of reverting.
//! - **Streams**: start, stop, withdraw and view, settling time-accrued
//!   amounts in the encrypted domain with sender/receiver-only access.
//! - **Token**: the facade tying both to one access-control registry and
//!   one disclosure gateway.
//!
//! ## Design Principles
//!
//! 1. No plaintext amount is ever observed outside `mint`. Balances are
//!    handles; the backend does the arithmetic.
//! 2. Every handle handed to a party is granted to that party before the
//!    call returns.
//! 3. Failing calls write nothing: all homomorphic work is prepared before
//!    anything is committed.
//! 4. Time comes from the caller's [`CallContext`], never from a clock.

pub mod context;
pub mod error;
pub mod events;
pub mod ledger;
pub mod stream;
pub mod token;

pub use context::CallContext;
pub use error::ContractError;
pub use events::TokenEvent;
pub use ledger::{EncryptedLedger, Settlement, TokenMetadata};
pub use stream::{Stream, StreamEngine, StreamId, StreamStatus};
pub use token::{ConfidentialStreamToken, RevealedBalance};
