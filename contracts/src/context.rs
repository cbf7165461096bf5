//! Execution context handed to every contract call.
//!
//! The contract never reads a clock. The execution environment supplies the
//! caller and the current block timestamp, which is monotonically
//! non-decreasing across calls.

use serde::{Deserialize, Serialize};
use veilstream_protocol::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// The account that signed the transaction.
    pub caller: Address,
    /// Block timestamp in seconds.
    pub block_timestamp: u64,
}

impl CallContext {
    pub fn new(caller: Address, block_timestamp: u64) -> Self {
        Self {
            caller,
            block_timestamp,
        }
    }
}
