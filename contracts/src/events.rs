//! Contract events.
//!
//! Events are public. They carry addresses, stream ids, tickets and handle
//! ids, never the plaintext of an encrypted amount. `Mint` is the
//! exception: mint amounts are public inputs.

use serde::{Deserialize, Serialize};
use veilstream_protocol::gateway::TicketId;
use veilstream_protocol::{Address, HandleId};

use crate::stream::StreamId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TokenEvent {
    Mint {
        to: Address,
        amount: u64,
    },
    Transfer {
        from: Address,
        to: Address,
        /// Handle of the value actually moved.
        moved: HandleId,
    },
    Approval {
        owner: Address,
        spender: Address,
        allowance: HandleId,
    },
    StreamStarted {
        stream_id: StreamId,
        sender: Address,
        receiver: Address,
        rate_per_second: u64,
        start_time: u64,
    },
    StreamWithdrawn {
        stream_id: StreamId,
        receiver: Address,
        timestamp: u64,
    },
    StreamCancelled {
        stream_id: StreamId,
        sender: Address,
        timestamp: u64,
    },
    StreamCompleted {
        stream_id: StreamId,
        timestamp: u64,
    },
    DecryptionRequested {
        ticket: TicketId,
        handle: HandleId,
        requester: Address,
    },
    /// A balance decryption was fulfilled. The value is stored on the
    /// contract for the owner, not in the event.
    BalanceRevealed {
        ticket: TicketId,
        account: Address,
    },
}
