//! Block clock of the development node.
//!
//! Stands in for block production: each tick bumps the height by one and
//! the timestamp by the configured block time. Contract calls read the
//! clock once, so every call sees one consistent timestamp, and the
//! timestamp never goes backwards.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use veilstream_contracts::CallContext;
use veilstream_protocol::Address;

#[derive(Debug)]
pub struct BlockClock {
    height: AtomicU64,
    timestamp: AtomicU64,
    block_time_secs: u64,
}

/// Height and timestamp of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub height: u64,
    pub timestamp: u64,
}

impl BlockClock {
    /// Start at height 0 with `genesis_timestamp`, in seconds.
    pub fn new(genesis_timestamp: u64, block_time_secs: u64) -> Self {
        Self {
            height: AtomicU64::new(0),
            timestamp: AtomicU64::new(genesis_timestamp),
            block_time_secs,
        }
    }

    /// Produce the next block.
    ///
    /// Only the block loop calls this. The timestamp is published before the
    /// height, so a reader may see the new timestamp a moment before the new
    /// height but never a new height with a stale timestamp.
    pub fn advance(&self) -> BlockInfo {
        let timestamp = self
            .timestamp
            .fetch_add(self.block_time_secs, Ordering::SeqCst)
            .saturating_add(self.block_time_secs);
        let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
        BlockInfo { height, timestamp }
    }

    pub fn now(&self) -> BlockInfo {
        BlockInfo {
            height: self.height.load(Ordering::SeqCst),
            timestamp: self.timestamp.load(Ordering::SeqCst),
        }
    }

    /// Call context for `caller` at the current block.
    pub fn context(&self, caller: Address) -> CallContext {
        CallContext::new(caller, self.timestamp.load(Ordering::SeqCst))
    }
}
