//! # Stream Engine
//!
//! Continuous payments from a sender to a receiver at a fixed, public rate
//! per second. Amounts owed are computed from elapsed block time in the
//! clear (rate and time are public) and then settled in the encrypted
//! domain, clamped against the sender's encrypted balance.
//!
//! ## Lifecycle
//!
//! ```text
//!   start ──► Active ──stop (sender)─────────────────► Cancelled
//!                │
//!                └──withdraw (receiver) past end_time──► Completed
//! ```
//!
//! `Completed` exists only when the deployment caps stream lifetime
//! (`StreamPolicy::max_duration_secs`). Without a cap a stream stays
//! `Active` until its sender cancels it.
//!
//! ## Accrual
//!
//! `accrued = rate * (min(now, end_time) - last_settlement)`, saturating.
//! Each settlement moves `min(accrued, balance(sender))` and advances
//! `last_settlement`, so a later withdrawal only pays the new interval.
//!
//! ## Check order
//!
//! Unknown stream, then caller role, then status, then the encrypted input.
//! The first failing check wins and nothing is written.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use veilstream_protocol::config::StreamPolicy;
use veilstream_protocol::fhe::{EncryptedInput, FheBackend, Handle};
use veilstream_protocol::{AccessControlRegistry, Address};

use crate::context::CallContext;
use crate::error::{ContractError, ONLY_PARTICIPANT, ONLY_RECEIVER, ONLY_SENDER};
use crate::ledger::{EncryptedLedger, Settlement};

pub type StreamId = u64;

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamStatus {
    /// Accruing. Sender may stop it, receiver may withdraw.
    Active,
    /// Stopped by the sender after a final settlement. Terminal.
    Cancelled,
    /// Fully settled through its end time. Terminal.
    Completed,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Active => write!(f, "Active"),
            StreamStatus::Cancelled => write!(f, "Cancelled"),
            StreamStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// A payment stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    /// Account paying into the stream.
    pub sender: Address,
    /// Account being paid.
    pub receiver: Address,
    /// Public accrual rate, token units per second.
    pub rate_per_second: u64,
    /// Block timestamp at creation.
    pub start_time: u64,
    /// Timestamp up to which the stream has been paid out. Starts at
    /// `start_time`.
    pub last_settlement: u64,
    /// Accrual stops here, when the deployment caps stream lifetime.
    pub end_time: Option<u64>,
    pub status: StreamStatus,
    /// Encrypted running total paid to the receiver.
    pub withdrawn: Handle,
    /// Timestamp of the transition to a terminal state.
    pub closed_at: Option<u64>,
}

impl Stream {
    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Active
    }

    /// Plaintext amount accrued since the last settlement at `now`.
    ///
    /// Zero for terminal streams.
    pub fn accrued_at(&self, now: u64) -> u64 {
        if !self.is_active() {
            return 0;
        }
        self.rate_per_second
            .saturating_mul(self.settle_point(now).saturating_sub(self.last_settlement))
    }

    /// The timestamp a settlement at `now` pays up to.
    fn settle_point(&self, now: u64) -> u64 {
        match self.end_time {
            Some(end) => now.min(end),
            None => now,
        }
    }

    fn involves(&self, account: &Address) -> bool {
        self.sender == *account || self.receiver == *account
    }
}

/// Outcome of a settling stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettlement {
    pub stream_id: StreamId,
    pub settlement: Settlement,
    /// New encrypted running total on the stream.
    pub withdrawn: Handle,
    /// Status after the operation.
    pub status: StreamStatus,
}

#[derive(Debug)]
pub struct StreamEngine {
    policy: StreamPolicy,
    streams: BTreeMap<StreamId, Stream>,
    active_pairs: HashMap<(Address, Address), StreamId>,
    next_id: StreamId,
}

impl StreamEngine {
    pub fn new(policy: StreamPolicy) -> Self {
        Self {
            policy,
            streams: BTreeMap::new(),
            active_pairs: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn policy(&self) -> &StreamPolicy {
        &self.policy
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// Every stream `account` sends or receives, oldest first.
    pub fn streams_of(&self, account: &Address) -> Vec<&Stream> {
        self.streams
            .values()
            .filter(|s| s.involves(account))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_pairs.len()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Open a stream from the caller to `receiver`.
    pub fn start_stream(
        &mut self,
        backend: &dyn FheBackend,
        ledger: &EncryptedLedger,
        acl: &mut AccessControlRegistry,
        ctx: &CallContext,
        receiver: Address,
    ) -> Result<StreamId, ContractError> {
        let sender = ctx.caller;
        if receiver == sender {
            return Err(ContractError::InvalidReceiver(receiver));
        }
        if let Some(&existing) = self.active_pairs.get(&(sender, receiver)) {
            return Err(ContractError::DuplicateStream {
                sender,
                receiver,
                existing,
            });
        }

        let withdrawn = backend.trivial_encrypt(0)?;
        let now = ctx.block_timestamp;
        let id = self.next_id;

        self.next_id += 1;
        acl.grant_all(&withdrawn, [sender, receiver, ledger.contract()]);
        self.active_pairs.insert((sender, receiver), id);
        self.streams.insert(
            id,
            Stream {
                id,
                sender,
                receiver,
                rate_per_second: self.policy.rate_per_second,
                start_time: now,
                last_settlement: now,
                end_time: self
                    .policy
                    .max_duration_secs
                    .map(|d| now.saturating_add(d)),
                status: StreamStatus::Active,
                withdrawn,
                closed_at: None,
            },
        );

        tracing::info!(stream_id = id, %sender, %receiver, start = now, "stream started");
        Ok(id)
    }

    /// Sender cancels the stream. The receiver is paid what accrued since
    /// the last settlement, clamped to the sender's balance.
    ///
    /// `claimed` must be a well-formed input from the sender; its value is
    /// not used. The payout is always recomputed here.
    pub fn stop_stream(
        &mut self,
        backend: &dyn FheBackend,
        ledger: &mut EncryptedLedger,
        acl: &mut AccessControlRegistry,
        ctx: &CallContext,
        id: StreamId,
        claimed: &EncryptedInput,
    ) -> Result<StreamSettlement, ContractError> {
        let stream = self.checked(id, |s| s.sender == ctx.caller, ONLY_SENDER)?;
        ledger.verify_input(backend, claimed, ctx.caller)?;

        let (settlement, withdrawn) = Self::prepare(backend, ledger, stream, ctx.block_timestamp)?;
        let result = self.commit(ledger, acl, id, settlement, withdrawn, ctx.block_timestamp, true)?;

        tracing::info!(stream_id = id, sender = %ctx.caller, "stream cancelled");
        Ok(result)
    }

    /// Receiver collects what accrued since the last settlement, clamped to
    /// the sender's balance.
    pub fn withdraw_from_stream(
        &mut self,
        backend: &dyn FheBackend,
        ledger: &mut EncryptedLedger,
        acl: &mut AccessControlRegistry,
        ctx: &CallContext,
        id: StreamId,
        amount: &EncryptedInput,
    ) -> Result<StreamSettlement, ContractError> {
        let stream = self.checked(id, |s| s.receiver == ctx.caller, ONLY_RECEIVER)?;
        ledger.verify_input(backend, amount, ctx.caller)?;

        let (settlement, withdrawn) = Self::prepare(backend, ledger, stream, ctx.block_timestamp)?;
        let result = self.commit(ledger, acl, id, settlement, withdrawn, ctx.block_timestamp, false)?;

        tracing::info!(stream_id = id, receiver = %ctx.caller, status = %result.status, "stream withdrawal");
        Ok(result)
    }

    /// Encrypted amount that would be paid out if the stream settled now.
    ///
    /// Does not touch stream or ledger state; only grants the returned
    /// handle to the sender, the receiver and the contract.
    pub fn view_already_streamed_balance(
        &self,
        backend: &dyn FheBackend,
        ledger: &EncryptedLedger,
        acl: &mut AccessControlRegistry,
        ctx: &CallContext,
        id: StreamId,
    ) -> Result<Handle, ContractError> {
        let stream = self.streams.get(&id).ok_or(ContractError::UnknownStream(id))?;
        if !stream.involves(&ctx.caller) {
            tracing::warn!(stream_id = id, caller = %ctx.caller, "stream view rejected");
            return Err(ContractError::Unauthorized(ONLY_PARTICIPANT));
        }

        let accrued = backend.trivial_encrypt(stream.accrued_at(ctx.block_timestamp))?;
        let available = ledger.balance_or_zero(backend, &stream.sender)?;
        let streamed = backend.min(&accrued, &available)?;

        acl.grant_all(&streamed, [stream.sender, stream.receiver, ledger.contract()]);
        Ok(streamed)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn checked(
        &self,
        id: StreamId,
        allowed: impl Fn(&Stream) -> bool,
        denial: &'static str,
    ) -> Result<&Stream, ContractError> {
        let stream = self.streams.get(&id).ok_or(ContractError::UnknownStream(id))?;
        if !allowed(stream) {
            tracing::warn!(stream_id = id, reason = denial, "stream operation rejected");
            return Err(ContractError::Unauthorized(denial));
        }
        if !stream.is_active() {
            return Err(ContractError::InactiveStream {
                id,
                status: stream.status,
            });
        }
        Ok(stream)
    }

    fn prepare(
        backend: &dyn FheBackend,
        ledger: &EncryptedLedger,
        stream: &Stream,
        now: u64,
    ) -> Result<(Settlement, Handle), ContractError> {
        let accrued = backend.trivial_encrypt(stream.accrued_at(now))?;
        let settlement = ledger.prepare_settlement(backend, stream.sender, stream.receiver, &accrued)?;
        let withdrawn = backend.add(&stream.withdrawn, &settlement.moved)?;
        Ok((settlement, withdrawn))
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        ledger: &mut EncryptedLedger,
        acl: &mut AccessControlRegistry,
        id: StreamId,
        settlement: Settlement,
        withdrawn: Handle,
        now: u64,
        cancel: bool,
    ) -> Result<StreamSettlement, ContractError> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(ContractError::UnknownStream(id))?;

        ledger.apply(&settlement, acl);
        acl.grant_all(&withdrawn, [stream.sender, stream.receiver, ledger.contract()]);
        stream.withdrawn = withdrawn;
        stream.last_settlement = stream.settle_point(now);

        let finished = stream.end_time.is_some_and(|end| now >= end);
        if cancel || finished {
            stream.status = if cancel {
                StreamStatus::Cancelled
            } else {
                StreamStatus::Completed
            };
            stream.closed_at = Some(now);
            self.active_pairs.remove(&(stream.sender, stream.receiver));
        }

        Ok(StreamSettlement {
            stream_id: id,
            settlement,
            withdrawn,
            status: stream.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TokenMetadata;
    use veilstream_protocol::config::TokenConfig;
    use veilstream_protocol::fhe::{CleartextCoprocessor, Decryptor, InputBinding};

    const CONTRACT: Address = Address::from_bytes([0xcc; 20]);
    const ALICE: Address = Address::from_bytes([0xa1; 20]);
    const BOB: Address = Address::from_bytes([0xb0; 20]);
    const CAROL: Address = Address::from_bytes([0xca; 20]);

    struct Fixture {
        cop: CleartextCoprocessor,
        acl: AccessControlRegistry,
        ledger: EncryptedLedger,
        engine: StreamEngine,
    }

    fn fixture(policy: StreamPolicy) -> Fixture {
        let mut fx = Fixture {
            cop: CleartextCoprocessor::new(),
            acl: AccessControlRegistry::new(),
            ledger: EncryptedLedger::new(CONTRACT, TokenMetadata::from(&TokenConfig::default())),
            engine: StreamEngine::new(policy),
        };
        fx.ledger.mint(&fx.cop, &mut fx.acl, ALICE, 1000).unwrap();
        fx
    }

    impl Fixture {
        fn input(&self, user: Address) -> EncryptedInput {
            self.cop.encrypt_input(
                0,
                &InputBinding {
                    contract: CONTRACT,
                    user,
                },
            )
        }

        fn balance(&self, who: Address) -> u64 {
            self.ledger
                .balance_of(&who)
                .map(|h| self.cop.decrypt(&h).unwrap())
                .unwrap_or(0)
        }

        fn start(&mut self, at: u64) -> StreamId {
            self.engine
                .start_stream(&self.cop, &self.ledger, &mut self.acl, &CallContext::new(ALICE, at), BOB)
                .unwrap()
        }

        fn withdraw(&mut self, id: StreamId, who: Address, at: u64) -> Result<StreamSettlement, ContractError> {
            let input = self.input(who);
            self.engine.withdraw_from_stream(
                &self.cop,
                &mut self.ledger,
                &mut self.acl,
                &CallContext::new(who, at),
                id,
                &input,
            )
        }

        fn stop(&mut self, id: StreamId, who: Address, at: u64) -> Result<StreamSettlement, ContractError> {
            let input = self.input(who);
            self.engine.stop_stream(
                &self.cop,
                &mut self.ledger,
                &mut self.acl,
                &CallContext::new(who, at),
                id,
                &input,
            )
        }
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut fx = fixture(StreamPolicy::default());
        assert_eq!(fx.start(0), 1);
        let second = fx
            .engine
            .start_stream(&fx.cop, &fx.ledger, &mut fx.acl, &CallContext::new(ALICE, 0), CAROL)
            .unwrap();
        assert_eq!(second, 2);
        assert_eq!(fx.engine.active_count(), 2);
    }

    #[test]
    fn duplicate_active_pair_rejected() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);
        let err = fx
            .engine
            .start_stream(&fx.cop, &fx.ledger, &mut fx.acl, &CallContext::new(ALICE, 1), BOB)
            .unwrap_err();
        assert!(matches!(err, ContractError::DuplicateStream { existing, .. } if existing == id));

        // The reverse direction is a different pair.
        assert!(fx
            .engine
            .start_stream(&fx.cop, &fx.ledger, &mut fx.acl, &CallContext::new(BOB, 1), ALICE)
            .is_ok());
    }

    #[test]
    fn pair_can_restart_after_cancel() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);
        fx.stop(id, ALICE, 2).unwrap();
        assert_eq!(fx.start(3), id + 1);
    }

    #[test]
    fn self_stream_rejected() {
        let mut fx = fixture(StreamPolicy::default());
        let err = fx
            .engine
            .start_stream(&fx.cop, &fx.ledger, &mut fx.acl, &CallContext::new(ALICE, 0), ALICE)
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidReceiver(_)));
    }

    #[test]
    fn withdraw_pays_elapsed_interval_only() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(100);

        fx.withdraw(id, BOB, 105).unwrap();
        assert_eq!(fx.balance(BOB), 5);
        assert_eq!(fx.balance(ALICE), 995);

        fx.withdraw(id, BOB, 108).unwrap();
        assert_eq!(fx.balance(BOB), 8);

        // Same block again: nothing new accrued.
        fx.withdraw(id, BOB, 108).unwrap();
        assert_eq!(fx.balance(BOB), 8);

        let stream = fx.engine.stream(id).unwrap();
        assert_eq!(stream.last_settlement, 108);
        assert_eq!(fx.cop.decrypt(&stream.withdrawn).unwrap(), 8);
    }

    #[test]
    fn settlement_clamps_to_sender_balance() {
        let mut fx = fixture(StreamPolicy {
            rate_per_second: 300,
            max_duration_secs: None,
        });
        let id = fx.start(0);
        fx.withdraw(id, BOB, 10).unwrap();
        assert_eq!(fx.balance(BOB), 1000);
        assert_eq!(fx.balance(ALICE), 0);
        assert_eq!(fx.ledger.total_supply(), 1000);
    }

    #[test]
    fn stop_settles_and_cancels() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);
        let result = fx.stop(id, ALICE, 5).unwrap();
        assert_eq!(result.status, StreamStatus::Cancelled);
        assert_eq!(fx.balance(BOB), 5);
        assert!(fx.acl.is_authorized(&result.settlement.to_balance().id, &BOB));

        let stream = fx.engine.stream(id).unwrap();
        assert_eq!(stream.closed_at, Some(5));
        assert_eq!(fx.engine.active_count(), 0);

        let err = fx.withdraw(id, BOB, 9).unwrap_err();
        assert!(matches!(err, ContractError::InactiveStream { status: StreamStatus::Cancelled, .. }));
    }

    #[test]
    fn role_checks() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);

        let err = fx.withdraw(id, ALICE, 5).unwrap_err();
        assert_eq!(err.to_string(), ONLY_RECEIVER);
        let err = fx.stop(id, BOB, 5).unwrap_err();
        assert_eq!(err.to_string(), ONLY_SENDER);
        let err = fx
            .engine
            .view_already_streamed_balance(&fx.cop, &fx.ledger, &mut fx.acl, &CallContext::new(CAROL, 5), id)
            .unwrap_err();
        assert!(matches!(err, ContractError::Unauthorized(ONLY_PARTICIPANT)));

        // Nothing moved.
        assert_eq!(fx.balance(ALICE), 1000);
        assert_eq!(fx.balance(BOB), 0);
    }

    #[test]
    fn unknown_stream_checked_before_role() {
        let mut fx = fixture(StreamPolicy::default());
        assert!(matches!(fx.withdraw(42, CAROL, 0), Err(ContractError::UnknownStream(42))));
        assert!(matches!(fx.stop(42, CAROL, 0), Err(ContractError::UnknownStream(42))));
    }

    #[test]
    fn role_checked_before_status() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);
        fx.stop(id, ALICE, 1).unwrap();
        assert!(matches!(fx.stop(id, CAROL, 2), Err(ContractError::Unauthorized(_))));
    }

    #[test]
    fn malformed_input_rejected_without_settlement() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);
        // Input produced for Alice, submitted by Bob.
        let foreign = fx.input(ALICE);
        let err = fx
            .engine
            .withdraw_from_stream(&fx.cop, &mut fx.ledger, &mut fx.acl, &CallContext::new(BOB, 5), id, &foreign)
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidCiphertext(_)));
        assert_eq!(fx.balance(BOB), 0);
        assert_eq!(fx.engine.stream(id).unwrap().last_settlement, 0);
    }

    #[test]
    fn view_does_not_mutate() {
        let mut fx = fixture(StreamPolicy::default());
        let id = fx.start(0);
        let ctx = CallContext::new(BOB, 7);
        let handle = fx
            .engine
            .view_already_streamed_balance(&fx.cop, &fx.ledger, &mut fx.acl, &ctx, id)
            .unwrap();
        assert_eq!(fx.cop.decrypt(&handle).unwrap(), 7);
        assert!(fx.acl.is_authorized(&handle.id, &ALICE));
        assert!(fx.acl.is_authorized(&handle.id, &BOB));
        assert_eq!(fx.balance(BOB), 0);
        assert_eq!(fx.engine.stream(id).unwrap().last_settlement, 0);
    }

    #[test]
    fn capped_stream_completes_on_final_withdrawal() {
        let mut fx = fixture(StreamPolicy {
            rate_per_second: 2,
            max_duration_secs: Some(10),
        });
        let id = fx.start(0);

        let partial = fx.withdraw(id, BOB, 4).unwrap();
        assert_eq!(partial.status, StreamStatus::Active);

        let last = fx.withdraw(id, BOB, 50).unwrap();
        assert_eq!(last.status, StreamStatus::Completed);
        // Accrual stopped at t=10.
        assert_eq!(fx.balance(BOB), 20);
        assert_eq!(fx.engine.stream(id).unwrap().last_settlement, 10);
        assert_eq!(fx.engine.active_count(), 0);
    }

    #[test]
    fn accrual_saturates() {
        let stream = Stream {
            id: 1,
            sender: ALICE,
            receiver: BOB,
            rate_per_second: u64::MAX,
            start_time: 0,
            last_settlement: 0,
            end_time: None,
            status: StreamStatus::Active,
            withdrawn: CleartextCoprocessor::new().trivial_encrypt(0).unwrap(),
            closed_at: None,
        };
        assert_eq!(stream.accrued_at(10), u64::MAX);
        assert_eq!(stream.accrued_at(0), 0);
    }

    #[test]
    fn streams_of_lists_both_directions() {
        let mut fx = fixture(StreamPolicy::default());
        fx.start(0);
        fx.engine
            .start_stream(&fx.cop, &fx.ledger, &mut fx.acl, &CallContext::new(CAROL, 0), BOB)
            .unwrap();
        assert_eq!(fx.engine.streams_of(&BOB).len(), 2);
        assert_eq!(fx.engine.streams_of(&ALICE).len(), 1);
        assert!(fx.engine.streams_of(&Address::from_bytes([0; 20])).is_empty());
    }
}
