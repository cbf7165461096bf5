//! # Confidential Stream Token
//!
//! The deployed contract: an [`EncryptedLedger`] and a [`StreamEngine`]
//! sharing one [`AccessControlRegistry`], fronted by a
//! [`DisclosureGateway`]. This is the inbound operation surface callers see.
//!
//! Every method takes an explicit [`CallContext`]; the execution environment
//! decides who is calling and what time it is. Calls are expected to run one
//! at a time, in order. The token holds no locks of its own.
//!
//! ## Balance decryption
//!
//! `request_user_balance_decryption` submits the owner's balance handle to
//! the oracle and remembers the ticket. When the oracle later calls
//! [`on_decryption_result`](ConfidentialStreamToken::on_decryption_result),
//! the plaintext is stored for that account. It reflects the balance at
//! request time, not at delivery time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use veilstream_protocol::config::TokenConfig;
use veilstream_protocol::fhe::{EncryptedInput, FheBackend, Handle};
use veilstream_protocol::gateway::{
    DecryptionOracle, DecryptionResult, DisclosureGateway, PendingDisclosure, ReencryptRequest,
    TicketId,
};
use veilstream_protocol::{AccessControlRegistry, Address};

use crate::context::CallContext;
use crate::error::{ContractError, ONLY_ACCOUNT_OWNER};
use crate::events::TokenEvent;
use crate::ledger::{EncryptedLedger, TokenMetadata};
use crate::stream::{Stream, StreamEngine, StreamId, StreamSettlement, StreamStatus};

/// A balance revealed through the decryption callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedBalance {
    pub ticket: TicketId,
    pub value: u64,
}

pub struct ConfidentialStreamToken<B: FheBackend> {
    address: Address,
    backend: Arc<B>,
    ledger: EncryptedLedger,
    streams: StreamEngine,
    acl: AccessControlRegistry,
    gateway: DisclosureGateway,
    pending_balance_decryptions: HashMap<TicketId, Address>,
    revealed_balances: HashMap<Address, RevealedBalance>,
    events: Vec<TokenEvent>,
}

impl<B: FheBackend> ConfidentialStreamToken<B> {
    /// Deploy a token at `address`.
    pub fn new(
        address: Address,
        config: &TokenConfig,
        backend: Arc<B>,
        oracle: Arc<dyn DecryptionOracle>,
    ) -> Self {
        tracing::info!(
            %address,
            name = %config.name,
            symbol = %config.symbol,
            rate_per_second = config.stream.rate_per_second,
            "confidential stream token deployed"
        );
        Self {
            address,
            backend,
            ledger: EncryptedLedger::new(address, TokenMetadata::from(config)),
            streams: StreamEngine::new(config.stream.clone()),
            acl: AccessControlRegistry::new(),
            gateway: DisclosureGateway::new(address, config.chain_id, oracle),
            pending_balance_decryptions: HashMap::new(),
            revealed_balances: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.ledger.metadata().name
    }

    pub fn symbol(&self) -> &str {
        &self.ledger.metadata().symbol
    }

    pub fn decimals(&self) -> u8 {
        self.ledger.metadata().decimals
    }

    pub fn chain_id(&self) -> u64 {
        self.gateway.chain_id()
    }

    pub fn acl(&self) -> &AccessControlRegistry {
        &self.acl
    }

    pub fn ledger(&self) -> &EncryptedLedger {
        &self.ledger
    }

    pub fn streams(&self) -> &StreamEngine {
        &self.streams
    }

    // -----------------------------------------------------------------------
    // Ledger surface
    // -----------------------------------------------------------------------

    /// Mint `amount` to the caller.
    pub fn mint(&mut self, ctx: &CallContext, amount: u64) -> Result<Handle, ContractError> {
        let handle = self
            .ledger
            .mint(&*self.backend, &mut self.acl, ctx.caller, amount)?;
        self.events.push(TokenEvent::Mint {
            to: ctx.caller,
            amount,
        });
        Ok(handle)
    }

    /// Transfer an encrypted amount from the caller to `to`.
    ///
    /// Always `Ok(true)` when accepted: a short balance clamps rather than
    /// fails, and whether it clamped is only visible to the sender through
    /// the encrypted `honoured` flag.
    pub fn transfer(
        &mut self,
        ctx: &CallContext,
        to: Address,
        amount: &EncryptedInput,
    ) -> Result<bool, ContractError> {
        let settlement = self
            .ledger
            .transfer(&*self.backend, &mut self.acl, ctx.caller, to, amount)?;
        self.events.push(TokenEvent::Transfer {
            from: ctx.caller,
            to,
            moved: settlement.moved.id,
        });
        Ok(true)
    }

    pub fn approve(
        &mut self,
        ctx: &CallContext,
        spender: Address,
        amount: &EncryptedInput,
    ) -> Result<bool, ContractError> {
        let allowance = self
            .ledger
            .approve(&*self.backend, &mut self.acl, ctx.caller, spender, amount)?;
        self.events.push(TokenEvent::Approval {
            owner: ctx.caller,
            spender,
            allowance: allowance.id,
        });
        Ok(true)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Option<Handle> {
        self.ledger.allowance(owner, spender)
    }

    /// Caller spends from `from`'s balance using its allowance.
    pub fn transfer_from(
        &mut self,
        ctx: &CallContext,
        from: Address,
        to: Address,
        amount: &EncryptedInput,
    ) -> Result<bool, ContractError> {
        let settlement = self.ledger.transfer_from(
            &*self.backend,
            &mut self.acl,
            ctx.caller,
            from,
            to,
            amount,
        )?;
        self.events.push(TokenEvent::Transfer {
            from,
            to,
            moved: settlement.moved.id,
        });
        Ok(true)
    }

    pub fn balance_of(&self, account: &Address) -> Option<Handle> {
        self.ledger.balance_of(account)
    }

    pub fn total_supply(&self) -> u64 {
        self.ledger.total_supply()
    }

    // -----------------------------------------------------------------------
    // Stream surface
    // -----------------------------------------------------------------------

    pub fn start_stream(
        &mut self,
        ctx: &CallContext,
        receiver: Address,
    ) -> Result<StreamId, ContractError> {
        let id = self.streams.start_stream(
            &*self.backend,
            &self.ledger,
            &mut self.acl,
            ctx,
            receiver,
        )?;
        self.events.push(TokenEvent::StreamStarted {
            stream_id: id,
            sender: ctx.caller,
            receiver,
            rate_per_second: self.streams.policy().rate_per_second,
            start_time: ctx.block_timestamp,
        });
        Ok(id)
    }

    pub fn stop_stream(
        &mut self,
        ctx: &CallContext,
        id: StreamId,
        claimed: &EncryptedInput,
    ) -> Result<(), ContractError> {
        let result = self.streams.stop_stream(
            &*self.backend,
            &mut self.ledger,
            &mut self.acl,
            ctx,
            id,
            claimed,
        )?;
        self.record_settlement(ctx, &result);
        Ok(())
    }

    pub fn withdraw_from_stream(
        &mut self,
        ctx: &CallContext,
        id: StreamId,
        amount: &EncryptedInput,
    ) -> Result<(), ContractError> {
        let result = self.streams.withdraw_from_stream(
            &*self.backend,
            &mut self.ledger,
            &mut self.acl,
            ctx,
            id,
            amount,
        )?;
        self.record_settlement(ctx, &result);
        Ok(())
    }

    pub fn view_already_streamed_balance(
        &mut self,
        ctx: &CallContext,
        id: StreamId,
    ) -> Result<Handle, ContractError> {
        self.streams.view_already_streamed_balance(
            &*self.backend,
            &self.ledger,
            &mut self.acl,
            ctx,
            id,
        )
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.stream(id)
    }

    fn record_settlement(&mut self, ctx: &CallContext, result: &StreamSettlement) {
        let stream_id = result.stream_id;
        let timestamp = ctx.block_timestamp;
        self.events.push(TokenEvent::Transfer {
            from: result.settlement.from,
            to: result.settlement.to,
            moved: result.settlement.moved.id,
        });
        match result.status {
            StreamStatus::Cancelled => self.events.push(TokenEvent::StreamCancelled {
                stream_id,
                sender: ctx.caller,
                timestamp,
            }),
            StreamStatus::Active => self.events.push(TokenEvent::StreamWithdrawn {
                stream_id,
                receiver: ctx.caller,
                timestamp,
            }),
            StreamStatus::Completed => {
                self.events.push(TokenEvent::StreamWithdrawn {
                    stream_id,
                    receiver: ctx.caller,
                    timestamp,
                });
                self.events.push(TokenEvent::StreamCompleted {
                    stream_id,
                    timestamp,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Disclosure
    // -----------------------------------------------------------------------

    /// Forward a signed reencryption request to the oracle.
    pub fn request_disclosure(
        &mut self,
        request: &ReencryptRequest,
    ) -> Result<PendingDisclosure, ContractError> {
        let pending = self.gateway.request_disclosure(&self.acl, request)?;
        self.events.push(TokenEvent::DecryptionRequested {
            ticket: pending.ticket,
            handle: pending.handle,
            requester: pending.requester,
        });
        Ok(pending)
    }

    /// Ask the oracle to decrypt `account`'s balance for the contract.
    /// Only the account owner may ask.
    pub fn request_user_balance_decryption(
        &mut self,
        ctx: &CallContext,
        account: Address,
    ) -> Result<PendingDisclosure, ContractError> {
        if ctx.caller != account {
            tracing::warn!(caller = %ctx.caller, %account, "balance decryption rejected");
            return Err(ContractError::Unauthorized(ONLY_ACCOUNT_OWNER));
        }
        let pending = match self.ledger.balance_of(&account) {
            Some(balance) => self
                .gateway
                .request_public_decryption(&self.acl, &balance, account)?,
            None => {
                // Never funded: the zero handle only enters the ledger once
                // the oracle has accepted the job.
                let zero = self.ledger.balance_or_zero(&*self.backend, &account)?;
                let mut staged = AccessControlRegistry::new();
                staged.grant(&zero, self.address);
                let pending = self
                    .gateway
                    .request_public_decryption(&staged, &zero, account)?;
                self.ledger.install_balance(&mut self.acl, account, zero);
                pending
            }
        };

        self.pending_balance_decryptions
            .insert(pending.ticket, account);
        self.events.push(TokenEvent::DecryptionRequested {
            ticket: pending.ticket,
            handle: pending.handle,
            requester: account,
        });
        Ok(pending)
    }

    /// Oracle callback. Returns `true` if the result answered one of this
    /// contract's balance decryption requests.
    pub fn on_decryption_result(&mut self, result: &DecryptionResult) -> bool {
        let Some(account) = self.pending_balance_decryptions.remove(&result.ticket()) else {
            return false;
        };
        match result {
            DecryptionResult::Public { ticket, value, .. } => {
                self.revealed_balances.insert(
                    account,
                    RevealedBalance {
                        ticket: *ticket,
                        value: *value,
                    },
                );
                self.events.push(TokenEvent::BalanceRevealed {
                    ticket: *ticket,
                    account,
                });
                tracing::info!(%ticket, %account, "balance revealed");
            }
            DecryptionResult::Failed { ticket, reason, .. } => {
                tracing::warn!(%ticket, %account, %reason, "balance decryption failed");
            }
            DecryptionResult::Reencrypted { ticket, .. } => {
                tracing::warn!(%ticket, %account, "unexpected reencrypted result for balance decryption");
            }
        }
        true
    }

    /// Last balance revealed to `account` through the decryption callback.
    pub fn revealed_balance(&self, account: &Address) -> Option<RevealedBalance> {
        self.revealed_balances.get(account).copied()
    }

    /// Balance decryptions still waiting on the oracle.
    pub fn pending_decryption_count(&self) -> usize {
        self.pending_balance_decryptions.len()
    }

    /// Take every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<TokenEvent> {
        std::mem::take(&mut self.events)
    }
}

impl<B: FheBackend> std::fmt::Debug for ConfidentialStreamToken<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidentialStreamToken")
            .field("address", &self.address)
            .field("symbol", &self.symbol())
            .field("total_supply", &self.total_supply())
            .field("streams", &self.streams.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilstream_protocol::fhe::{CleartextCoprocessor, Decryptor, InputBinding};
    use veilstream_protocol::gateway::{DisclosureError, LocalOracle, OracleError};

    const ALICE: Address = Address::from_bytes([0xa1; 20]);
    const BOB: Address = Address::from_bytes([0xb0; 20]);
    const CAROL: Address = Address::from_bytes([0xca; 20]);

    fn deploy() -> (
        ConfidentialStreamToken<CleartextCoprocessor>,
        Arc<CleartextCoprocessor>,
        Arc<LocalOracle<CleartextCoprocessor>>,
    ) {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = Arc::new(LocalOracle::new(cop.clone(), 64));
        let token = ConfidentialStreamToken::new(
            Address::from_bytes([0xcc; 20]),
            &TokenConfig::default(),
            cop.clone(),
            oracle.clone(),
        );
        (token, cop, oracle)
    }

    #[test]
    fn metadata_comes_from_config() {
        let (token, _, _) = deploy();
        assert_eq!(token.symbol(), "CST");
        assert_eq!(token.decimals(), 6);
        assert_eq!(token.chain_id(), 9000);
    }

    #[test]
    fn operations_emit_events_without_amounts() {
        let (mut token, cop, _) = deploy();
        let alice = CallContext::new(ALICE, 0);
        token.mint(&alice, 100).unwrap();
        let amount = cop.encrypt_input(
            40,
            &InputBinding {
                contract: token.address(),
                user: ALICE,
            },
        );
        assert!(token.transfer(&alice, BOB, &amount).unwrap());

        let events = token.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TokenEvent::Mint { to: ALICE, amount: 100 });
        assert!(matches!(events[1], TokenEvent::Transfer { from: ALICE, to: BOB, .. }));
        assert!(token.drain_events().is_empty());
    }

    #[test]
    fn balance_decryption_round_trip() {
        let (mut token, cop, oracle) = deploy();
        token.mint(&CallContext::new(ALICE, 0), 1000).unwrap();

        let pending = token
            .request_user_balance_decryption(&CallContext::new(ALICE, 1), ALICE)
            .unwrap();
        assert_eq!(token.pending_decryption_count(), 1);
        assert_eq!(token.revealed_balance(&ALICE), None);

        for result in oracle.fulfill_pending() {
            assert!(token.on_decryption_result(&result));
        }
        let revealed = token.revealed_balance(&ALICE).unwrap();
        assert_eq!(revealed.ticket, pending.ticket);
        assert_eq!(revealed.value, 1000);
        assert_eq!(token.pending_decryption_count(), 0);

        // The handle itself is unchanged and still decrypts the same.
        let handle = token.balance_of(&ALICE).unwrap();
        assert_eq!(cop.decrypt(&handle).unwrap(), 1000);
    }

    #[test]
    fn balance_decryption_owner_only() {
        let (mut token, _, oracle) = deploy();
        token.mint(&CallContext::new(ALICE, 0), 1000).unwrap();
        let err = token
            .request_user_balance_decryption(&CallContext::new(BOB, 1), ALICE)
            .unwrap_err();
        assert!(matches!(err, ContractError::Unauthorized(ONLY_ACCOUNT_OWNER)));
        assert_eq!(oracle.pending_count(), 0);
    }

    #[test]
    fn unfunded_account_decrypts_to_zero() {
        let (mut token, _, oracle) = deploy();
        token
            .request_user_balance_decryption(&CallContext::new(CAROL, 1), CAROL)
            .unwrap();
        let handle = token.balance_of(&CAROL).unwrap();
        assert!(token.acl().is_authorized(&handle.id, &CAROL));

        for result in oracle.fulfill_pending() {
            assert!(token.on_decryption_result(&result));
        }
        assert_eq!(token.revealed_balance(&CAROL).unwrap().value, 0);
    }

    #[test]
    fn failed_balance_decryption_leaves_no_trace() {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = Arc::new(LocalOracle::new(cop.clone(), 1));
        let mut token = ConfidentialStreamToken::new(
            Address::from_bytes([0xcc; 20]),
            &TokenConfig::default(),
            cop,
            oracle.clone(),
        );
        token.mint(&CallContext::new(ALICE, 0), 1000).unwrap();
        token
            .request_user_balance_decryption(&CallContext::new(ALICE, 1), ALICE)
            .unwrap();
        token.drain_events();
        let grants_before = token.acl().len();

        let err = token
            .request_user_balance_decryption(&CallContext::new(CAROL, 2), CAROL)
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::Disclosure(DisclosureError::Oracle(OracleError::QueueFull {
                capacity: 1
            }))
        ));
        assert_eq!(token.balance_of(&CAROL), None);
        assert_eq!(token.acl().len(), grants_before);
        assert_eq!(token.pending_decryption_count(), 1);
        assert!(token.drain_events().is_empty());
        assert_eq!(oracle.pending_count(), 1);
    }

    #[test]
    fn unrelated_results_are_ignored() {
        let (mut token, _, _) = deploy();
        let stray = DecryptionResult::Public {
            ticket: TicketId(99),
            handle: veilstream_protocol::HandleId::from_bytes([0; 32]),
            value: 5,
        };
        assert!(!token.on_decryption_result(&stray));
    }
}
