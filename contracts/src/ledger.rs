//! # Encrypted Ledger
//!
//! Account → encrypted balance, plus encrypted allowances for delegated
//! spending. The ledger never sees a plaintext amount except at `mint`,
//! where the amount is a public input and the total supply is tracked in
//! the clear.
//!
//! ## Invariants
//!
//! - **Conservation**: a settlement debits exactly what it credits. The
//!   moved value is one handle, `min(requested, balance)`, subtracted from
//!   the sender and added to the receiver.
//! - **Non-negativity**: the debit never exceeds the balance it is taken
//!   from, so the clamped subtraction never actually clamps.
//! - **Visibility**: every balance or allowance handle written here is
//!   granted to its owner(s) and to the contract before the call returns.
//!
//! ## Two-phase settlement
//!
//! All homomorphic work happens in [`EncryptedLedger::prepare_settlement`],
//! which only reads state. [`EncryptedLedger::apply`] then writes the
//! prepared handles and cannot fail. Callers that need several steps
//! (stream settlement, `transfer_from`) prepare everything first and commit
//! last, so an error anywhere leaves the ledger untouched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use veilstream_protocol::config::TokenConfig;
use veilstream_protocol::fhe::{EncryptedInput, FheBackend, Handle, InputBinding};
use veilstream_protocol::{AccessControlRegistry, Address};

use crate::error::ContractError;

/// Public ERC-20 style metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl From<&TokenConfig> for TokenMetadata {
    fn from(config: &TokenConfig) -> Self {
        Self {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            decimals: config.decimals,
        }
    }
}

/// A prepared, not yet committed, movement of encrypted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub from: Address,
    pub to: Address,
    /// `min(requested, balance(from))`.
    pub moved: Handle,
    /// Encrypted bool: whether the full requested amount was covered.
    pub honoured: Handle,
    from_balance: Handle,
    to_balance: Handle,
}

impl Settlement {
    /// Sender's balance after commit.
    pub fn from_balance(&self) -> Handle {
        self.from_balance
    }

    /// Receiver's balance after commit.
    pub fn to_balance(&self) -> Handle {
        self.to_balance
    }
}

#[derive(Debug)]
pub struct EncryptedLedger {
    contract: Address,
    metadata: TokenMetadata,
    balances: HashMap<Address, Handle>,
    allowances: HashMap<Address, HashMap<Address, Handle>>,
    total_supply: u64,
}

impl EncryptedLedger {
    pub fn new(contract: Address, metadata: TokenMetadata) -> Self {
        Self {
            contract,
            metadata,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            total_supply: 0,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.metadata
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    /// Current balance handle. `None` until the account first receives funds.
    pub fn balance_of(&self, account: &Address) -> Option<Handle> {
        self.balances.get(account).copied()
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Option<Handle> {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
    }

    /// Number of accounts holding a balance handle.
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Iterate over every account and its balance handle.
    pub fn balances(&self) -> impl Iterator<Item = (&Address, &Handle)> {
        self.balances.iter()
    }

    // -----------------------------------------------------------------------
    // Mint
    // -----------------------------------------------------------------------

    /// Credit `amount` to `to` and grow the supply by the same amount.
    pub fn mint(
        &mut self,
        backend: &dyn FheBackend,
        acl: &mut AccessControlRegistry,
        to: Address,
        amount: u64,
    ) -> Result<Handle, ContractError> {
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(ContractError::SupplyOverflow { amount })?;

        let minted = backend.trivial_encrypt(amount)?;
        let balance = match self.balances.get(&to) {
            Some(current) => backend.add(current, &minted)?,
            None => minted,
        };

        self.total_supply = total_supply;
        self.balances.insert(to, balance);
        acl.grant_all(&balance, [to, self.contract]);

        tracing::info!(%to, handle = %balance.id, total_supply, "minted");
        Ok(balance)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Compute the handles for moving `min(requested, balance(from))` from
    /// `from` to `to`. Reads only.
    ///
    /// A self-settlement is value-neutral: both sides keep the current balance.
    pub fn prepare_settlement(
        &self,
        backend: &dyn FheBackend,
        from: Address,
        to: Address,
        requested: &Handle,
    ) -> Result<Settlement, ContractError> {
        let available = self.balance_or_zero(backend, &from)?;
        let moved = backend.min(requested, &available)?;
        let honoured = backend.le(requested, &available)?;

        let (from_balance, to_balance) = if from == to {
            (available, available)
        } else {
            let debited = backend.sub_clamped(&available, &moved)?;
            let current_to = self.balance_or_zero(backend, &to)?;
            let credited = backend.add(&current_to, &moved)?;
            (debited, credited)
        };

        Ok(Settlement {
            from,
            to,
            moved,
            honoured,
            from_balance,
            to_balance,
        })
    }

    /// Commit a prepared settlement and grant every resulting handle.
    pub fn apply(&mut self, settlement: &Settlement, acl: &mut AccessControlRegistry) {
        let Settlement {
            from,
            to,
            moved,
            honoured,
            from_balance,
            to_balance,
        } = *settlement;

        self.balances.insert(from, from_balance);
        self.balances.insert(to, to_balance);

        acl.grant_all(&from_balance, [from, self.contract]);
        acl.grant_all(&to_balance, [to, self.contract]);
        acl.grant_all(&moved, [from, to, self.contract]);
        acl.grant_all(&honoured, [from, self.contract]);
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Move an encrypted amount from `from` to `to`, clamped to `from`'s
    /// balance. The input must have been produced for `from`.
    pub fn transfer(
        &mut self,
        backend: &dyn FheBackend,
        acl: &mut AccessControlRegistry,
        from: Address,
        to: Address,
        amount: &EncryptedInput,
    ) -> Result<Settlement, ContractError> {
        let requested = self.verify_input(backend, amount, from)?;
        let settlement = self.prepare_settlement(backend, from, to, &requested)?;
        self.apply(&settlement, acl);

        tracing::info!(%from, %to, moved = %settlement.moved.id, "transfer");
        Ok(settlement)
    }

    /// Set `spender`'s allowance over `owner`'s balance, replacing any
    /// previous allowance.
    pub fn approve(
        &mut self,
        backend: &dyn FheBackend,
        acl: &mut AccessControlRegistry,
        owner: Address,
        spender: Address,
        amount: &EncryptedInput,
    ) -> Result<Handle, ContractError> {
        let allowance = self.verify_input(backend, amount, owner)?;
        self.allowances
            .entry(owner)
            .or_default()
            .insert(spender, allowance);
        acl.grant_all(&allowance, [owner, spender, self.contract]);

        tracing::info!(%owner, %spender, handle = %allowance.id, "approval");
        Ok(allowance)
    }

    /// Spend from `from`'s balance on the strength of `spender`'s allowance.
    ///
    /// Moves `min(amount, allowance, balance(from))` and lowers the
    /// allowance by the moved value. The input must have been produced for
    /// `spender`.
    pub fn transfer_from(
        &mut self,
        backend: &dyn FheBackend,
        acl: &mut AccessControlRegistry,
        spender: Address,
        from: Address,
        to: Address,
        amount: &EncryptedInput,
    ) -> Result<Settlement, ContractError> {
        let requested = self.verify_input(backend, amount, spender)?;
        let allowance = match self.allowance(&from, &spender) {
            Some(handle) => handle,
            None => backend.trivial_encrypt(0)?,
        };

        let capped = backend.min(&requested, &allowance)?;
        let settlement = self.prepare_settlement(backend, from, to, &capped)?;
        let remaining = backend.sub_clamped(&allowance, &settlement.moved)?;

        self.apply(&settlement, acl);
        self.allowances
            .entry(from)
            .or_default()
            .insert(spender, remaining);
        acl.grant_all(&remaining, [from, spender, self.contract]);
        acl.grant(&settlement.moved, spender);

        tracing::info!(%spender, %from, %to, moved = %settlement.moved.id, "transfer_from");
        Ok(settlement)
    }

    /// Record `handle` as `account`'s first balance and grant it to the
    /// owner and the contract. No-op if the account already holds one.
    pub(crate) fn install_balance(
        &mut self,
        acl: &mut AccessControlRegistry,
        account: Address,
        handle: Handle,
    ) {
        if self.balances.contains_key(&account) {
            return;
        }
        self.balances.insert(account, handle);
        acl.grant_all(&handle, [account, self.contract]);
    }

    pub(crate) fn balance_or_zero(
        &self,
        backend: &dyn FheBackend,
        account: &Address,
    ) -> Result<Handle, ContractError> {
        match self.balance_of(account) {
            Some(handle) => Ok(handle),
            None => Ok(backend.trivial_encrypt(0)?),
        }
    }

    pub(crate) fn verify_input(
        &self,
        backend: &dyn FheBackend,
        input: &EncryptedInput,
        user: Address,
    ) -> Result<Handle, ContractError> {
        let binding = InputBinding {
            contract: self.contract,
            user,
        };
        backend.verify_input(input, &binding).map_err(|e| {
            tracing::warn!(%user, error = %e, "encrypted input rejected");
            ContractError::invalid_input(e)
        })
    }
}
