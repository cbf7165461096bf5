//! # Access Control Registry
//!
//! Per-handle allow-lists of the addresses that may ask for a ciphertext's
//! plaintext. Contracts write a grant for every handle they hand out; the
//! [`DisclosureGateway`](crate::gateway::DisclosureGateway) reads the
//! registry before anything is forwarded to the decryption oracle.
//!
//! Grants are never revoked. A handle is immutable, so "Alice may see the
//! balance she had after block 12" stays true forever; when her balance
//! changes she receives a grant on the new handle instead.

use std::collections::{HashMap, HashSet};

use crate::crypto::Address;
use crate::fhe::{Handle, HandleId};

/// Explicit handle → grantees mapping.
#[derive(Debug, Default, Clone)]
pub struct AccessControlRegistry {
    grants: HashMap<HandleId, HashSet<Address>>,
}

impl AccessControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `grantee` to request disclosure of `handle`.
    ///
    /// Idempotent. Returns `true` if the grant is new.
    pub fn grant(&mut self, handle: &Handle, grantee: Address) -> bool {
        let added = self.grants.entry(handle.id).or_default().insert(grantee);
        if added {
            tracing::trace!(handle = %handle.id, %grantee, "access granted");
        }
        added
    }

    /// Grant `handle` to every address in `grantees`.
    pub fn grant_all(&mut self, handle: &Handle, grantees: impl IntoIterator<Item = Address>) {
        for grantee in grantees {
            self.grant(handle, grantee);
        }
    }

    pub fn is_authorized(&self, handle: &HandleId, address: &Address) -> bool {
        self.grants
            .get(handle)
            .is_some_and(|grantees| grantees.contains(address))
    }

    /// Every address allowed to see `handle`, sorted.
    pub fn grantees(&self, handle: &HandleId) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .grants
            .get(handle)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Number of handles with at least one grant.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::{CleartextCoprocessor, FheBackend};

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn grant_is_idempotent() {
        let cop = CleartextCoprocessor::new();
        let handle = cop.trivial_encrypt(1).unwrap();
        let mut acl = AccessControlRegistry::new();

        assert!(acl.grant(&handle, addr(1)));
        assert!(!acl.grant(&handle, addr(1)));
        assert_eq!(acl.grantees(&handle.id), vec![addr(1)]);
        assert_eq!(acl.len(), 1);
    }

    #[test]
    fn authorization_is_per_handle() {
        let cop = CleartextCoprocessor::new();
        let alice_balance = cop.trivial_encrypt(10).unwrap();
        let bob_balance = cop.trivial_encrypt(20).unwrap();
        let mut acl = AccessControlRegistry::new();

        acl.grant(&alice_balance, addr(0xa1));
        acl.grant(&bob_balance, addr(0xb0));

        assert!(acl.is_authorized(&alice_balance.id, &addr(0xa1)));
        assert!(!acl.is_authorized(&alice_balance.id, &addr(0xb0)));
        assert!(!acl.is_authorized(&bob_balance.id, &addr(0xa1)));
    }

    #[test]
    fn unknown_handle_authorizes_nobody() {
        let acl = AccessControlRegistry::new();
        assert!(acl.is_empty());
        assert!(!acl.is_authorized(&HandleId::from_bytes([0; 32]), &addr(1)));
        assert!(acl.grantees(&HandleId::from_bytes([0; 32])).is_empty());
    }

    #[test]
    fn grant_all_sorts_grantees() {
        let cop = CleartextCoprocessor::new();
        let handle = cop.trivial_encrypt(5).unwrap();
        let mut acl = AccessControlRegistry::new();

        acl.grant_all(&handle, [addr(3), addr(1), addr(2), addr(1)]);
        assert_eq!(acl.grantees(&handle.id), vec![addr(1), addr(2), addr(3)]);
    }
}
