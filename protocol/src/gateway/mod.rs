//! # Disclosure Gateway
//!
//! The only way a plaintext leaves the encrypted domain. A holder signs a
//! structured reencryption request naming the handle, themselves, the
//! contract and an X25519 key; the gateway checks the
//! [`AccessControlRegistry`] and the signature, then forwards a job to the
//! [`DecryptionOracle`] and returns a [`PendingDisclosure`] ticket.
//!
//! ## Check order
//!
//! 1. Requester **and** contract must be grantees of the handle, else
//!    [`DisclosureError::Unauthorized`]. A valid signature for some other
//!    handle does not help.
//! 2. The requester key must own the requester address and the signature
//!    must verify, else [`DisclosureError::InvalidSignature`].
//! 3. The oracle must accept the job.
//!
//! Nothing is forwarded unless all three pass.

pub mod oracle;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::acl::AccessControlRegistry;
use crate::config::{REENCRYPTION_KEY_LENGTH, REENCRYPT_DOMAIN_NAME, REENCRYPT_DOMAIN_VERSION};
use crate::crypto::{sha256_parts, AccountKeypair, AccountPublicKey, AccountSignature, Address};
use crate::fhe::{Handle, HandleId};

pub use oracle::{
    open_reencrypted, DecryptionJob, DecryptionKind, DecryptionOracle, DecryptionResult,
    LocalOracle, OracleError, TicketId,
};

#[derive(Debug, Error)]
pub enum DisclosureError {
    #[error("User is not authorized to reencrypt this handle!")]
    Unauthorized,

    #[error("reencryption signature is invalid")]
    InvalidSignature,

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// A signed request to have one handle reencrypted to the requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReencryptRequest {
    pub handle: Handle,
    pub requester: Address,
    pub requester_key: AccountPublicKey,
    #[serde(with = "oracle::hex_key")]
    pub reencryption_key: [u8; REENCRYPTION_KEY_LENGTH],
    pub signature: AccountSignature,
}

impl ReencryptRequest {
    /// Build and sign a request as `keypair`'s account.
    pub fn sign(
        keypair: &AccountKeypair,
        handle: Handle,
        contract: Address,
        chain_id: u64,
        reencryption_key: [u8; REENCRYPTION_KEY_LENGTH],
    ) -> Self {
        let requester = keypair.address();
        let message =
            authorization_message(chain_id, &contract, &handle.id, &requester, &reencryption_key);
        Self {
            handle,
            requester,
            requester_key: keypair.public_key(),
            reencryption_key,
            signature: keypair.sign(&message),
        }
    }
}

/// The digest a requester signs.
pub fn authorization_message(
    chain_id: u64,
    contract: &Address,
    handle: &HandleId,
    requester: &Address,
    reencryption_key: &[u8; REENCRYPTION_KEY_LENGTH],
) -> [u8; 32] {
    sha256_parts(&[
        REENCRYPT_DOMAIN_NAME.as_bytes(),
        REENCRYPT_DOMAIN_VERSION.as_bytes(),
        &chain_id.to_be_bytes(),
        contract.as_bytes(),
        handle.as_bytes(),
        requester.as_bytes(),
        reencryption_key,
    ])
}

/// Receipt for an accepted disclosure request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDisclosure {
    pub ticket: TicketId,
    pub handle: HandleId,
    pub requester: Address,
}

/// Validates disclosure requests for one contract and forwards them.
pub struct DisclosureGateway {
    contract: Address,
    chain_id: u64,
    oracle: Arc<dyn DecryptionOracle>,
}

impl DisclosureGateway {
    pub fn new(contract: Address, chain_id: u64, oracle: Arc<dyn DecryptionOracle>) -> Self {
        Self {
            contract,
            chain_id,
            oracle,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn request_disclosure(
        &self,
        acl: &AccessControlRegistry,
        request: &ReencryptRequest,
    ) -> Result<PendingDisclosure, DisclosureError> {
        let handle = request.handle.id;

        if !acl.is_authorized(&handle, &request.requester)
            || !acl.is_authorized(&handle, &self.contract)
        {
            tracing::warn!(%handle, requester = %request.requester, "disclosure rejected: not a grantee");
            return Err(DisclosureError::Unauthorized);
        }

        if request.requester_key.address() != request.requester {
            tracing::warn!(%handle, requester = %request.requester, "disclosure rejected: key does not own address");
            return Err(DisclosureError::InvalidSignature);
        }
        let message = authorization_message(
            self.chain_id,
            &self.contract,
            &handle,
            &request.requester,
            &request.reencryption_key,
        );
        if !request.requester_key.verify(&message, &request.signature) {
            tracing::warn!(%handle, requester = %request.requester, "disclosure rejected: bad signature");
            return Err(DisclosureError::InvalidSignature);
        }

        let ticket = self.oracle.submit(DecryptionJob {
            handle: request.handle,
            requester: request.requester,
            kind: DecryptionKind::Reencrypt {
                reencryption_key: request.reencryption_key,
            },
        })?;
        tracing::info!(%ticket, %handle, requester = %request.requester, "disclosure forwarded to oracle");

        Ok(PendingDisclosure {
            ticket,
            handle,
            requester: request.requester,
        })
    }

    /// Contract-initiated decryption on behalf of `requester`. The contract
    /// itself must be a grantee of the handle.
    pub fn request_public_decryption(
        &self,
        acl: &AccessControlRegistry,
        handle: &Handle,
        requester: Address,
    ) -> Result<PendingDisclosure, DisclosureError> {
        if !acl.is_authorized(&handle.id, &self.contract) {
            return Err(DisclosureError::Unauthorized);
        }
        let ticket = self.oracle.submit(DecryptionJob {
            handle: *handle,
            requester,
            kind: DecryptionKind::Public,
        })?;
        tracing::info!(%ticket, handle = %handle.id, %requester, "public decryption requested");
        Ok(PendingDisclosure {
            ticket,
            handle: handle.id,
            requester,
        })
    }
}

impl std::fmt::Debug for DisclosureGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisclosureGateway")
            .field("contract", &self.contract)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}
