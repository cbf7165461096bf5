//! # Decryption Oracle
//!
//! Decryption is the one asynchronous path in Veilstream. The gateway only
//! enqueues a job and hands back a [`TicketId`]; an oracle fulfils jobs later
//! and delivers a [`DecryptionResult`] out of band. A result says nothing
//! about the ledger state at delivery time: operations that ran after the
//! request are not reflected in it.
//!
//! [`LocalOracle`] is the in-process oracle used by development nodes. A
//! threshold network would implement [`DecryptionOracle`] instead.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::REENCRYPTION_KEY_LENGTH;
use crate::crypto::encryption::EncryptionError;
use crate::crypto::{seal, Address, ReencryptionKeypair, SealedBox};
use crate::fhe::{Decryptor, Handle, HandleId};

/// Receipt for a queued decryption job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecryptionKind {
    /// Seal the plaintext to the requester's X25519 key.
    Reencrypt {
        #[serde(with = "hex_key")]
        reencryption_key: [u8; REENCRYPTION_KEY_LENGTH],
    },
    /// Deliver the plaintext to the contract callback.
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionJob {
    pub handle: Handle,
    pub requester: Address,
    pub kind: DecryptionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecryptionResult {
    Reencrypted {
        ticket: TicketId,
        handle: HandleId,
        requester: Address,
        sealed: SealedBox,
    },
    Public {
        ticket: TicketId,
        handle: HandleId,
        value: u64,
    },
    Failed {
        ticket: TicketId,
        handle: HandleId,
        reason: String,
    },
}

impl DecryptionResult {
    pub fn ticket(&self) -> TicketId {
        match self {
            DecryptionResult::Reencrypted { ticket, .. }
            | DecryptionResult::Public { ticket, .. }
            | DecryptionResult::Failed { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("decryption queue is full ({capacity} pending jobs)")]
    QueueFull { capacity: usize },
}

/// Anything that accepts decryption jobs.
pub trait DecryptionOracle: Send + Sync {
    fn submit(&self, job: DecryptionJob) -> Result<TicketId, OracleError>;
}

// ---------------------------------------------------------------------------
// LocalOracle
// ---------------------------------------------------------------------------

/// Bounded FIFO oracle backed by an in-process [`Decryptor`].
pub struct LocalOracle<D: Decryptor> {
    decryptor: Arc<D>,
    queue: Mutex<VecDeque<(TicketId, DecryptionJob)>>,
    next_ticket: AtomicU64,
    capacity: usize,
}

impl<D: Decryptor> LocalOracle<D> {
    pub fn new(decryptor: Arc<D>, capacity: usize) -> Self {
        Self {
            decryptor,
            queue: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(1),
            capacity,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Fulfil every queued job, oldest first.
    ///
    /// A job that cannot be decrypted yields [`DecryptionResult::Failed`];
    /// it never blocks the jobs behind it.
    pub fn fulfill_pending(&self) -> Vec<DecryptionResult> {
        let jobs: Vec<_> = self.queue.lock().drain(..).collect();
        jobs.into_iter()
            .map(|(ticket, job)| self.fulfill(ticket, job))
            .collect()
    }

    fn fulfill(&self, ticket: TicketId, job: DecryptionJob) -> DecryptionResult {
        let handle = job.handle.id;
        let value = match self.decryptor.decrypt(&job.handle) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%ticket, %handle, error = %e, "decryption failed");
                return DecryptionResult::Failed {
                    ticket,
                    handle,
                    reason: e.to_string(),
                };
            }
        };

        match job.kind {
            DecryptionKind::Public => {
                tracing::debug!(%ticket, %handle, "public decryption fulfilled");
                DecryptionResult::Public {
                    ticket,
                    handle,
                    value,
                }
            }
            DecryptionKind::Reencrypt { reencryption_key } => {
                let aad = reencryption_aad(&handle, &job.requester);
                match seal(&reencryption_key, &value.to_le_bytes(), &aad) {
                    Ok(sealed) => {
                        tracing::debug!(%ticket, %handle, requester = %job.requester, "reencryption fulfilled");
                        DecryptionResult::Reencrypted {
                            ticket,
                            handle,
                            requester: job.requester,
                            sealed,
                        }
                    }
                    Err(e) => DecryptionResult::Failed {
                        ticket,
                        handle,
                        reason: e.to_string(),
                    },
                }
            }
        }
    }
}

impl<D: Decryptor> DecryptionOracle for LocalOracle<D> {
    fn submit(&self, job: DecryptionJob) -> Result<TicketId, OracleError> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(OracleError::QueueFull {
                capacity: self.capacity,
            });
        }
        let ticket = TicketId(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        queue.push_back((ticket, job));
        Ok(ticket)
    }
}

/// AAD binding a sealed plaintext to its handle and requester.
pub fn reencryption_aad(handle: &HandleId, requester: &Address) -> Vec<u8> {
    let mut aad = Vec::with_capacity(52);
    aad.extend_from_slice(handle.as_bytes());
    aad.extend_from_slice(requester.as_bytes());
    aad
}

/// Requester side: open a reencrypted value and decode the `u64` inside.
pub fn open_reencrypted(
    keypair: &ReencryptionKeypair,
    sealed: &SealedBox,
    handle: &HandleId,
    requester: &Address,
) -> Result<u64, EncryptionError> {
    let bytes = keypair.open(sealed, &reencryption_aad(handle, requester))?;
    let arr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| EncryptionError::UnexpectedLength {
            expected: 8,
            actual: bytes.len(),
        })?;
    Ok(u64::from_le_bytes(arr))
}

pub(crate) mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("reencryption key must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::{CleartextCoprocessor, FheBackend};

    fn requester() -> Address {
        Address::from_bytes([0xb0; 20])
    }

    #[test]
    fn tickets_are_monotonic() {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = LocalOracle::new(cop.clone(), 8);
        let handle = cop.trivial_encrypt(1).unwrap();
        let job = DecryptionJob {
            handle,
            requester: requester(),
            kind: DecryptionKind::Public,
        };
        let a = oracle.submit(job.clone()).unwrap();
        let b = oracle.submit(job).unwrap();
        assert!(b > a);
        assert_eq!(oracle.pending_count(), 2);
    }

    #[test]
    fn queue_is_bounded() {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = LocalOracle::new(cop.clone(), 1);
        let job = DecryptionJob {
            handle: cop.trivial_encrypt(1).unwrap(),
            requester: requester(),
            kind: DecryptionKind::Public,
        };
        oracle.submit(job.clone()).unwrap();
        assert!(matches!(oracle.submit(job), Err(OracleError::QueueFull { capacity: 1 })));
    }

    #[test]
    fn reencrypted_value_opens_only_for_requester() {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = LocalOracle::new(cop.clone(), 8);
        let handle = cop.trivial_encrypt(8663).unwrap();
        let wallet = ReencryptionKeypair::generate();

        oracle
            .submit(DecryptionJob {
                handle,
                requester: requester(),
                kind: DecryptionKind::Reencrypt {
                    reencryption_key: wallet.public_key_bytes(),
                },
            })
            .unwrap();

        let results = oracle.fulfill_pending();
        assert_eq!(oracle.pending_count(), 0);
        let DecryptionResult::Reencrypted { sealed, .. } = &results[0] else {
            panic!("expected reencrypted result, got {:?}", results[0]);
        };
        assert_eq!(
            open_reencrypted(&wallet, sealed, &handle.id, &requester()).unwrap(),
            8663
        );
        // Sealed to this requester: a different AAD must not open.
        let stranger = Address::from_bytes([0xcc; 20]);
        assert!(open_reencrypted(&wallet, sealed, &handle.id, &stranger).is_err());
    }

    #[test]
    fn unknown_handle_yields_failed_result() {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = LocalOracle::new(cop, 8);
        let foreign = CleartextCoprocessor::new().trivial_encrypt(1).unwrap();
        let ticket = oracle
            .submit(DecryptionJob {
                handle: foreign,
                requester: requester(),
                kind: DecryptionKind::Public,
            })
            .unwrap();
        let results = oracle.fulfill_pending();
        assert!(matches!(&results[0], DecryptionResult::Failed { .. }));
        assert_eq!(results[0].ticket(), ticket);
    }

    #[test]
    fn results_preserve_submission_order() {
        let cop = Arc::new(CleartextCoprocessor::new());
        let oracle = LocalOracle::new(cop.clone(), 8);
        for v in [3u64, 1, 2] {
            oracle
                .submit(DecryptionJob {
                    handle: cop.trivial_encrypt(v).unwrap(),
                    requester: requester(),
                    kind: DecryptionKind::Public,
                })
                .unwrap();
        }
        let values: Vec<u64> = oracle
            .fulfill_pending()
            .into_iter()
            .filter_map(|r| match r {
                DecryptionResult::Public { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![3, 1, 2]);
    }
}
