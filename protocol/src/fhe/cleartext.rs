//! In-process coprocessor that keeps plaintexts in a table behind opaque
//! handles. Development nodes and tests use it in place of a real FHE
//! backend. Contracts cannot tell the difference: they only ever see
//! handles and only ever call [`FheBackend`].

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    Decryptor, EncryptedInput, FheBackend, FheError, FheType, Handle, HandleId, InputBinding,
    InputProof,
};
use crate::config::{HANDLE_DERIVATION_CONTEXT, HANDLE_SCHEME_VERSION, INPUT_PROOF_DOMAIN};
use crate::crypto::hash::derive_hash;
use crate::crypto::{AccountKeypair, AccountPublicKey, AccountSignature};

#[derive(Debug, Clone, Copy)]
struct Plaintext {
    fhe_type: FheType,
    value: u64,
}

pub struct CleartextCoprocessor {
    signer: AccountKeypair,
    values: RwLock<HashMap<HandleId, Plaintext>>,
    nonce: AtomicU64,
}

impl CleartextCoprocessor {
    /// A coprocessor with a freshly generated proof-signing key.
    pub fn new() -> Self {
        Self::with_signer(AccountKeypair::generate())
    }

    pub fn with_signer(signer: AccountKeypair) -> Self {
        Self {
            signer,
            values: RwLock::new(HashMap::new()),
            nonce: AtomicU64::new(0),
        }
    }

    /// Key that input proofs are checked against.
    pub fn signer_public_key(&self) -> AccountPublicKey {
        self.signer.public_key()
    }

    /// Encrypt `value` for use by `binding.user` in `binding.contract`.
    ///
    /// This is the client-side input builder: the returned proof verifies
    /// only for that exact contract and user.
    pub fn encrypt_input(&self, value: u64, binding: &InputBinding) -> EncryptedInput {
        let handle = self.store(FheType::Uint64, value);
        let signature = self.signer.sign(&proof_message(&handle.id, binding));
        EncryptedInput {
            handle,
            proof: InputProof(signature.as_bytes().to_vec()),
        }
    }

    /// Number of ciphertexts held.
    pub fn handle_count(&self) -> usize {
        self.values.read().len()
    }

    fn store(&self, fhe_type: FheType, value: u64) -> Handle {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let id = HandleId::from_bytes(derive_hash(
            HANDLE_DERIVATION_CONTEXT,
            &[self.signer.public_key().as_bytes(), &nonce.to_be_bytes()],
        ));
        self.values.write().insert(id, Plaintext { fhe_type, value });
        Handle {
            id,
            fhe_type,
            scheme_version: HANDLE_SCHEME_VERSION,
        }
    }

    fn load(&self, handle: &Handle, expected: FheType) -> Result<u64, FheError> {
        let plaintext = self
            .values
            .read()
            .get(&handle.id)
            .copied()
            .ok_or(FheError::UnknownHandle(handle.id))?;
        if plaintext.fhe_type != expected || handle.fhe_type != expected {
            return Err(FheError::TypeMismatch {
                expected,
                found: plaintext.fhe_type,
            });
        }
        Ok(plaintext.value)
    }

    fn binary(
        &self,
        lhs: &Handle,
        rhs: &Handle,
        out: FheType,
        op: impl FnOnce(u64, u64) -> u64,
    ) -> Result<Handle, FheError> {
        let a = self.load(lhs, FheType::Uint64)?;
        let b = self.load(rhs, FheType::Uint64)?;
        Ok(self.store(out, op(a, b)))
    }
}

impl Default for CleartextCoprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CleartextCoprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleartextCoprocessor")
            .field("signer", &self.signer.address())
            .field("handles", &self.handle_count())
            .finish()
    }
}

fn proof_message(id: &HandleId, binding: &InputBinding) -> Vec<u8> {
    let mut msg = Vec::with_capacity(INPUT_PROOF_DOMAIN.len() + 32 + 40);
    msg.extend_from_slice(INPUT_PROOF_DOMAIN);
    msg.extend_from_slice(id.as_bytes());
    msg.extend_from_slice(binding.contract.as_bytes());
    msg.extend_from_slice(binding.user.as_bytes());
    msg
}

impl FheBackend for CleartextCoprocessor {
    fn verify_input(
        &self,
        input: &EncryptedInput,
        binding: &InputBinding,
    ) -> Result<Handle, FheError> {
        self.load(&input.handle, FheType::Uint64)?;
        let signature = AccountSignature::from_vec(input.proof.0.clone());
        if !self
            .signer
            .public_key()
            .verify(&proof_message(&input.handle.id, binding), &signature)
        {
            tracing::debug!(handle = %input.handle.id, user = %binding.user, "input proof rejected");
            return Err(FheError::InvalidProof);
        }
        Ok(input.handle)
    }

    fn trivial_encrypt(&self, value: u64) -> Result<Handle, FheError> {
        Ok(self.store(FheType::Uint64, value))
    }

    fn add(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError> {
        self.binary(lhs, rhs, FheType::Uint64, u64::wrapping_add)
    }

    fn sub_clamped(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError> {
        self.binary(lhs, rhs, FheType::Uint64, u64::saturating_sub)
    }

    fn mul_scalar(&self, lhs: &Handle, scalar: u64) -> Result<Handle, FheError> {
        let a = self.load(lhs, FheType::Uint64)?;
        Ok(self.store(FheType::Uint64, a.wrapping_mul(scalar)))
    }

    fn min(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError> {
        self.binary(lhs, rhs, FheType::Uint64, u64::min)
    }

    fn le(&self, lhs: &Handle, rhs: &Handle) -> Result<Handle, FheError> {
        self.binary(lhs, rhs, FheType::Bool, |a, b| u64::from(a <= b))
    }
}

impl Decryptor for CleartextCoprocessor {
    fn decrypt(&self, handle: &Handle) -> Result<u64, FheError> {
        self.load(handle, handle.fhe_type)
    }
}
