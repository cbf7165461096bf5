//! # Hashing Utilities
//!
//! BLAKE3 for everything Veilstream-native (handle ids, addresses, KDFs);
//! SHA-256 for the structured digests that external signers produce, where
//! compatibility matters more than speed.

use sha2::{Digest, Sha256};

/// Domain-separated BLAKE3 over several parts.
///
/// ```
/// use veilstream_protocol::crypto::derive_hash;
///
/// assert_ne!(derive_hash("ctx", &[b"ab", b"c"]), derive_hash("ctx", &[b"a", b"bc"]));
/// ```
///
/// Each part is length-prefixed, so `("ab", "c")` and `("a", "bc")` never
/// collide.
pub fn derive_hash(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// SHA-256 over length-prefixed parts; the structured-message digest used
/// for signed authorizations.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_hash_is_length_prefixed() {
        let a = derive_hash("ctx", &[b"ab", b"c"]);
        let b = derive_hash("ctx", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_hash_context_separates() {
        assert_ne!(derive_hash("one", &[b"x"]), derive_hash("two", &[b"x"]));
    }

    #[test]
    fn test_sha256_parts_known_vector() {
        assert_eq!(
            hex::encode(sha256_parts(&[])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_parts_is_length_prefixed() {
        assert_ne!(sha256_parts(&[b"ab", b"c"]), sha256_parts(&[b"a", b"bc"]));
    }
}
