//! Hashing helpers shared by headers and payload identifiers

use crate::hash::Hash;
use sha2::{Digest, Sha256};

/// Single sha256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> Hash<32> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash::new(hasher.finalize().into())
}

/// Bitcoin-style double sha256.
pub fn sha256d(data: &[u8]) -> Hash<32> {
    let first = sha256(&[data]);
    sha256(&[first.as_ref()])
}
