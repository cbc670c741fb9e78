//! Application chain block header as seen by the PoP trees.

use crate::hash::AltHash;
use serde::{Deserialize, Serialize};

/// The host chain computes the hash; the trees only link by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltBlock {
    pub hash: AltHash,
    pub previous_block: AltHash,
    pub height: u32,
    pub timestamp: u32,
}

impl AltBlock {
    pub fn hash(&self) -> AltHash {
        self.hash
    }
}
