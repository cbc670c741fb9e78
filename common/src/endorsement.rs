//! Endorsements extracted from proof payloads.

use crate::hash::{AltHash, BtcHash, PayloadId, VbkHash};
use crate::payloads::{AltPayloads, Vtb};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binds a block of the protected chain to a block of proof in the
/// protecting chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endorsement<Protected, Protecting> {
    pub id: PayloadId,
    pub endorsed_hash: Protected,
    pub endorsed_height: u32,
    /// Protected block carrying the proof.
    pub containing_hash: Protected,
    pub block_of_proof: Protecting,
    /// Payout identity; empty for BTC endorsements.
    pub payout_info: Vec<u8>,
}

/// VBK block endorsed in BTC, created from a VTB.
pub type BtcEndorsement = Endorsement<VbkHash, BtcHash>;

/// ALT block endorsed in VBK, created from an ATV.
pub type VbkEndorsement = Endorsement<AltHash, VbkHash>;

impl BtcEndorsement {
    pub fn from_vtb(vtb: &Vtb) -> Self {
        let published = &vtb.transaction.published_block;
        Self {
            id: vtb.id(),
            endorsed_hash: published.hash(),
            endorsed_height: published.height,
            containing_hash: vtb.containing_block.hash(),
            block_of_proof: vtb.transaction.block_of_proof.hash(),
            payout_info: Vec::new(),
        }
    }
}

impl VbkEndorsement {
    pub fn from_payloads(containing: AltHash, payloads: &AltPayloads) -> Self {
        Self {
            id: payloads.atv.id(),
            endorsed_hash: payloads.endorsed.hash,
            endorsed_height: payloads.endorsed.height,
            containing_hash: containing,
            block_of_proof: payloads.atv.containing_block.hash(),
            payout_info: payloads.atv.publication_data.payout_info.clone(),
        }
    }
}

impl<A: fmt::Display, B: fmt::Display> fmt::Display for Endorsement<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Endorsement{{id={}, endorsed={}@{}, containing={}, proof={}}}",
            self.id, self.endorsed_hash, self.endorsed_height, self.containing_hash, self.block_of_proof
        )
    }
}
