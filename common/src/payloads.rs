//! Proof payloads carried by protected blocks.
//!
//! A VTB proves that a VBK block was published in BTC. An ATV proves that
//! an ALT block was published in VBK. ALT blocks carry both, bundled into
//! [`AltPayloads`] with the VBK headers needed to connect them.

use crate::alt_block::AltBlock;
use crate::btc_block::BtcBlock;
use crate::crypto::sha256;
use crate::hash::PayloadId;
use crate::vbk_block::VbkBlock;
use serde::{Deserialize, Serialize};

/// VBK transaction publishing a VBK header into BTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbkPopTx {
    /// The endorsed VBK block.
    pub published_block: VbkBlock,
    /// Raw BTC transaction carrying the publication.
    pub bitcoin_transaction: Vec<u8>,
    /// BTC block containing `bitcoin_transaction`.
    pub block_of_proof: BtcBlock,
    /// BTC headers connecting `block_of_proof` to headers the tree knows.
    pub block_of_proof_context: Vec<BtcBlock>,
}

/// VeriBlock-to-Bitcoin proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vtb {
    pub transaction: VbkPopTx,
    /// VBK block containing the proof.
    pub containing_block: VbkBlock,
}

impl Vtb {
    pub fn id(&self) -> PayloadId {
        let tx = sha256(&[&self.transaction.bitcoin_transaction]);
        sha256(&[tx.as_ref(), self.transaction.block_of_proof.hash().as_ref()])
    }
}

/// What an ALT block publishes into VBK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationData {
    /// Identifier of the ALT chain.
    pub identifier: u64,
    /// Serialized endorsed ALT header.
    pub header: Vec<u8>,
    /// Opaque payout identity of the PoP miner.
    pub payout_info: Vec<u8>,
}

/// ALT-to-VeriBlock proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atv {
    pub publication_data: PublicationData,
    /// VBK block containing the publication transaction.
    pub containing_block: VbkBlock,
    /// VBK headers connecting `containing_block` to known headers.
    pub context: Vec<VbkBlock>,
}

impl Atv {
    pub fn id(&self) -> PayloadId {
        let identifier = self.publication_data.identifier.to_be_bytes();
        sha256(&[
            &identifier,
            &self.publication_data.header,
            &self.publication_data.payout_info,
            self.containing_block.hash().as_ref(),
        ])
    }
}

/// Everything an ALT block carries for PoP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltPayloads {
    /// ALT block endorsed by `atv`.
    pub endorsed: AltBlock,
    pub atv: Atv,
    pub vtbs: Vec<Vtb>,
    /// VBK headers preceding everything else.
    pub vbk_context: Vec<VbkBlock>,
}
