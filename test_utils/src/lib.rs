//! Header miners and payload builders for tests.
//!
//! Everything here works on plain headers and never touches a tree, so the
//! helpers serve unit and integration tests alike. Mining only terminates
//! in reasonable time at regtest difficulty.

use std::sync::atomic::{AtomicU64, Ordering};

use pop_common::arith::hash_to_ubig;
use pop_common::crypto::sha256;
use pop_common::{
    AltBlock, AltChainParams, AltHash, AltPayloads, Atv, BtcBlock, BtcChainParams, PublicationData,
    VbkBlock, VbkChainParams, VbkPopTx, Vtb,
};

static SEED: AtomicU64 = AtomicU64::new(1);

/// A fresh value, so that sibling blocks and payloads never collide.
fn next_seed() -> u64 {
    SEED.fetch_add(1, Ordering::Relaxed)
}

pub fn btc_params() -> BtcChainParams {
    BtcChainParams::regtest()
}

pub fn vbk_params() -> VbkChainParams {
    VbkChainParams::regtest()
}

/// First ALT block of the test chain.
pub fn alt_genesis() -> AltBlock {
    AltBlock {
        hash: sha256(&[b"alt-genesis"]),
        previous_block: AltHash::default(),
        height: 0,
        timestamp: 1_600_000_000,
    }
}

pub fn alt_params() -> AltChainParams {
    AltChainParams::new(0x3ae6ca, alt_genesis())
}

/// BTC header on top of `prev` with the same bits.
pub fn mine_btc(prev: &BtcBlock) -> BtcBlock {
    let seed = next_seed();
    let mut block = BtcBlock {
        version: 0x2000_0000,
        previous_block: prev.hash(),
        merkle_root: sha256(&[b"btc", &seed.to_le_bytes()]),
        timestamp: prev.timestamp + 1,
        bits: prev.bits,
        nonce: 0,
    };
    let target = block.target().expect("mined on valid bits");
    while hash_to_ubig(block.hash().as_ref()) > target {
        block.nonce += 1;
    }
    block
}

/// `count` BTC headers chained on `prev`.
pub fn mine_btc_chain(prev: &BtcBlock, count: usize) -> Vec<BtcBlock> {
    let mut blocks: Vec<BtcBlock> = Vec::with_capacity(count);
    for _ in 0..count {
        let next = mine_btc(blocks.last().unwrap_or(prev));
        blocks.push(next);
    }
    blocks
}

/// VBK header on top of `prev` with the same difficulty.
pub fn mine_vbk(prev: &VbkBlock) -> VbkBlock {
    let seed = next_seed();
    let prev_hash = prev.hash();
    let mut block = VbkBlock {
        height: prev.height + 1,
        version: prev.version,
        previous_block: prev_hash,
        previous_keystone: prev_hash.prefix::<9>(),
        second_previous_keystone: prev.previous_keystone,
        merkle_root: sha256(&[b"vbk", &seed.to_le_bytes()]).prefix::<16>(),
        timestamp: prev.timestamp + 1,
        difficulty: prev.difficulty,
        nonce: seed,
    };
    let target = block.target().expect("mined on valid difficulty");
    while hash_to_ubig(block.hash().as_ref()) > target {
        block.nonce += 1;
    }
    block
}

pub fn mine_vbk_chain(prev: &VbkBlock, count: usize) -> Vec<VbkBlock> {
    let mut blocks: Vec<VbkBlock> = Vec::with_capacity(count);
    for _ in 0..count {
        let next = mine_vbk(blocks.last().unwrap_or(prev));
        blocks.push(next);
    }
    blocks
}

/// ALT header on top of `prev`.
pub fn mine_alt(prev: &AltBlock) -> AltBlock {
    let seed = next_seed();
    AltBlock {
        hash: sha256(&[b"alt", prev.hash.as_ref(), &seed.to_le_bytes()]),
        previous_block: prev.hash,
        height: prev.height + 1,
        timestamp: prev.timestamp + 1,
    }
}

pub fn mine_alt_chain(prev: &AltBlock, count: usize) -> Vec<AltBlock> {
    let mut blocks: Vec<AltBlock> = Vec::with_capacity(count);
    for _ in 0..count {
        let next = mine_alt(blocks.last().unwrap_or(prev));
        blocks.push(next);
    }
    blocks
}

/// VTB publishing `published` in `block_of_proof`, contained in
/// `containing`. `context` connects the block of proof to known headers.
pub fn make_vtb(
    published: &VbkBlock,
    block_of_proof: &BtcBlock,
    context: Vec<BtcBlock>,
    containing: &VbkBlock,
) -> Vtb {
    let seed = next_seed();
    let mut bitcoin_transaction = b"pop".to_vec();
    bitcoin_transaction.extend_from_slice(published.hash().as_ref());
    bitcoin_transaction.extend_from_slice(&seed.to_le_bytes());
    Vtb {
        transaction: VbkPopTx {
            published_block: published.clone(),
            bitcoin_transaction,
            block_of_proof: block_of_proof.clone(),
            block_of_proof_context: context,
        },
        containing_block: containing.clone(),
    }
}

/// ATV publishing `endorsed` in the VBK block `containing`.
pub fn make_atv(
    params: &AltChainParams,
    endorsed: &AltBlock,
    payout_info: &[u8],
    containing: &VbkBlock,
    context: Vec<VbkBlock>,
) -> Atv {
    let mut header = endorsed.hash.to_vec();
    header.extend_from_slice(&endorsed.height.to_be_bytes());
    Atv {
        publication_data: PublicationData {
            identifier: params.identifier,
            header,
            payout_info: payout_info.to_vec(),
        },
        containing_block: containing.clone(),
        context,
    }
}

pub fn make_alt_payloads(
    endorsed: &AltBlock,
    atv: Atv,
    vtbs: Vec<Vtb>,
    vbk_context: Vec<VbkBlock>,
) -> AltPayloads {
    AltPayloads {
        endorsed: endorsed.clone(),
        atv,
        vtbs,
        vbk_context,
    }
}
