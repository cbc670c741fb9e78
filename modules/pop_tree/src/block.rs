//! The per-chain seam of the block trees.
//!
//! Every tree is generic over a [`Block`]: the header type plus everything
//! the tree needs to know about its chain (how to hash, how much work a
//! header carries, which checks run before insertion). The three chains
//! differ only here.

use std::convert::Infallible;
use std::fmt;
use std::hash::Hash as StdHash;

use dashu_int::UBig;
use pop_common::arith::{decode_compact, encode_compact};
use pop_common::{
    AltBlock, AltChainParams, BtcBlock, BtcChainParams, BtcHash, Endorsement, PayloadId,
    ValidationError, ValidationResult, VbkBlock, VbkChainParams,
};

use crate::block_index::BlockIndex;
use crate::block_tree::BlockTree;
use crate::command::{AltCommand, CommandInfo, VbkCommand};

pub type HashOf<B> = <B as Block>::Hash;
pub type CommandOf<B> = <B as Block>::Command;
pub type EndorsementOf<B> = <B as Block>::Endorsement;

/// Blocks used to compute the median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// What the generic tree code reads from an endorsement.
pub trait EndorsementRecord: fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Hash type of the endorsed chain.
    type Protected;

    fn id(&self) -> PayloadId;
    fn endorsed_hash(&self) -> &Self::Protected;
    fn endorsed_height(&self) -> u32;
    fn containing_hash(&self) -> &Self::Protected;
    fn payout_info(&self) -> &[u8];
    /// Block of proof, for error reporting.
    fn block_of_proof_string(&self) -> String;
}

impl<A, P> EndorsementRecord for Endorsement<A, P>
where
    A: fmt::Debug + fmt::Display + Send + Sync + 'static,
    P: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    type Protected = A;

    fn id(&self) -> PayloadId {
        self.id
    }

    fn endorsed_hash(&self) -> &A {
        &self.endorsed_hash
    }

    fn endorsed_height(&self) -> u32 {
        self.endorsed_height
    }

    fn containing_hash(&self) -> &A {
        &self.containing_hash
    }

    fn payout_info(&self) -> &[u8] {
        &self.payout_info
    }

    fn block_of_proof_string(&self) -> String {
        self.block_of_proof.to_string()
    }
}

// BTC blocks are never endorsed
impl EndorsementRecord for Infallible {
    type Protected = BtcHash;

    fn id(&self) -> PayloadId {
        match *self {}
    }

    fn endorsed_hash(&self) -> &BtcHash {
        match *self {}
    }

    fn endorsed_height(&self) -> u32 {
        match *self {}
    }

    fn containing_hash(&self) -> &BtcHash {
        match *self {}
    }

    fn payout_info(&self) -> &[u8] {
        match *self {}
    }

    fn block_of_proof_string(&self) -> String {
        match *self {}
    }
}

/// A header a [`BlockTree`] can hold.
pub trait Block: Clone + fmt::Debug + Send + Sync + Sized + 'static {
    type Hash: Copy
        + Eq
        + Ord
        + StdHash
        + Default
        + fmt::Debug
        + fmt::Display
        + Send
        + Sync
        + 'static;
    type Params: fmt::Debug + Send + Sync + 'static;
    /// Payload commands replayed when the block joins the applied chain.
    type Command: CommandInfo + Clone + fmt::Debug + Send + Sync + 'static;
    /// Endorsements a block of this chain may contain.
    type Endorsement: EndorsementRecord<Protected = Self::Hash>;

    /// Short chain name for logs and command descriptions.
    const NAME: &'static str;

    fn hash(&self) -> Self::Hash;
    fn previous_block(&self) -> Self::Hash;
    fn timestamp(&self) -> u32;
    /// Work this header adds to its chain.
    fn block_proof(&self) -> UBig;

    /// First block of the network and the height it sits at.
    fn genesis(params: &Self::Params) -> (u32, Self);
    /// Minimum number of blocks accepted by a chain bootstrap.
    fn min_bootstrap_blocks(params: &Self::Params) -> usize;

    /// Context-free checks.
    fn check(&self, params: &Self::Params) -> ValidationResult<()>;

    /// Checks against the parent and its ancestors already in `tree`.
    fn check_contextually(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BlockTree<Self>,
    ) -> ValidationResult<()>;
}

/// Median timestamp of `prev` and up to ten of its ancestors.
pub fn median_time_past<B: Block>(prev: &BlockIndex<B>, tree: &BlockTree<B>) -> u32 {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let mut cursor = Some(prev);
    while let Some(index) = cursor {
        if times.len() == MEDIAN_TIME_SPAN {
            break;
        }
        times.push(index.header.timestamp());
        cursor = index.prev.as_ref().and_then(|h| tree.get_block_index(h));
    }
    times.sort_unstable();
    times[times.len() / 2]
}

fn check_median_time<B: Block>(
    block: &B,
    prev: &BlockIndex<B>,
    tree: &BlockTree<B>,
) -> ValidationResult<()> {
    let median = median_time_past(prev, tree);
    if block.timestamp() <= median {
        return Err(ValidationError::ContextuallyInvalid {
            code: "time-too-old",
            message: format!(
                "{} block timestamp {} is not after median time past {}",
                B::NAME,
                block.timestamp(),
                median
            ),
        }
        .into());
    }
    Ok(())
}

fn check_declared_height<B: Block>(
    declared: u32,
    prev: &BlockIndex<B>,
) -> ValidationResult<()> {
    if declared != prev.height + 1 {
        return Err(ValidationError::ContextuallyInvalid {
            code: "bad-height",
            message: format!(
                "{} block declares height {} but its parent is at {}",
                B::NAME,
                declared,
                prev.height
            ),
        }
        .into());
    }
    Ok(())
}

impl Block for BtcBlock {
    type Hash = BtcHash;
    type Params = BtcChainParams;
    type Command = Infallible;
    type Endorsement = Infallible;

    const NAME: &'static str = "Btc";

    fn hash(&self) -> BtcHash {
        BtcBlock::hash(self)
    }

    fn previous_block(&self) -> BtcHash {
        self.previous_block
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    fn block_proof(&self) -> UBig {
        BtcBlock::block_proof(self)
    }

    fn genesis(params: &BtcChainParams) -> (u32, Self) {
        (0, params.genesis_block.clone())
    }

    fn min_bootstrap_blocks(params: &BtcChainParams) -> usize {
        params.num_blocks_for_bootstrap
    }

    fn check(&self, params: &BtcChainParams) -> ValidationResult<()> {
        BtcBlock::check(self, params)
    }

    fn check_contextually(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BlockTree<Self>,
    ) -> ValidationResult<()> {
        check_median_time(self, prev, tree)?;

        if let Some(expected) = next_work_required(self, prev, tree) {
            if self.bits != expected {
                return Err(ValidationError::ContextuallyInvalid {
                    code: "bad-diffbits",
                    message: format!(
                        "incorrect proof of work: bits {:#010x}, expected {:#010x}",
                        self.bits, expected
                    ),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Bits the block after `prev` must carry, or `None` when the ancestors
/// needed for a retarget are not in the tree.
fn next_work_required(
    block: &BtcBlock,
    prev: &BlockIndex<BtcBlock>,
    tree: &BlockTree<BtcBlock>,
) -> Option<u32> {
    let params = tree.params();
    let interval = params.difficulty_adjustment_interval();
    let limit_bits = encode_compact(&params.pow_limit());

    if (prev.height + 1) % interval != 0 {
        if params.allow_min_difficulty_blocks {
            // a block more than two spacings late may use the minimum difficulty
            if block.timestamp > prev.header.timestamp + params.pow_target_spacing * 2 {
                return Some(limit_bits);
            }
            // otherwise the last block that did not use it
            let mut index = prev;
            while index.height % interval != 0 && index.header.bits == limit_bits {
                match index.prev.as_ref().and_then(|h| tree.get_block_index(h)) {
                    Some(parent) => index = parent,
                    None => break,
                }
            }
            return Some(index.header.bits);
        }
        return Some(prev.header.bits);
    }

    if params.pow_no_retargeting {
        return Some(prev.header.bits);
    }

    let first = tree.ancestor_of(prev, prev.height.checked_sub(interval - 1)?)?;
    let timespan = params.pow_target_timespan as u64;
    let actual = (prev.header.timestamp as u64)
        .saturating_sub(first.header.timestamp as u64)
        .clamp(timespan / 4, timespan * 4);

    let target = decode_compact(prev.header.bits).ok()?;
    let retargeted = target * UBig::from(actual) / UBig::from(timespan);
    let limit = params.pow_limit();
    Some(encode_compact(if retargeted > limit { &limit } else { &retargeted }))
}

impl Block for VbkBlock {
    type Hash = pop_common::VbkHash;
    type Params = VbkChainParams;
    type Command = VbkCommand;
    type Endorsement = pop_common::BtcEndorsement;

    const NAME: &'static str = "Vbk";

    fn hash(&self) -> Self::Hash {
        VbkBlock::hash(self)
    }

    fn previous_block(&self) -> Self::Hash {
        self.previous_block
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    fn block_proof(&self) -> UBig {
        VbkBlock::block_proof(self)
    }

    fn genesis(params: &VbkChainParams) -> (u32, Self) {
        (params.genesis_block.height, params.genesis_block.clone())
    }

    fn min_bootstrap_blocks(params: &VbkChainParams) -> usize {
        params.num_blocks_for_bootstrap
    }

    fn check(&self, params: &VbkChainParams) -> ValidationResult<()> {
        VbkBlock::check(self, params)
    }

    fn check_contextually(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BlockTree<Self>,
    ) -> ValidationResult<()> {
        check_declared_height(self.height, prev)?;
        check_median_time(self, prev, tree)?;
        if tree.params().pow_no_retargeting && self.difficulty != prev.header.difficulty {
            return Err(ValidationError::ContextuallyInvalid {
                code: "bad-difficulty",
                message: format!(
                    "difficulty {:#010x} differs from parent {:#010x}",
                    self.difficulty, prev.header.difficulty
                ),
            }
            .into());
        }
        Ok(())
    }
}

impl Block for AltBlock {
    type Hash = pop_common::AltHash;
    type Params = AltChainParams;
    type Command = AltCommand;
    type Endorsement = pop_common::VbkEndorsement;

    const NAME: &'static str = "Alt";

    fn hash(&self) -> Self::Hash {
        self.hash
    }

    fn previous_block(&self) -> Self::Hash {
        self.previous_block
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Every ALT block weighs the same; PoP decides between branches.
    fn block_proof(&self) -> UBig {
        UBig::ONE
    }

    fn genesis(params: &AltChainParams) -> (u32, Self) {
        (params.bootstrap_block.height, params.bootstrap_block.clone())
    }

    fn min_bootstrap_blocks(_params: &AltChainParams) -> usize {
        1
    }

    fn check(&self, _params: &AltChainParams) -> ValidationResult<()> {
        if self.hash == self.previous_block {
            return Err(ValidationError::StructuralInvalid {
                code: "bad-alt-block",
                message: format!("block {} references itself", self.hash),
            }
            .into());
        }
        Ok(())
    }

    fn check_contextually(
        &self,
        prev: &BlockIndex<Self>,
        _tree: &BlockTree<Self>,
    ) -> ValidationResult<()> {
        check_declared_height(self.height, prev)
    }
}
