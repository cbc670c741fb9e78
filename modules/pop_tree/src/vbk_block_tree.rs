//! VeriBlock tree protected by Bitcoin.
//!
//! VBK blocks carry VTBs. Each VTB imports BTC headers into the embedded
//! BTC tree and endorses a VBK block with a BTC block of proof. Forks in
//! the VBK tree are resolved by PoP against the BTC active chain.

use std::cmp::Ordering;
use std::sync::Arc;

use pop_common::{
    BtcBlock, BtcChainParams, BtcEndorsement, PopForkParams, ValidationError, ValidationResult,
    VbkBlock, VbkChainParams, VbkHash, Vtb, WithStack,
};

use crate::block::HashOf;
use crate::block_tree::{BlockTree, ForkChoice};
use crate::command::{Command, CommandId, CommandInfo, VbkCommand};
use crate::fork_resolution::{self, PopTree};
use crate::payloads::vtb_to_commands;

#[derive(Clone)]
pub struct VbkBlockTree {
    tree: BlockTree<VbkBlock>,
    btc: BlockTree<BtcBlock>,
    state_tip: Option<VbkHash>,
}

impl VbkBlockTree {
    pub fn new(vbk_params: Arc<VbkChainParams>, btc_params: Arc<BtcChainParams>) -> Self {
        Self::from_trees(BlockTree::new(vbk_params), BlockTree::new(btc_params))
    }

    /// Wrap trees built elsewhere, e.g. with observers attached. Both must
    /// be empty.
    pub fn from_trees(tree: BlockTree<VbkBlock>, btc: BlockTree<BtcBlock>) -> Self {
        Self {
            tree,
            btc,
            state_tip: None,
        }
    }

    pub fn btc(&self) -> &BlockTree<BtcBlock> {
        &self.btc
    }

    pub fn btc_mut(&mut self) -> &mut BlockTree<BtcBlock> {
        &mut self.btc
    }

    /// Accept a VBK block together with the VTBs it contains. The block is
    /// only kept if every VTB is accepted.
    pub fn accept_block_with_payloads(
        &mut self,
        block: VbkBlock,
        vtbs: &[Vtb],
    ) -> ValidationResult<VbkHash> {
        if vtbs.is_empty() {
            return self.accept_block(block);
        }
        let mut copy = self.clone();
        let hash = copy.accept_block(block)?;
        copy.add_payloads(&hash, vtbs)?;
        *self = copy;
        Ok(hash)
    }

    /// Attach VTBs to `containing`. Returns the id of the first command
    /// appended, which [`remove_payloads`](Self::remove_payloads) takes to
    /// drop them again.
    pub fn add_payloads(
        &mut self,
        containing: &VbkHash,
        vtbs: &[Vtb],
    ) -> ValidationResult<Option<CommandId>> {
        if let Some(vtb) = vtbs.iter().find(|vtb| vtb.containing_block.hash() != *containing) {
            return Err(ValidationError::StructuralInvalid {
                code: "bad-containing-block",
                message: format!(
                    "VTB {} is contained in {}, not in {}",
                    vtb.id(),
                    vtb.containing_block.hash(),
                    containing
                ),
            }
            .into());
        }
        let commands: Vec<VbkCommand> = vtbs.iter().flat_map(vtb_to_commands).collect();
        let first = commands.first().map(|c| c.id());
        fork_resolution::add_commands(self, containing, commands).stack("vbk-add-payloads")?;
        Ok(first)
    }

    /// Drop the commands of `containing` from `first` onwards.
    pub fn remove_payloads(&mut self, containing: &VbkHash, first: CommandId) {
        fork_resolution::remove_commands(self, containing, first);
    }

    /// Compare two branches; `Greater` means `a` is better.
    pub fn compare_branches(&mut self, a: &VbkHash, b: &VbkHash) -> ValidationResult<Ordering> {
        fork_resolution::compare_branches(self, a, b)
    }

    /// Endorsements of `hash` currently applied.
    pub fn endorsements_of(&self, hash: &VbkHash) -> Vec<Arc<BtcEndorsement>> {
        self.tree
            .get_block_index(hash)
            .map(|index| index.endorsed_by.clone())
            .unwrap_or_default()
    }
}

impl ForkChoice for VbkBlockTree {
    type Block = VbkBlock;

    fn tree(&self) -> &BlockTree<VbkBlock> {
        &self.tree
    }

    fn tree_mut(&mut self) -> &mut BlockTree<VbkBlock> {
        &mut self.tree
    }

    fn determine_best_chain(&mut self, candidate: &VbkHash, is_bootstrap: bool) {
        fork_resolution::determine_best_chain(self, candidate, is_bootstrap);
    }

    fn retreat_tip(&mut self, to: Option<VbkHash>) {
        fork_resolution::retreat_tip(self, to);
    }

    fn restore_tip(&mut self, tip: &VbkHash) {
        fork_resolution::restore_tip(self, tip);
    }
}

impl PopTree for VbkBlockTree {
    fn pop_params(&self) -> &PopForkParams {
        &self.tree.params().pop
    }

    fn state_tip(&self) -> Option<VbkHash> {
        self.state_tip
    }

    fn set_state_tip(&mut self, tip: Option<HashOf<VbkBlock>>) {
        self.state_tip = tip;
    }

    fn execute_command(&mut self, command: &mut VbkCommand) -> ValidationResult<()> {
        command.execute(self)
    }

    fn unexecute_command(&mut self, command: &mut VbkCommand) {
        command.unexecute(self)
    }

    fn knows_block_of_proof(&self, endorsement: &BtcEndorsement) -> bool {
        self.btc.get_block_index(&endorsement.block_of_proof).is_some()
    }

    fn proof_height(&self, endorsement: &BtcEndorsement) -> Option<u32> {
        let index = self.btc.get_block_index(&endorsement.block_of_proof)?;
        self.btc.best_chain().contains(index).then_some(index.height)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use pop_test_utils::{btc_params, make_vtb, mine_btc, mine_vbk, vbk_params};

    pub fn vbk_tree_with(params: VbkChainParams) -> VbkBlockTree {
        let mut tree = VbkBlockTree::new(Arc::new(params), Arc::new(btc_params()));
        tree.btc_mut().bootstrap_with_genesis().unwrap();
        tree.bootstrap_with_genesis().unwrap();
        tree
    }

    pub fn vbk_tree() -> VbkBlockTree {
        vbk_tree_with(vbk_params())
    }

    pub fn header(tree: &VbkBlockTree, hash: &VbkHash) -> VbkBlock {
        (*tree.tree().get_block_index(hash).unwrap().header).clone()
    }

    /// Mine and accept `count` VBK blocks on `parent`.
    pub fn mine_vbk_on(tree: &mut VbkBlockTree, parent: &VbkHash, count: usize) -> Vec<VbkBlock> {
        let mut prev = header(tree, parent);
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = mine_vbk(&prev);
            tree.accept_block(block.clone()).unwrap();
            prev = block.clone();
            blocks.push(block);
        }
        blocks
    }

    pub fn mine_vbk_on_tip(tree: &mut VbkBlockTree, count: usize) -> Vec<VbkBlock> {
        let tip = *tree.tree().best_chain().tip().unwrap();
        mine_vbk_on(tree, &tip, count)
    }

    pub fn btc_tip(tree: &VbkBlockTree) -> BtcBlock {
        (*tree.btc().best_tip().unwrap().header).clone()
    }

    /// VTB endorsing `endorsed` from `containing`, proven in a fresh BTC
    /// block on top of the BTC tip.
    pub fn endorse(tree: &VbkBlockTree, endorsed: &VbkBlock, containing: &VbkBlock) -> Vtb {
        let proof = mine_btc(&btc_tip(tree));
        make_vtb(endorsed, &proof, Vec::new(), containing)
    }
}
