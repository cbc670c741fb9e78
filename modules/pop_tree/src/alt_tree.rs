//! Application chain tree protected by VeriBlock.
//!
//! ALT blocks carry [`AltPayloads`]: VBK headers, VTBs and one ATV. The
//! payloads are turned into commands that feed the embedded VBK tree (and
//! through it the BTC tree) and record VBK endorsements of ALT blocks.
//! Forks are resolved by PoP against the VBK active chain.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use config::Config;
use pop_common::{
    AltBlock, AltChainParams, AltHash, AltPayloads, BtcChainParams, Network, PopForkParams,
    ValidationError, ValidationResult, VbkChainParams, VbkEndorsement, WithStack,
};
use tracing::{debug, info};

use crate::block::{EndorsementRecord, HashOf};
use crate::block_tree::{BlockTree, ForkChoice};
use crate::command::{AltCommand, Command};
use crate::fork_resolution::{self, PopTree};
use crate::payloads::alt_payloads_to_commands;
use crate::rewards::{EndorsementProof, PopRewards};
use crate::vbk_block_tree::VbkBlockTree;

#[derive(Clone)]
pub struct AltTree {
    tree: BlockTree<AltBlock>,
    vbk: VbkBlockTree,
    state_tip: Option<AltHash>,
}

impl AltTree {
    pub fn new(
        alt_params: Arc<AltChainParams>,
        vbk_params: Arc<VbkChainParams>,
        btc_params: Arc<BtcChainParams>,
    ) -> Self {
        Self::from_trees(BlockTree::new(alt_params), VbkBlockTree::new(vbk_params, btc_params))
    }

    /// Trees for the configured network, bootstrapped with the network
    /// genesis blocks and the configured ALT bootstrap block.
    pub fn from_config(config: &Config) -> Result<Self> {
        let network = Network::from_config(config);
        let alt_params = AltChainParams::from_config(config)?;
        info!(
            network = ?network,
            identifier = alt_params.identifier,
            "Creating PoP trees"
        );
        let mut tree = Self::new(
            Arc::new(alt_params),
            Arc::new(VbkChainParams::for_network(network)),
            Arc::new(BtcChainParams::for_network(network)),
        );
        tree.bootstrap()?;
        Ok(tree)
    }

    pub fn from_trees(tree: BlockTree<AltBlock>, vbk: VbkBlockTree) -> Self {
        Self {
            tree,
            vbk,
            state_tip: None,
        }
    }

    /// Bootstrap BTC, VBK and ALT with their first blocks.
    pub fn bootstrap(&mut self) -> ValidationResult<()> {
        self.vbk.btc_mut().bootstrap_with_genesis().stack("btc-bootstrap")?;
        self.vbk.bootstrap_with_genesis().stack("vbk-bootstrap")?;
        self.bootstrap_with_genesis().stack("alt-bootstrap")?;
        Ok(())
    }

    pub fn params(&self) -> &AltChainParams {
        self.tree.params()
    }

    pub fn vbk(&self) -> &VbkBlockTree {
        &self.vbk
    }

    pub fn vbk_mut(&mut self) -> &mut VbkBlockTree {
        &mut self.vbk
    }

    /// Accept an ALT block together with its payloads, all or nothing: if
    /// any payload is refused the block is not kept either.
    pub fn accept_block_with_payloads(
        &mut self,
        block: AltBlock,
        payloads: &[AltPayloads],
    ) -> ValidationResult<AltHash> {
        if payloads.is_empty() {
            return self.accept_block(block);
        }
        let mut copy = self.clone();
        let hash = copy.accept_block(block)?;
        copy.add_each(&hash, payloads)?;
        *self = copy;
        Ok(hash)
    }

    /// Attach payloads to `containing`.
    ///
    /// Each entry is added in turn. With `atomic` the work happens on a
    /// copy of the whole tree which replaces this one only if every entry
    /// was accepted; otherwise entries before a failing one stay.
    pub fn add_payloads(
        &mut self,
        containing: &AltHash,
        payloads: &[AltPayloads],
        atomic: bool,
    ) -> ValidationResult<()> {
        if !atomic {
            return self.add_each(containing, payloads);
        }
        let mut copy = self.clone();
        copy.add_each(containing, payloads)?;
        *self = copy;
        Ok(())
    }

    fn add_each(&mut self, containing: &AltHash, payloads: &[AltPayloads]) -> ValidationResult<()> {
        for (n, entry) in payloads.iter().enumerate() {
            let commands = alt_payloads_to_commands(*containing, entry);
            fork_resolution::add_commands(self, containing, commands)
                .stack(&format!("alt-add-payloads[{n}]"))?;
        }
        debug!(containing = %containing, count = payloads.len(), "ALT payloads added");
        Ok(())
    }

    /// Compare two branches; `Greater` means `a` is better.
    pub fn compare_branches(&mut self, a: &AltHash, b: &AltHash) -> ValidationResult<Ordering> {
        fork_resolution::compare_branches(self, a, b)
    }

    /// Endorsements of `hash` currently applied.
    pub fn endorsements_of(&self, hash: &AltHash) -> Vec<Arc<VbkEndorsement>> {
        self.tree
            .get_block_index(hash)
            .map(|index| index.endorsed_by.clone())
            .unwrap_or_default()
    }

    fn proofs_of(&self, hash: &AltHash) -> Vec<(Arc<VbkEndorsement>, u32)> {
        self.endorsements_of(hash)
            .into_iter()
            .filter_map(|e| {
                let height = self.proof_height(&e)?;
                Some((e, height))
            })
            .collect()
    }

    /// PoP payouts due at `tip`, for the block the reward settlement
    /// interval below it. `tip` must be on the active chain; an empty
    /// map means nothing is due yet.
    pub fn get_pop_payout(&self, tip: &AltHash) -> ValidationResult<BTreeMap<Vec<u8>, i64>> {
        let Some(index) = self.tree.get_block_index(tip) else {
            return Err(ValidationError::UnknownBlock {
                hash: tip.to_string(),
            }
            .into());
        };
        if !self.tree.best_chain().contains(index) {
            return Err(ValidationError::NotOnActiveChain {
                hash: tip.to_string(),
            }
            .into());
        }

        let params = self.params();
        let rewards = PopRewards::new(params);
        let chain = self.tree.best_chain();
        let Some(endorsed_height) = index
            .height
            .checked_sub(params.rewards.reward_settlement_interval)
            .filter(|h| *h >= chain.start_height())
        else {
            return Ok(BTreeMap::new());
        };
        let Some(endorsed) = chain.get(endorsed_height) else {
            return Ok(BTreeMap::new());
        };

        let score_of = |hash: &AltHash| rewards.block_score(&proof_view(&self.proofs_of(hash)));
        let previous = (chain.start_height()..endorsed_height)
            .rev()
            .filter_map(|height| chain.get(height))
            .map(score_of);
        let difficulty = rewards.calculate_difficulty(previous);

        let proofs = self.proofs_of(endorsed);
        let payouts = rewards.calculate_payouts(endorsed_height, &proof_view(&proofs), difficulty);
        info!(
            tip = %tip,
            endorsed = %endorsed,
            difficulty,
            recipients = payouts.len(),
            "PoP payout calculated"
        );
        Ok(payouts)
    }
}

fn proof_view(proofs: &[(Arc<VbkEndorsement>, u32)]) -> Vec<EndorsementProof<'_>> {
    proofs
        .iter()
        .map(|(e, height)| EndorsementProof {
            payout_info: e.payout_info(),
            proof_height: *height,
        })
        .collect()
}

impl ForkChoice for AltTree {
    type Block = AltBlock;

    fn tree(&self) -> &BlockTree<AltBlock> {
        &self.tree
    }

    fn tree_mut(&mut self) -> &mut BlockTree<AltBlock> {
        &mut self.tree
    }

    fn determine_best_chain(&mut self, candidate: &AltHash, is_bootstrap: bool) {
        fork_resolution::determine_best_chain(self, candidate, is_bootstrap);
    }

    fn retreat_tip(&mut self, to: Option<AltHash>) {
        fork_resolution::retreat_tip(self, to);
    }

    fn restore_tip(&mut self, tip: &AltHash) {
        fork_resolution::restore_tip(self, tip);
    }
}

impl PopTree for AltTree {
    fn pop_params(&self) -> &PopForkParams {
        &self.tree.params().pop
    }

    fn state_tip(&self) -> Option<AltHash> {
        self.state_tip
    }

    fn set_state_tip(&mut self, tip: Option<HashOf<AltBlock>>) {
        self.state_tip = tip;
    }

    fn execute_command(&mut self, command: &mut AltCommand) -> ValidationResult<()> {
        command.execute(self)
    }

    fn unexecute_command(&mut self, command: &mut AltCommand) {
        command.unexecute(self)
    }

    fn knows_block_of_proof(&self, endorsement: &VbkEndorsement) -> bool {
        self.vbk.tree().get_block_index(&endorsement.block_of_proof).is_some()
    }

    fn proof_height(&self, endorsement: &VbkEndorsement) -> Option<u32> {
        let index = self.vbk.tree().get_block_index(&endorsement.block_of_proof)?;
        self.vbk.tree().best_chain().contains(index).then_some(index.height)
    }
}
