//! Recording an endorsement on both the containing and endorsed blocks.

use std::sync::Arc;

use pop_common::{ValidationError, ValidationResult, WithStack};

use crate::block::{Block, EndorsementOf, EndorsementRecord, HashOf};
use crate::chain::Chain;
use crate::command::{Command, CommandId, CommandInfo};
use crate::fork_resolution::PopTree;

/// Adds an endorsement contained in `containing`.
///
/// The endorsement is shared by the command, the containing block's
/// `containing_endorsements` and the endorsed block's `endorsed_by`.
#[derive(Debug, Clone)]
pub struct AddEndorsement<B: Block> {
    id: CommandId,
    containing: HashOf<B>,
    endorsement: Arc<EndorsementOf<B>>,
}

impl<B: Block> AddEndorsement<B> {
    pub fn new(containing: HashOf<B>, endorsement: Arc<EndorsementOf<B>>) -> Self {
        Self {
            id: CommandId::next(),
            containing,
            endorsement,
        }
    }

    pub fn endorsement(&self) -> &EndorsementOf<B> {
        &self.endorsement
    }

    /// Find the endorsed block on the branch of the containing block.
    fn check<T: PopTree<Block = B>>(&self, tree: &T) -> ValidationResult<HashOf<B>> {
        let blocks = tree.tree();
        let endorsement = &*self.endorsement;
        let containing = blocks.get_block_index(&self.containing).ok_or_else(|| {
            ValidationError::ContainingBlockNotFound {
                hash: self.containing.to_string(),
            }
        })?;

        let endorsed_height = endorsement.endorsed_height();
        if endorsed_height > containing.height {
            return Err(ValidationError::EndorsedBlockNotFound {
                height: endorsed_height,
            }
            .into());
        }
        let window = tree.pop_params().endorsement_settlement_interval;
        if containing.height - endorsed_height > window {
            return Err(ValidationError::EndorsementExpired {
                containing_height: containing.height,
                endorsed_height,
                window,
            }
            .into());
        }

        let start = containing.height.saturating_sub(window).max(blocks.root_height());
        let chain = Chain::from_tip(blocks, start, Some(&self.containing));
        let Some(found) = chain.get(endorsed_height) else {
            return Err(ValidationError::EndorsedBlockNotFound {
                height: endorsed_height,
            }
            .into());
        };
        if found != endorsement.endorsed_hash() {
            return Err(ValidationError::EndorsedBlockDiffers {
                endorsed: endorsement.endorsed_hash().to_string(),
                found: found.to_string(),
            }
            .into());
        }

        if !tree.knows_block_of_proof(endorsement) {
            return Err(ValidationError::ProofBlockNotFound {
                hash: endorsement.block_of_proof_string(),
            }
            .into());
        }

        let id = endorsement.id();
        if let Some(duplicate) = chain.find_block_containing_endorsement(blocks, &id, window) {
            return Err(ValidationError::EndorsementDuplicate {
                id: id.to_string(),
                containing: duplicate.to_string(),
            }
            .into());
        }
        Ok(*found)
    }
}

impl<B: Block> CommandInfo for AddEndorsement<B> {
    fn id(&self) -> CommandId {
        self.id
    }

    fn describe(&self) -> String {
        format!(
            "Endorse{}Block{{containing={}, {}}}",
            B::NAME,
            self.containing,
            self.endorsement
        )
    }
}

impl<B: Block, T: PopTree<Block = B>> Command<T> for AddEndorsement<B> {
    fn execute(&mut self, tree: &mut T) -> ValidationResult<()> {
        let endorsed = self.check(tree).stack(&self.describe())?;

        let id = self.endorsement.id();
        if let Some(index) = tree.tree_mut().get_block_index_mut(&self.containing) {
            index.containing_endorsements.insert(id, self.endorsement.clone());
        }
        if let Some(index) = tree.tree_mut().get_block_index_mut(&endorsed) {
            index.endorsed_by.push(self.endorsement.clone());
        }
        Ok(())
    }

    fn unexecute(&mut self, tree: &mut T) {
        let id = self.endorsement.id();
        if let Some(index) = tree.tree_mut().get_block_index_mut(&self.containing) {
            let removed = index.containing_endorsements.remove(&id);
            debug_assert!(
                removed.is_some_and(|e| Arc::ptr_eq(&e, &self.endorsement)),
                "endorsement {id} was not recorded by this command"
            );
        }

        let endorsed = *self.endorsement.endorsed_hash();
        if let Some(index) = tree.tree_mut().get_block_index_mut(&endorsed) {
            let before = index.endorsed_by.len();
            index.endorsed_by.retain(|e| !Arc::ptr_eq(e, &self.endorsement));
            debug_assert_eq!(before, index.endorsed_by.len() + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_tree::ForkChoice;
    use crate::vbk_block_tree::test_helpers::{mine_vbk_on, mine_vbk_on_tip, vbk_tree, vbk_tree_with};
    use crate::vbk_block_tree::VbkBlockTree;
    use pop_common::{BtcEndorsement, BtcHash, Endorsement, Hash, VbkBlock, VbkHash};
    use pop_test_utils::vbk_params;

    fn endorsement(
        tree: &VbkBlockTree,
        endorsed: &VbkBlock,
        containing: &VbkHash,
        id: u8,
    ) -> Arc<BtcEndorsement> {
        Arc::new(Endorsement {
            id: Hash::new([id; 32]),
            endorsed_hash: endorsed.hash(),
            endorsed_height: endorsed.height,
            containing_hash: *containing,
            block_of_proof: *tree.btc().best_chain().tip().unwrap(),
            payout_info: Vec::new(),
        })
    }

    #[test]
    fn records_and_removes_both_sides() {
        let mut tree = vbk_tree();
        let blocks = mine_vbk_on_tip(&mut tree, 5);
        let containing = blocks[4].hash();
        let mut command =
            AddEndorsement::<VbkBlock>::new(containing, endorsement(&tree, &blocks[1], &containing, 1));

        command.execute(&mut tree).unwrap();
        let endorsed = tree.tree().get_block_index(&blocks[1].hash()).unwrap();
        assert_eq!(endorsed.endorsed_by.len(), 1);
        assert!(tree
            .tree()
            .get_block_index(&containing)
            .unwrap()
            .containing_endorsements
            .contains_key(&Hash::new([1; 32])));

        command.unexecute(&mut tree);
        assert!(tree.tree().get_block_index(&blocks[1].hash()).unwrap().endorsed_by.is_empty());
        assert!(tree
            .tree()
            .get_block_index(&containing)
            .unwrap()
            .containing_endorsements
            .is_empty());
    }

    #[test]
    fn endorsement_outside_window_expires() {
        let mut params = vbk_params();
        params.pop.endorsement_settlement_interval = 3;
        let mut tree = vbk_tree_with(params);
        let blocks = mine_vbk_on_tip(&mut tree, 6);

        // heights 2 and 6: four blocks apart
        let containing = blocks[5].hash();
        let mut command =
            AddEndorsement::<VbkBlock>::new(containing, endorsement(&tree, &blocks[1], &containing, 2));
        let err = command.execute(&mut tree).unwrap_err();
        assert_eq!(err.code(), "expired");
        assert!(err.stack()[0].starts_with("EndorseVbkBlock{"));

        // three apart is still fine
        let mut command =
            AddEndorsement::<VbkBlock>::new(containing, endorsement(&tree, &blocks[2], &containing, 3));
        command.execute(&mut tree).unwrap();
    }

    #[test]
    fn endorsed_block_on_other_branch_differs() {
        let mut tree = vbk_tree();
        let main = mine_vbk_on_tip(&mut tree, 5);
        let side = mine_vbk_on(&mut tree, &main[1].hash(), 2);

        // side[0] is at height 3, main[4] sees main[2] there
        let containing = main[4].hash();
        let mut command =
            AddEndorsement::<VbkBlock>::new(containing, endorsement(&tree, &side[0], &containing, 4));
        let err = command.execute(&mut tree).unwrap_err();
        assert_eq!(err.code(), "block-differs");
    }

    #[test]
    fn endorsed_block_above_containing() {
        let mut tree = vbk_tree();
        let blocks = mine_vbk_on_tip(&mut tree, 3);
        let containing = blocks[0].hash();
        let mut command =
            AddEndorsement::<VbkBlock>::new(containing, endorsement(&tree, &blocks[2], &containing, 5));
        assert_eq!(command.execute(&mut tree).unwrap_err().code(), "no-endorsed-block");
    }

    #[test]
    fn unknown_block_of_proof() {
        let mut tree = vbk_tree();
        let blocks = mine_vbk_on_tip(&mut tree, 3);
        let containing = blocks[2].hash();
        let mut record = (*endorsement(&tree, &blocks[0], &containing, 6)).clone();
        record.block_of_proof = BtcHash::new([0x42; 32]);

        let mut command = AddEndorsement::<VbkBlock>::new(containing, Arc::new(record));
        let err = command.execute(&mut tree).unwrap_err();
        assert_eq!(err.code(), "block-of-proof-not-found");
    }

    #[test]
    fn same_id_twice_in_window_is_duplicate() {
        let mut tree = vbk_tree();
        let blocks = mine_vbk_on_tip(&mut tree, 4);
        let first = blocks[2].hash();
        let second = blocks[3].hash();

        let mut command = AddEndorsement::<VbkBlock>::new(first, endorsement(&tree, &blocks[0], &first, 7));
        command.execute(&mut tree).unwrap();

        let mut again = AddEndorsement::<VbkBlock>::new(second, endorsement(&tree, &blocks[0], &second, 7));
        let err = again.execute(&mut tree).unwrap_err();
        assert_eq!(err.code(), "duplicate");
        assert_eq!(tree.tree().get_block_index(&blocks[0].hash()).unwrap().endorsed_by.len(), 1);
    }

    #[test]
    fn unknown_containing_block() {
        let mut tree = vbk_tree();
        let blocks = mine_vbk_on_tip(&mut tree, 1);
        let missing = VbkHash::new([9; 24]);
        let mut command =
            AddEndorsement::<VbkBlock>::new(missing, endorsement(&tree, &blocks[0], &missing, 8));
        assert_eq!(command.execute(&mut tree).unwrap_err().code(), "no-containing-block");
    }
}
