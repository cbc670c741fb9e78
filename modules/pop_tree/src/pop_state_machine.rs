//! Moves the applied state of a PoP tree between branches.
//!
//! The applied state is the set of executed commands of every block on
//! the branch ending at the tree's state tip. Moving to another branch
//! unexecutes down to the fork point and executes up the new branch. A
//! failed move is rolled back, so the state is never left half-applied.

use pop_common::{ValidationError, ValidationResult, ValidationState};
use tracing::{debug, warn};

use crate::block::{Block, CommandOf, HashOf};
use crate::block_tree::ForkChoice;
use crate::fork_resolution::PopTree;

/// Why a branch could not be applied.
#[derive(Debug, Clone)]
pub struct ApplyFailure<H> {
    /// First block that failed; everything from it upwards is invalid.
    pub block: H,
    pub state: ValidationState,
}

pub struct PopStateMachine<'a, T: PopTree> {
    tree: &'a mut T,
}

impl<'a, T: PopTree> PopStateMachine<'a, T> {
    pub fn new(tree: &'a mut T) -> Self {
        Self { tree }
    }

    /// Execute the commands of `hash`. On failure the ones already executed
    /// are undone.
    pub fn apply_block(&mut self, hash: &HashOf<T::Block>) -> ValidationResult<()> {
        let Some(index) = self.tree.tree_mut().get_block_index_mut(hash) else {
            return Err(ValidationError::UnknownBlock {
                hash: hash.to_string(),
            }
            .into());
        };
        let mut commands = std::mem::take(&mut index.commands);

        let mut result = Ok(());
        let mut executed = 0;
        for command in commands.iter_mut() {
            if let Err(state) = self.tree.execute_command(command) {
                result = Err(state.push(format!("apply-{}-block {}", <T::Block as Block>::NAME, hash)));
                break;
            }
            executed += 1;
        }
        if result.is_err() {
            for command in commands[..executed].iter_mut().rev() {
                self.tree.unexecute_command(command);
            }
        }

        self.restore_commands(hash, commands);
        result
    }

    /// Unexecute the commands of `hash` in reverse order.
    pub fn unapply_block(&mut self, hash: &HashOf<T::Block>) {
        let Some(index) = self.tree.tree_mut().get_block_index_mut(hash) else {
            return;
        };
        let mut commands = std::mem::take(&mut index.commands);
        for command in commands.iter_mut().rev() {
            self.tree.unexecute_command(command);
        }
        self.restore_commands(hash, commands);
    }

    fn restore_commands(&mut self, hash: &HashOf<T::Block>, commands: Vec<CommandOf<T::Block>>) {
        match self.tree.tree_mut().get_block_index_mut(hash) {
            Some(index) => {
                debug_assert!(index.commands.is_empty());
                index.commands = commands;
            }
            None => warn!(
                chain = <T::Block as Block>::NAME,
                hash = %hash,
                "Block disappeared while its commands ran"
            ),
        }
    }

    /// Unapply blocks until the state tip is the fork point between the
    /// current state and `target`. `None` unapplies everything.
    pub fn unapply(&mut self, target: Option<&HashOf<T::Block>>) {
        let Some(current) = self.tree.state_tip() else {
            return;
        };
        let fork = target.and_then(|t| self.tree.tree().find_common_ancestor(&current, t));

        let mut cursor = Some(current);
        while let Some(hash) = cursor {
            if Some(hash) == fork {
                break;
            }
            self.unapply_block(&hash);
            cursor = self.tree.tree().get_block_index(&hash).and_then(|index| index.prev);
            self.tree.set_state_tip(cursor);
        }
        self.tree.set_state_tip(fork);
    }

    /// Apply blocks from the state tip up to `target`, which must descend
    /// from it. On failure the state returns to where it started.
    pub fn apply(&mut self, target: &HashOf<T::Block>) -> Result<(), ApplyFailure<HashOf<T::Block>>> {
        let from = self.tree.state_tip();

        let mut path = Vec::new();
        let mut cursor = self.tree.tree().get_block_index(target);
        while let Some(index) = cursor {
            if Some(index.hash) == from {
                break;
            }
            path.push(index.hash);
            cursor = index.prev.as_ref().and_then(|h| self.tree.tree().get_block_index(h));
        }
        if from.is_some() && cursor.is_none() {
            return Err(ApplyFailure {
                block: *target,
                state: ValidationError::UnknownBlock {
                    hash: target.to_string(),
                }
                .into(),
            });
        }

        let mut applied = Vec::with_capacity(path.len());
        for hash in path.into_iter().rev() {
            let valid = self.tree.tree().get_block_index(&hash).is_some_and(|i| i.is_valid());
            let result = if valid {
                self.apply_block(&hash)
            } else {
                Err(ValidationError::BadChain {
                    hash: hash.to_string(),
                }
                .into())
            };

            if let Err(state) = result {
                debug!(
                    chain = <T::Block as Block>::NAME,
                    failed = %hash,
                    applied = applied.len(),
                    %state,
                    "State rolls back"
                );
                for done in applied.iter().rev() {
                    self.unapply_block(done);
                }
                self.tree.set_state_tip(from);
                return Err(ApplyFailure { block: hash, state });
            }
            applied.push(hash);
            self.tree.set_state_tip(Some(hash));
        }
        Ok(())
    }

    /// Move the state to `target` from anywhere in the tree.
    pub fn unapply_and_apply(
        &mut self,
        target: Option<&HashOf<T::Block>>,
    ) -> Result<(), ApplyFailure<HashOf<T::Block>>> {
        self.unapply(target);
        match target {
            Some(target) => self.apply(target),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pop_common::{PayloadId, VbkBlock, VbkHash, Vtb};
    use pop_test_utils::{btc_params, make_vtb, mine_btc};

    use super::*;
    use crate::block::EndorsementRecord;
    use crate::block_index::BlockStatus;
    use crate::vbk_block_tree::test_helpers::*;
    use crate::vbk_block_tree::VbkBlockTree;

    type Endorsements = BTreeMap<VbkHash, (Vec<PayloadId>, Vec<PayloadId>)>;

    /// Contained and endorsing endorsement ids of every block that has any.
    fn endorsements(tree: &VbkBlockTree) -> Endorsements {
        tree.tree()
            .blocks()
            .map(|index| {
                let mut containing: Vec<_> = index.containing_endorsements.keys().copied().collect();
                let mut endorsed_by: Vec<_> = index.endorsed_by.iter().map(|e| e.id()).collect();
                containing.sort();
                endorsed_by.sort();
                (index.hash, (containing, endorsed_by))
            })
            .filter(|(_, (containing, endorsed_by))| {
                !containing.is_empty() || !endorsed_by.is_empty()
            })
            .collect()
    }

    /// Ten VBK blocks with a VTB in the 8th endorsing the 3rd.
    fn endorsed_chain() -> (VbkBlockTree, Vec<VbkBlock>) {
        let mut tree = vbk_tree();
        let vbk = mine_vbk_on_tip(&mut tree, 10);
        let vtb = endorse(&tree, &vbk[2], &vbk[7]);
        tree.add_payloads(&vbk[7].hash(), &[vtb]).unwrap();
        (tree, vbk)
    }

    /// VTB in `containing` endorsing `endorsed`, which is not on its
    /// branch. The proof builds on BTC genesis so it always connects.
    fn off_branch_vtb(endorsed: &VbkBlock, containing: &VbkBlock) -> Vtb {
        let proof = mine_btc(&btc_params().genesis_block);
        make_vtb(endorsed, &proof, Vec::new(), containing)
    }

    // ── Apply and unapply ─────────────────────────────────────────

    #[test]
    fn unapply_then_apply_restores_endorsements() {
        let mut tree = vbk_tree();
        let vbk = mine_vbk_on_tip(&mut tree, 10);
        let btc_before = tree.btc().len();

        let vtb = endorse(&tree, &vbk[3], &vbk[8]);
        tree.add_payloads(&vbk[8].hash(), &[vtb]).unwrap();
        let vtb = endorse(&tree, &vbk[4], &vbk[9]);
        tree.add_payloads(&vbk[9].hash(), &[vtb]).unwrap();
        let applied = endorsements(&tree);
        assert_eq!(applied.len(), 4);

        PopStateMachine::new(&mut tree).unapply(Some(&vbk[5].hash()));
        assert_eq!(tree.state_tip(), Some(vbk[5].hash()));
        assert!(endorsements(&tree).is_empty());
        assert_eq!(tree.btc().len(), btc_before);

        PopStateMachine::new(&mut tree).apply(&vbk[9].hash()).unwrap();
        assert_eq!(tree.state_tip(), Some(vbk[9].hash()));
        assert_eq!(endorsements(&tree), applied);
        assert_eq!(tree.btc().len(), btc_before + 2);
    }

    #[test]
    fn unapply_to_nothing_empties_the_state() {
        let (mut tree, vbk) = endorsed_chain();
        PopStateMachine::new(&mut tree).unapply(None);
        assert_eq!(tree.state_tip(), None);
        assert!(endorsements(&tree).is_empty());

        PopStateMachine::new(&mut tree).apply(&vbk[9].hash()).unwrap();
        assert_eq!(tree.endorsements_of(&vbk[2].hash()).len(), 1);
    }

    // ── Failures ──────────────────────────────────────────────────

    #[test]
    fn failing_block_stops_the_move_at_the_fork_point() {
        let (mut tree, a) = endorsed_chain();
        let b = mine_vbk_on(&mut tree, &a[5].hash(), 2);
        let bad = off_branch_vtb(&a[6], &b[1]);
        tree.add_payloads(&b[1].hash(), &[bad]).unwrap();
        assert_eq!(tree.state_tip(), Some(a[9].hash()));
        let before = endorsements(&tree);
        let btc_before = tree.btc().len();

        let failure = PopStateMachine::new(&mut tree)
            .unapply_and_apply(Some(&b[1].hash()))
            .unwrap_err();
        assert_eq!(failure.block, b[1].hash());
        assert_eq!(failure.state.code(), "block-differs");
        assert_eq!(tree.state_tip(), Some(a[5].hash()));
        assert!(endorsements(&tree).is_empty());

        PopStateMachine::new(&mut tree).apply(&a[9].hash()).unwrap();
        assert_eq!(endorsements(&tree), before);
        assert_eq!(tree.btc().len(), btc_before);
    }

    #[test]
    fn branch_failing_during_reorg_is_invalidated_and_tip_kept() {
        let (mut tree, a) = endorsed_chain();
        let b = mine_vbk_on(&mut tree, &a[5].hash(), 2);
        let bad = off_branch_vtb(&a[6], &b[1]);
        tree.add_payloads(&b[1].hash(), &[bad]).unwrap();
        let before = endorsements(&tree);
        let btc_tip = tree.btc().best_chain().tip().copied();

        // reaching height 10 crosses a keystone, so the branches are compared
        let more = mine_vbk_on(&mut tree, &b[1].hash(), 2);

        let status = |hash: &VbkHash| tree.tree().get_block_index(hash).unwrap().status;
        assert!(status(&b[0].hash()).is_valid());
        assert_eq!(status(&b[1].hash()), BlockStatus::FailedBlock);
        assert_eq!(status(&more[1].hash()), BlockStatus::FailedChild);
        assert_eq!(tree.tree().best_chain().tip(), Some(&a[9].hash()));
        assert_eq!(tree.state_tip(), Some(a[9].hash()));
        assert_eq!(endorsements(&tree), before);
        assert_eq!(tree.btc().best_chain().tip().copied(), btc_tip);
    }
}
