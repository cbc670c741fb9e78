//! Import of a protecting-chain header carried in a payload.

use std::sync::Arc;

use pop_common::ValidationResult;

use crate::block::{Block, HashOf};
use crate::block_tree::ForkChoice;
use crate::command::{Command, CommandId, CommandInfo};

/// Adds a header to the protecting tree.
///
/// Unexecuting removes the header and everything built on it, but only if
/// this command was the one that inserted it. The active tip from before
/// the insert is then made active again.
#[derive(Debug, Clone)]
pub struct AddBlock<B: Block> {
    id: CommandId,
    block: Arc<B>,
    existed: bool,
    previous_tip: Option<HashOf<B>>,
}

impl<B: Block> AddBlock<B> {
    pub fn new(block: Arc<B>) -> Self {
        Self {
            id: CommandId::next(),
            block,
            existed: false,
            previous_tip: None,
        }
    }

    pub fn block(&self) -> &B {
        &self.block
    }
}

impl<B: Block> CommandInfo for AddBlock<B> {
    fn id(&self) -> CommandId {
        self.id
    }

    fn describe(&self) -> String {
        format!(
            "Add{}Block{{prev={}, block={}}}",
            B::NAME,
            self.block.previous_block(),
            self.block.hash()
        )
    }
}

impl<B: Block, T: ForkChoice<Block = B>> Command<T> for AddBlock<B> {
    fn execute(&mut self, tree: &mut T) -> ValidationResult<()> {
        let hash = self.block.hash();
        self.existed = tree.tree().get_block_index(&hash).is_some();
        if self.existed {
            return Ok(());
        }

        self.previous_tip = tree.tree().best_chain().tip().copied();
        if let Err(state) = tree.accept_header(self.block.clone(), false) {
            // blocks under an invalid parent are stored even though refused
            if tree.tree().get_block_index(&hash).is_some() {
                tree.remove_subtree(&hash);
            }
            return Err(state.push(self.describe()));
        }
        Ok(())
    }

    fn unexecute(&mut self, tree: &mut T) {
        if self.existed {
            return;
        }
        tree.remove_subtree(&self.block.hash());
        if let Some(previous) = self.previous_tip.take() {
            if tree.tree().best_chain().tip() != Some(&previous) {
                tree.restore_tip(&previous);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_tree::test_helpers::{alt, alt_hash, alt_tree};

    #[test]
    fn unexecute_removes_only_what_it_added() {
        let mut tree = alt_tree();
        tree.accept_block(alt(1, 0, 1)).unwrap();

        let mut known = AddBlock::new(Arc::new(alt(1, 0, 1)));
        let mut fresh = AddBlock::new(Arc::new(alt(2, 1, 2)));
        known.execute(&mut tree).unwrap();
        fresh.execute(&mut tree).unwrap();
        assert_eq!(tree.best_chain().tip(), Some(&alt_hash(2)));

        fresh.unexecute(&mut tree);
        known.unexecute(&mut tree);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.best_chain().tip(), Some(&alt_hash(1)));
    }

    #[test]
    fn failed_add_leaves_no_block() {
        let mut tree = alt_tree();
        tree.accept_block(alt(1, 0, 1)).unwrap();
        tree.invalidate_block(&alt_hash(1));

        let mut command = AddBlock::new(Arc::new(alt(2, 1, 2)));
        let err = command.execute(&mut tree).unwrap_err();
        assert_eq!(err.code(), "bad-chain");
        assert!(err.stack()[0].starts_with("AddAltBlock{"));
        assert!(tree.get_block_index(&alt_hash(2)).is_none());
    }

    #[test]
    fn unexecute_brings_back_the_replaced_tip() {
        let mut tree = alt_tree();
        tree.accept_block(alt(1, 0, 1)).unwrap();
        tree.accept_block(alt(11, 0, 1)).unwrap();
        assert_eq!(tree.best_chain().tip(), Some(&alt_hash(1)));

        let mut command = AddBlock::new(Arc::new(alt(12, 11, 2)));
        command.execute(&mut tree).unwrap();
        assert_eq!(tree.best_chain().tip(), Some(&alt_hash(12)));

        command.unexecute(&mut tree);
        assert_eq!(tree.best_chain().tip(), Some(&alt_hash(1)));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.tips().count(), 2);
    }
}
