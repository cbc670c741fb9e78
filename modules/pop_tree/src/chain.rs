//! Height-indexed view of one branch of a tree.

use pop_common::PayloadId;

use crate::block::{Block, HashOf};
use crate::block_index::BlockIndex;
use crate::block_tree::BlockTree;

/// Hashes of a single branch from `start_height` up to its tip, indexed
/// by height.
#[derive(Debug, Clone)]
pub struct Chain<B: Block> {
    start_height: u32,
    hashes: Vec<HashOf<B>>,
}

impl<B: Block> Chain<B> {
    pub fn new(start_height: u32) -> Self {
        Self {
            start_height,
            hashes: Vec::new(),
        }
    }

    /// The branch ending at `tip`, cut off below `start_height`.
    pub fn from_tip(tree: &BlockTree<B>, start_height: u32, tip: Option<&HashOf<B>>) -> Self {
        let mut chain = Self::new(start_height);
        chain.set_tip(tree, tip);
        chain
    }

    pub fn start_height(&self) -> u32 {
        self.start_height
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn get(&self, height: u32) -> Option<&HashOf<B>> {
        let offset = height.checked_sub(self.start_height)?;
        self.hashes.get(offset as usize)
    }

    pub fn tip(&self) -> Option<&HashOf<B>> {
        self.hashes.last()
    }

    pub fn first(&self) -> Option<&HashOf<B>> {
        self.hashes.first()
    }

    pub fn tip_height(&self) -> Option<u32> {
        (!self.hashes.is_empty()).then(|| self.start_height + self.hashes.len() as u32 - 1)
    }

    pub fn contains_at(&self, hash: &HashOf<B>, height: u32) -> bool {
        self.get(height) == Some(hash)
    }

    pub fn contains(&self, index: &BlockIndex<B>) -> bool {
        self.contains_at(&index.hash, index.height)
    }

    /// Hashes in ascending height order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HashOf<B>> + '_ {
        self.hashes.iter()
    }

    /// Move the tip, reusing the part of the chain shared with the new
    /// branch. `None` clears the chain.
    pub fn set_tip(&mut self, tree: &BlockTree<B>, tip: Option<&HashOf<B>>) {
        let Some(tip) = tip.and_then(|h| tree.get_block_index(h)) else {
            self.hashes.clear();
            return;
        };

        let mut pending = Vec::new();
        let mut cursor = Some(tip);
        while let Some(index) = cursor {
            if index.height < self.start_height || self.contains(index) {
                break;
            }
            pending.push(index.hash);
            cursor = index.prev.as_ref().and_then(|h| tree.get_block_index(h));
        }

        // blocks below the lowest new one stay
        let keep = if pending.is_empty() {
            (tip.height + 1).saturating_sub(self.start_height)
        } else {
            tip.height + 1 - pending.len() as u32 - self.start_height
        };
        self.hashes.truncate(keep as usize);
        self.hashes.extend(pending.into_iter().rev());
    }

    /// Highest block shared with the branch ending at `other`.
    pub fn find_fork(&self, tree: &BlockTree<B>, other: &HashOf<B>) -> Option<HashOf<B>> {
        let tip_height = self.tip_height()?;
        let mut cursor = tree.get_block_index(other);
        if let Some(index) = cursor {
            if index.height > tip_height {
                cursor = tree.ancestor_of(index, tip_height);
            }
        }
        while let Some(index) = cursor {
            if index.height < self.start_height {
                return None;
            }
            if self.contains(index) {
                return Some(index.hash);
            }
            cursor = index.prev.as_ref().and_then(|h| tree.get_block_index(h));
        }
        None
    }

    /// Keystone at or below the fork point with the branch ending at
    /// `other`.
    pub fn find_highest_keystone_at_or_before_fork(
        &self,
        tree: &BlockTree<B>,
        other: &HashOf<B>,
        keystone_interval: u32,
    ) -> Option<HashOf<B>> {
        let fork = self.find_fork(tree, other)?;
        let fork_height = tree.get_block_index(&fork)?.height;
        let keystone_height = fork_height - fork_height % keystone_interval;
        self.get(keystone_height).copied()
    }

    /// Block among the last `window` blocks of the chain that contains the
    /// endorsement `id`.
    pub fn find_block_containing_endorsement(
        &self,
        tree: &BlockTree<B>,
        id: &PayloadId,
        window: u32,
    ) -> Option<HashOf<B>> {
        self.hashes
            .iter()
            .rev()
            .take(window as usize + 1)
            .filter_map(|h| tree.get_block_index(h))
            .find(|index| index.containing_endorsements.contains_key(id))
            .map(|index| index.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_tree::test_helpers::{alt, alt_tree};
    use crate::block_tree::ForkChoice;

    #[test]
    fn set_tip_reuses_shared_prefix() {
        let mut tree = alt_tree();
        let a1 = tree.accept_block(alt(1, 0, 1)).unwrap();
        let a2 = tree.accept_block(alt(2, 1, 2)).unwrap();
        let b2 = tree.accept_block(alt(12, 1, 2)).unwrap();
        let b3 = tree.accept_block(alt(13, 12, 3)).unwrap();

        let mut chain = Chain::from_tip(&tree, 0, Some(&a2));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.get(1), Some(&a1));

        chain.set_tip(&tree, Some(&b3));
        assert_eq!(chain.tip_height(), Some(3));
        assert_eq!(chain.get(2), Some(&b2));
        assert_eq!(chain.get(1), Some(&a1));

        chain.set_tip(&tree, Some(&a1));
        assert_eq!(chain.tip(), Some(&a1));
        assert_eq!(chain.len(), 2);

        chain.set_tip(&tree, None);
        assert!(chain.is_empty());
    }

    #[test]
    fn chain_cut_at_start_height() {
        let mut tree = alt_tree();
        for i in 1..=5u8 {
            tree.accept_block(alt(i, i - 1, i as u32)).unwrap();
        }
        let tip = alt(5, 4, 5).hash;
        let chain = Chain::from_tip(&tree, 3, Some(&tip));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.first(), Some(&alt(3, 2, 3).hash));
        assert_eq!(chain.get(2), None);
    }

    #[test]
    fn fork_and_keystone() {
        let mut tree = alt_tree();
        for i in 1..=12u8 {
            tree.accept_block(alt(i, i - 1, i as u32)).unwrap();
        }
        // fork at height 7
        tree.accept_block(alt(108, 7, 8)).unwrap();
        let chain = tree.best_chain().clone();
        let other = alt(108, 7, 8).hash;

        assert_eq!(chain.find_fork(&tree, &other), Some(alt(7, 6, 7).hash));
        assert_eq!(
            chain.find_highest_keystone_at_or_before_fork(&tree, &other, 5),
            Some(alt(5, 4, 5).hash)
        );
    }
}
