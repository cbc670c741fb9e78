//! Generic block tree with a pluggable best-chain rule.
//!
//! [`BlockTree`] owns the arena of [`BlockIndex`] nodes, the set of valid
//! tips and the active chain. How the active chain is chosen is left to
//! [`ForkChoice`]: the tree itself implements the plain chain-work rule
//! used for BTC, while the PoP-protected trees plug in PoP scoring and
//! payload replay through the same hooks.

use std::sync::Arc;

use pop_common::{ValidationError, ValidationResult, WithStack};
use tracing::{debug, info};

use crate::block::{Block, HashOf};
use crate::block_index::{BlockIndex, BlockStatus};
use crate::chain::Chain;
use crate::tree_observer::BlockTreeObserver;

/// Arena of blocks keyed by hash.
///
/// The maps are persistent, so cloning a tree is cheap and clones share
/// structure until one of them is modified.
#[derive(Clone)]
pub struct BlockTree<B: Block> {
    params: Arc<B::Params>,
    blocks: imbl::HashMap<HashOf<B>, BlockIndex<B>>,
    /// Valid blocks without valid children.
    tips: imbl::HashSet<HashOf<B>>,
    active_chain: Chain<B>,
    observer: Option<Arc<dyn BlockTreeObserver<B>>>,
    next_sequence: u64,
}

impl<B: Block> BlockTree<B> {
    /// Create an empty tree. It must be bootstrapped before use.
    pub fn new(params: Arc<B::Params>) -> Self {
        Self {
            params,
            blocks: imbl::HashMap::new(),
            tips: imbl::HashSet::new(),
            active_chain: Chain::new(0),
            observer: None,
            next_sequence: 0,
        }
    }

    pub fn with_observer(params: Arc<B::Params>, observer: Arc<dyn BlockTreeObserver<B>>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::new(params)
        }
    }

    pub fn params(&self) -> &B::Params {
        &self.params
    }

    pub fn get_block_index(&self, hash: &HashOf<B>) -> Option<&BlockIndex<B>> {
        self.blocks.get(hash)
    }

    pub(crate) fn get_block_index_mut(&mut self, hash: &HashOf<B>) -> Option<&mut BlockIndex<B>> {
        self.blocks.get_mut(hash)
    }

    /// The active chain.
    pub fn best_chain(&self) -> &Chain<B> {
        &self.active_chain
    }

    pub fn best_tip(&self) -> Option<&BlockIndex<B>> {
        self.active_chain.tip().and_then(|h| self.blocks.get(h))
    }

    pub fn tips(&self) -> impl Iterator<Item = &HashOf<B>> + '_ {
        self.tips.iter()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockIndex<B>> + '_ {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Height of the bootstrap root.
    pub fn root_height(&self) -> u32 {
        self.active_chain.start_height()
    }

    /// Ancestor of `index` at `height`, or `index` itself.
    pub fn ancestor_of<'a>(
        &'a self,
        index: &'a BlockIndex<B>,
        height: u32,
    ) -> Option<&'a BlockIndex<B>> {
        if height > index.height {
            return None;
        }
        let mut cursor = index;
        while cursor.height > height {
            cursor = self.blocks.get(cursor.prev.as_ref()?)?;
        }
        Some(cursor)
    }

    pub fn ancestor(&self, hash: &HashOf<B>, height: u32) -> Option<&BlockIndex<B>> {
        self.ancestor_of(self.blocks.get(hash)?, height)
    }

    /// Whether `ancestor` is on the branch ending at `descendant`.
    pub fn is_ancestor(&self, ancestor: &HashOf<B>, descendant: &HashOf<B>) -> bool {
        match self.blocks.get(ancestor) {
            Some(index) => self
                .ancestor(descendant, index.height)
                .is_some_and(|found| found.hash == *ancestor),
            None => false,
        }
    }

    /// Highest block on both branches.
    pub fn find_common_ancestor(&self, a: &HashOf<B>, b: &HashOf<B>) -> Option<HashOf<B>> {
        let mut block_a = self.blocks.get(a)?;
        let mut block_b = self.blocks.get(b)?;

        // Walk the higher block down to the same level
        if block_a.height > block_b.height {
            block_a = self.ancestor_of(block_a, block_b.height)?;
        }
        if block_b.height > block_a.height {
            block_b = self.ancestor_of(block_b, block_a.height)?;
        }

        // Walk both up until they meet
        while block_a.hash != block_b.hash {
            block_a = self.blocks.get(block_a.prev.as_ref()?)?;
            block_b = self.blocks.get(block_b.prev.as_ref()?)?;
        }
        Some(block_a.hash)
    }

    /// Valid tips in the subtree rooted at `hash`.
    pub fn find_valid_tips(&self, hash: &HashOf<B>) -> Vec<HashOf<B>> {
        let mut tips = Vec::new();
        let mut stack = vec![*hash];
        while let Some(h) = stack.pop() {
            if self.tips.contains(&h) {
                tips.push(h);
            }
            if let Some(index) = self.blocks.get(&h) {
                stack.extend(index.children.iter().copied());
            }
        }
        tips.sort();
        tips
    }

    fn has_valid_children(&self, index: &BlockIndex<B>) -> bool {
        index
            .children
            .iter()
            .filter_map(|h| self.blocks.get(h))
            .any(|child| child.is_valid())
    }

    /// Multi-line summary of the tree for logs and debugging.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "{}BlockTree{{blocks={}, root={}, tip={:?}@{:?}}}\n",
            B::NAME,
            self.blocks.len(),
            self.root_height(),
            self.active_chain.tip(),
            self.active_chain.tip_height(),
        );
        let mut tips: Vec<_> = self.tips.iter().filter_map(|h| self.blocks.get(h)).collect();
        tips.sort_by_key(|index| std::cmp::Reverse(index.height));
        for index in tips {
            out.push_str(&format!("  tip {index}\n"));
        }
        out
    }

    /// Whether `candidate` has more work than the active tip.
    pub fn is_better_by_work(&self, candidate: &HashOf<B>) -> bool {
        let Some(index) = self.blocks.get(candidate) else {
            return false;
        };
        if !index.is_valid() {
            return false;
        }
        match self.best_tip() {
            None => true,
            Some(tip) if tip.hash == index.hash => false,
            // ties go to the block seen first
            Some(tip) => match index.chain_work.cmp(&tip.chain_work) {
                std::cmp::Ordering::Equal => index.sequence < tip.sequence,
                more_or_less => more_or_less.is_gt(),
            },
        }
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    pub(crate) fn insert_root(&mut self, height: u32, header: Arc<B>) -> HashOf<B> {
        let work = header.block_proof();
        let sequence = self.take_sequence();
        let mut index = BlockIndex::new(header, height, work, None, sequence);
        index.raise_validity(BlockStatus::ValidTree);
        let hash = index.hash;
        self.blocks.insert(hash, index);
        self.tips.insert(hash);
        self.active_chain = Chain::new(height);
        info!(chain = B::NAME, hash = %hash, height, "Tree bootstrapped");
        hash
    }

    /// Check `header` and link it under its parent. The block is inserted
    /// even when its parent is invalid, but then `bad-chain` is returned.
    pub(crate) fn validate_and_insert(
        &mut self,
        header: Arc<B>,
        contextually: bool,
    ) -> ValidationResult<HashOf<B>> {
        header.check(&self.params).stack("check-block")?;

        let prev_hash = header.previous_block();
        let Some(prev) = self.blocks.get(&prev_hash) else {
            return Err(ValidationError::UnknownParent {
                parent: prev_hash.to_string(),
            }
            .into());
        };
        if contextually {
            header.check_contextually(prev, self).stack("contextually-check-block")?;
        }

        let height = prev.height + 1;
        let work = &prev.chain_work + header.block_proof();
        let prev_valid = prev.is_valid();

        let sequence = self.take_sequence();
        let mut index = BlockIndex::new(header, height, work, Some(prev_hash), sequence);
        index.raise_validity(if contextually {
            BlockStatus::ValidContext
        } else {
            BlockStatus::ValidTree
        });
        if !prev_valid {
            index.set_failed(BlockStatus::FailedChild);
        }
        let hash = index.hash;
        self.blocks.insert(hash, index);
        if let Some(prev) = self.blocks.get_mut(&prev_hash) {
            prev.children.push(hash);
        }

        if !prev_valid {
            debug!(chain = B::NAME, hash = %hash, "Block descends from an invalid block");
            return Err(ValidationError::BadChain {
                hash: hash.to_string(),
            }
            .into());
        }
        self.tips.remove(&prev_hash);
        self.tips.insert(hash);
        debug!(chain = B::NAME, hash = %hash, height, "Block accepted");
        Ok(hash)
    }

    /// Point the active chain at `tip` and tell the observer.
    pub(crate) fn set_active_tip(&mut self, tip: Option<HashOf<B>>) {
        let from = self.active_chain.tip().copied();
        if from == tip {
            return;
        }
        let mut chain = std::mem::replace(&mut self.active_chain, Chain::new(0));
        chain.set_tip(self, tip.as_ref());
        self.active_chain = chain;

        debug!(
            chain = B::NAME,
            from = ?from,
            to = ?tip,
            height = ?self.active_chain.tip_height(),
            "Active tip changed"
        );
        if let Some(observer) = &self.observer {
            observer.tip_changed(from, tip, self.active_chain.tip_height());
        }
    }

    /// Mark `hash` failed with `reason` and its descendants as
    /// `FailedChild`. Returns the number of blocks marked.
    pub(crate) fn mark_failed(&mut self, hash: &HashOf<B>, reason: BlockStatus) -> usize {
        let Some(prev) = self.blocks.get(hash).map(|index| index.prev) else {
            return 0;
        };

        let mut marked = 0;
        let mut stack = vec![(*hash, reason)];
        while let Some((h, reason)) = stack.pop() {
            let Some(index) = self.blocks.get_mut(&h) else {
                continue;
            };
            index.set_failed(reason);
            stack.extend(index.children.iter().map(|c| (*c, BlockStatus::FailedChild)));
            self.tips.remove(&h);
            marked += 1;
        }

        // the parent may be a tip again
        if let Some(parent) = prev.and_then(|p| self.blocks.get(&p)) {
            if parent.is_valid() && !self.has_valid_children(parent) {
                self.tips.insert(parent.hash);
            }
        }

        info!(chain = B::NAME, hash = %hash, marked, "Block invalidated");
        if let Some(observer) = &self.observer {
            observer.block_invalidated(*hash);
        }
        marked
    }

    /// Remove `hash` and all its descendants. Returns the removed hashes.
    pub(crate) fn remove_nodes(&mut self, hash: &HashOf<B>) -> Vec<HashOf<B>> {
        let Some(prev) = self.blocks.get(hash).map(|index| index.prev) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        let mut stack = vec![*hash];
        while let Some(h) = stack.pop() {
            if let Some(index) = self.blocks.remove(&h) {
                stack.extend(index.children);
                self.tips.remove(&h);
                removed.push(h);
            }
        }

        if let Some(parent_hash) = prev {
            if let Some(parent) = self.blocks.get_mut(&parent_hash) {
                parent.children.retain(|c| c != hash);
            }
            if let Some(parent) = self.blocks.get(&parent_hash) {
                if parent.is_valid() && !self.has_valid_children(parent) {
                    self.tips.insert(parent_hash);
                }
            }
        }
        debug!(chain = B::NAME, hash = %hash, removed = removed.len(), "Subtree removed");
        removed
    }
}

/// Chain selection over a [`BlockTree`].
///
/// Implementors supply the best-chain rule and how to step the active
/// chain back. Bootstrap, acceptance, invalidation and removal are shared
/// and call back into those two hooks.
pub trait ForkChoice {
    type Block: Block;

    fn tree(&self) -> &BlockTree<Self::Block>;
    fn tree_mut(&mut self) -> &mut BlockTree<Self::Block>;

    /// Compare `candidate` against the active tip and switch if it wins.
    fn determine_best_chain(&mut self, candidate: &HashOf<Self::Block>, is_bootstrap: bool);

    /// Move the active tip back to `to`, an ancestor of the current one.
    fn retreat_tip(&mut self, to: Option<HashOf<Self::Block>>);

    /// Make `tip` active again after the change that replaced it was
    /// undone, without asking the best-chain rule.
    fn restore_tip(&mut self, tip: &HashOf<Self::Block>);

    /// Seed an empty tree with the network's first block.
    fn bootstrap_with_genesis(&mut self) -> ValidationResult<HashOf<Self::Block>> {
        let (height, genesis) = <Self::Block as Block>::genesis(self.tree().params());
        self.bootstrap_root(height, genesis)
    }

    /// Seed an empty tree with a connected chain whose first block sits at
    /// `start_height`.
    fn bootstrap_with_chain(
        &mut self,
        start_height: u32,
        chain: Vec<Self::Block>,
    ) -> ValidationResult<()> {
        if chain.is_empty() {
            return Err(ValidationError::BootstrapStateError {
                code: "bootstrap-empty-chain",
                message: "bootstrap chain is empty".to_string(),
            }
            .into());
        }
        let min = <Self::Block as Block>::min_bootstrap_blocks(self.tree().params());
        if chain.len() < min {
            return Err(ValidationError::BootstrapStateError {
                code: "bootstrap-small-chain",
                message: format!("bootstrap chain has {} blocks, need {}", chain.len(), min),
            }
            .into());
        }

        let mut blocks = chain.into_iter();
        if let Some(first) = blocks.next() {
            self.bootstrap_root(start_height, first)?;
        }
        for block in blocks {
            self.accept_header(Arc::new(block), true).stack("bootstrap-with-chain")?;
        }
        Ok(())
    }

    /// Seed an empty tree with a single block at `height`.
    fn bootstrap_root(
        &mut self,
        height: u32,
        block: Self::Block,
    ) -> ValidationResult<HashOf<Self::Block>> {
        if !self.tree().is_empty() {
            return Err(ValidationError::BootstrapStateError {
                code: "already-bootstrapped",
                message: format!("{} tree is already bootstrapped", <Self::Block as Block>::NAME),
            }
            .into());
        }
        block.check(self.tree().params()).stack("bootstrap")?;
        let hash = self.tree_mut().insert_root(height, Arc::new(block));
        self.determine_best_chain(&hash, true);
        Ok(hash)
    }

    /// Add a block. Accepting a known block again is a successful no-op.
    fn accept_block(
        &mut self,
        block: impl Into<Arc<Self::Block>>,
    ) -> ValidationResult<HashOf<Self::Block>>
    where
        Self: Sized,
    {
        self.accept_header(block.into(), false)
    }

    /// Add a block; during bootstrap the contextual checks are skipped and
    /// chain selection uses work only.
    fn accept_header(
        &mut self,
        header: Arc<Self::Block>,
        is_bootstrap: bool,
    ) -> ValidationResult<HashOf<Self::Block>> {
        let hash = header.hash();
        if self.tree().get_block_index(&hash).is_some() {
            return Ok(hash);
        }
        if self.tree().is_empty() {
            return Err(ValidationError::BootstrapStateError {
                code: "not-bootstrapped",
                message: format!("{} tree is not bootstrapped", <Self::Block as Block>::NAME),
            }
            .into());
        }
        let hash = self.tree_mut().validate_and_insert(header, !is_bootstrap).stack("accept-block")?;
        self.determine_best_chain(&hash, is_bootstrap);
        Ok(hash)
    }

    /// Mark `hash` and its descendants invalid, moving the active chain
    /// off them first.
    fn invalidate_subtree(&mut self, hash: &HashOf<Self::Block>, reason: BlockStatus) {
        let Some(index) = self.tree().get_block_index(hash) else {
            return;
        };
        let on_active_chain = self.tree().best_chain().contains(index);
        let prev = index.prev;

        if on_active_chain {
            self.retreat_tip(prev);
        }
        self.tree_mut().mark_failed(hash, reason);
        if on_active_chain {
            self.reevaluate_tips();
        }
    }

    fn invalidate_block(&mut self, hash: &HashOf<Self::Block>) {
        self.invalidate_subtree(hash, BlockStatus::FailedBlock);
    }

    /// Invalidate the active tip. Returns the hash that was invalidated.
    fn invalidate_tip(&mut self, reason: BlockStatus) -> Option<HashOf<Self::Block>> {
        let tip = self.tree().best_chain().tip().copied()?;
        self.invalidate_subtree(&tip, reason);
        Some(tip)
    }

    /// Delete `hash` and its descendants from the tree.
    fn remove_subtree(&mut self, hash: &HashOf<Self::Block>) {
        let Some(index) = self.tree().get_block_index(hash) else {
            return;
        };
        let on_active_chain = self.tree().best_chain().contains(index);
        let prev = index.prev;

        if on_active_chain {
            self.retreat_tip(prev);
        }
        self.tree_mut().remove_nodes(hash);
        if on_active_chain {
            self.reevaluate_tips();
        }
    }

    /// Offer every valid tip to [`determine_best_chain`](Self::determine_best_chain),
    /// oldest first.
    fn reevaluate_tips(&mut self) {
        let tree = self.tree();
        let mut tips: Vec<_> = tree
            .tips()
            .filter_map(|h| tree.get_block_index(h))
            .map(|index| (index.sequence, index.hash))
            .collect();
        tips.sort_unstable();
        for (_, tip) in tips {
            self.determine_best_chain(&tip, false);
        }
    }
}

impl<B: Block> ForkChoice for BlockTree<B> {
    type Block = B;

    fn tree(&self) -> &BlockTree<B> {
        self
    }

    fn tree_mut(&mut self) -> &mut BlockTree<B> {
        self
    }

    fn determine_best_chain(&mut self, candidate: &HashOf<B>, _is_bootstrap: bool) {
        if self.is_better_by_work(candidate) {
            self.set_active_tip(Some(*candidate));
        }
    }

    fn retreat_tip(&mut self, to: Option<HashOf<B>>) {
        self.set_active_tip(to);
    }

    fn restore_tip(&mut self, tip: &HashOf<B>) {
        if self.get_block_index(tip).is_some_and(|index| index.is_valid()) {
            self.set_active_tip(Some(*tip));
        }
    }
}
