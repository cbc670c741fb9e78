//! Storage of block headers between runs.
//!
//! Trees keep everything in memory. A repository holds the headers so a
//! tree can be rebuilt on start: the lowest stored header becomes the
//! root and the rest are accepted again in height order.

use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::block::{Block, HashOf};
use crate::block_tree::ForkChoice;

/// A header and the height it was stored at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlock<B: Block> {
    pub height: u32,
    pub header: B,
}

impl<B: Block> StoredBlock<B> {
    pub fn hash(&self) -> HashOf<B> {
        self.header.hash()
    }
}

pub type StoredBlockCursor<'a, B> = Box<dyn Iterator<Item = StoredBlock<B>> + 'a>;

/// Header storage
pub trait BlockRepository<B: Block>: Send + Sync {
    /// Lookup a header
    fn get_by_hash(&self, hash: &HashOf<B>) -> Result<Option<StoredBlock<B>>>;

    /// Add or replace a header. Returns true if it was new.
    fn put(&self, block: StoredBlock<B>) -> Result<bool>;

    /// Delete a header. Returns true if it was stored.
    fn remove_by_hash(&self, hash: &HashOf<B>) -> Result<bool>;

    /// All headers, lowest height first
    fn cursor(&self) -> Result<StoredBlockCursor<'_, B>>;
}

/// In-memory header store using DashMap
pub struct InMemoryBlockRepository<B: Block> {
    blocks: DashMap<HashOf<B>, StoredBlock<B>>,
}

impl<B: Block> InMemoryBlockRepository<B> {
    pub fn new() -> Self {
        info!(chain = B::NAME, "Storing headers in memory (DashMap)");
        Self {
            blocks: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<B: Block> Default for InMemoryBlockRepository<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Block> BlockRepository<B> for InMemoryBlockRepository<B> {
    fn get_by_hash(&self, hash: &HashOf<B>) -> Result<Option<StoredBlock<B>>> {
        // Clone out, the map ref holds a shard lock
        Ok(self.blocks.get(hash).map(|entry| entry.value().clone()))
    }

    fn put(&self, block: StoredBlock<B>) -> Result<bool> {
        Ok(self.blocks.insert(block.hash(), block).is_none())
    }

    fn remove_by_hash(&self, hash: &HashOf<B>) -> Result<bool> {
        Ok(self.blocks.remove(hash).is_some())
    }

    fn cursor(&self) -> Result<StoredBlockCursor<'_, B>> {
        let mut blocks: Vec<StoredBlock<B>> =
            self.blocks.iter().map(|entry| entry.value().clone()).collect();
        blocks.sort_by(|a, b| a.height.cmp(&b.height).then_with(|| a.hash().cmp(&b.hash())));
        Ok(Box::new(blocks.into_iter()))
    }
}

/// Write every header of `tree` to `repository`. Returns the number
/// written.
pub fn save_tree<T, R>(tree: &T, repository: &R) -> Result<usize>
where
    T: ForkChoice,
    R: BlockRepository<T::Block> + ?Sized,
{
    let mut written = 0;
    for index in tree.tree().blocks() {
        repository.put(StoredBlock {
            height: index.height,
            header: (*index.header).clone(),
        })?;
        written += 1;
    }
    info!(chain = <T::Block as Block>::NAME, written, "Saved headers");
    Ok(written)
}

/// Rebuild an empty `tree` from `repository`.
///
/// Headers that do not connect to what was loaded before them are
/// deleted from the repository. Returns the number of headers loaded.
pub fn load_tree<T, R>(tree: &mut T, repository: &R) -> Result<usize>
where
    T: ForkChoice,
    R: BlockRepository<T::Block> + ?Sized,
{
    if !tree.tree().is_empty() {
        bail!("{} tree must be empty to load", <T::Block as Block>::NAME);
    }
    let mut stored = repository.cursor()?;
    let Some(root) = stored.next() else {
        return Ok(0);
    };
    tree.bootstrap_root(root.height, root.header)?;

    let mut loaded = 1;
    let mut dropped = Vec::new();
    for block in stored {
        let hash = block.hash();
        match tree.accept_header(Arc::new(block.header), true) {
            Ok(_) => loaded += 1,
            Err(state) => {
                warn!(
                    chain = <T::Block as Block>::NAME,
                    hash = %hash,
                    height = block.height,
                    %state,
                    "Dropping stored block"
                );
                if tree.tree().get_block_index(&hash).is_some() {
                    tree.remove_subtree(&hash);
                }
                dropped.push(hash);
            }
        }
    }
    for hash in &dropped {
        repository.remove_by_hash(hash)?;
    }

    info!(
        chain = <T::Block as Block>::NAME,
        loaded,
        dropped = dropped.len(),
        "Loaded headers"
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_tree::test_helpers::{alt, alt_hash, alt_params, alt_tree};
    use crate::block_tree::BlockTree;
    use pop_common::AltBlock;

    fn loaded_tree(repository: &InMemoryBlockRepository<AltBlock>) -> BlockTree<AltBlock> {
        let mut tree = BlockTree::new(Arc::new(alt_params()));
        load_tree(&mut tree, repository).unwrap();
        tree
    }

    #[test]
    fn put_get_remove() {
        let repository = InMemoryBlockRepository::new();
        let block = StoredBlock {
            height: 1,
            header: alt(1, 0, 1),
        };
        assert!(repository.put(block.clone()).unwrap());
        assert!(!repository.put(block.clone()).unwrap());
        assert_eq!(repository.get_by_hash(&alt_hash(1)).unwrap(), Some(block));
        assert!(repository.remove_by_hash(&alt_hash(1)).unwrap());
        assert!(!repository.remove_by_hash(&alt_hash(1)).unwrap());
        assert!(repository.is_empty());
    }

    #[test]
    fn cursor_is_ordered_by_height() {
        let repository = InMemoryBlockRepository::new();
        for (n, prev, height) in [(3, 2, 3), (1, 0, 1), (2, 1, 2), (4, 1, 2)] {
            repository
                .put(StoredBlock {
                    height,
                    header: alt(n, prev, height),
                })
                .unwrap();
        }
        let heights: Vec<u32> = repository.cursor().unwrap().map(|b| b.height).collect();
        assert_eq!(heights, vec![1, 2, 2, 3]);
    }

    #[test]
    fn tree_round_trip() {
        let mut tree = alt_tree();
        tree.accept_block(alt(1, 0, 1)).unwrap();
        tree.accept_block(alt(2, 1, 2)).unwrap();
        tree.accept_block(alt(3, 2, 3)).unwrap();
        tree.accept_block(alt(4, 1, 2)).unwrap();

        let repository = InMemoryBlockRepository::new();
        assert_eq!(save_tree(&tree, &repository).unwrap(), 5);

        let loaded = loaded_tree(&repository);
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.best_chain().tip(), Some(&alt_hash(3)));
        assert_eq!(loaded.get_block_index(&alt_hash(4)).unwrap().prev, Some(alt_hash(1)));
    }

    #[test]
    fn disconnected_headers_are_dropped() {
        let mut tree = alt_tree();
        tree.accept_block(alt(1, 0, 1)).unwrap();
        let repository = InMemoryBlockRepository::new();
        save_tree(&tree, &repository).unwrap();
        // parent 9 was never stored
        repository
            .put(StoredBlock {
                height: 5,
                header: alt(10, 9, 5),
            })
            .unwrap();

        let loaded = loaded_tree(&repository);
        assert_eq!(loaded.len(), 2);
        assert!(repository.get_by_hash(&alt_hash(10)).unwrap().is_none());
        assert_eq!(repository.len(), 2);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn load_reports_counts_as_fields() {
        let mut tree = alt_tree();
        tree.accept_block(alt(1, 0, 1)).unwrap();
        let repository = InMemoryBlockRepository::new();
        save_tree(&tree, &repository).unwrap();
        repository
            .put(StoredBlock {
                height: 5,
                header: alt(10, 9, 5),
            })
            .unwrap();

        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || loaded_tree(&repository));

        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Dropping stored block"));
        assert!(logs.contains("height=5"));
        assert!(logs.contains("loaded=2"));
        assert!(logs.contains("dropped=1"));
    }

    #[test]
    fn load_needs_empty_tree() {
        let mut tree = alt_tree();
        let repository = InMemoryBlockRepository::<AltBlock>::new();
        assert!(load_tree(&mut tree, &repository).is_err());
        let mut empty = BlockTree::new(Arc::new(alt_params()));
        assert_eq!(load_tree(&mut empty, &repository).unwrap(), 0);
        assert!(empty.is_empty());
    }
}
