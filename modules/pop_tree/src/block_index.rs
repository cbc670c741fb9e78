//! Tree node: a header plus everything the tree derived about it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashu_int::UBig;
use pop_common::PayloadId;

use crate::block::{Block, CommandOf, EndorsementOf, HashOf};

/// Validation status of a block.
///
/// Validity only ever rises while a block is valid; once failed it stays
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockStatus {
    Unknown,
    /// Structural checks passed and the parent is known.
    ValidTree,
    /// Contextual checks against the ancestors passed as well.
    ValidContext,
    /// The block itself is invalid.
    FailedBlock,
    /// An ancestor is invalid.
    FailedChild,
}

impl BlockStatus {
    pub fn is_valid(self) -> bool {
        !matches!(self, BlockStatus::FailedBlock | BlockStatus::FailedChild)
    }

    pub fn is_failed(self) -> bool {
        !self.is_valid()
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStatus::Unknown => "unknown",
            BlockStatus::ValidTree => "valid-tree",
            BlockStatus::ValidContext => "valid-context",
            BlockStatus::FailedBlock => "failed-block",
            BlockStatus::FailedChild => "failed-child",
        };
        f.write_str(s)
    }
}

/// A block in the tree.
#[derive(Debug, Clone)]
pub struct BlockIndex<B: Block> {
    pub header: Arc<B>,
    pub hash: HashOf<B>,
    pub height: u32,
    /// Cumulative work from the tree root up to and including this block.
    pub chain_work: UBig,
    /// `None` only for the bootstrap root.
    pub prev: Option<HashOf<B>>,
    /// Order in which the tree received the block. Lower is earlier.
    pub sequence: u64,
    pub children: Vec<HashOf<B>>,
    pub status: BlockStatus,
    /// Payload commands, in the order they were added.
    pub commands: Vec<CommandOf<B>>,
    /// Endorsements whose proof this block contains, by id.
    pub containing_endorsements: HashMap<PayloadId, Arc<EndorsementOf<B>>>,
    /// Endorsements of this block, contained in its descendants.
    pub endorsed_by: Vec<Arc<EndorsementOf<B>>>,
}

impl<B: Block> BlockIndex<B> {
    pub(crate) fn new(
        header: Arc<B>,
        height: u32,
        chain_work: UBig,
        prev: Option<HashOf<B>>,
        sequence: u64,
    ) -> Self {
        Self {
            hash: header.hash(),
            header,
            height,
            chain_work,
            prev,
            sequence,
            children: Vec::new(),
            status: BlockStatus::Unknown,
            commands: Vec::new(),
            containing_endorsements: HashMap::new(),
            endorsed_by: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }

    /// Raise the status to `to`. Failed blocks and higher statuses are kept.
    pub fn raise_validity(&mut self, to: BlockStatus) -> bool {
        if self.status.is_failed() || to.is_failed() || self.status >= to {
            return false;
        }
        self.status = to;
        true
    }

    /// Mark the block failed. A block known to be bad itself stays
    /// `FailedBlock`.
    pub fn set_failed(&mut self, reason: BlockStatus) {
        debug_assert!(reason.is_failed());
        if self.status != BlockStatus::FailedBlock {
            self.status = reason;
        }
    }

    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

impl<B: Block> fmt::Display for BlockIndex<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}BlockIndex{{height={}, hash={}, status={}, commands={}, endorsements={}, endorsed_by={}}}",
            B::NAME,
            self.height,
            self.hash,
            self.status,
            self.commands.len(),
            self.containing_endorsements.len(),
            self.endorsed_by.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_only_rises() {
        let mut status = BlockIndex::<pop_common::AltBlock>::new(
            Arc::new(pop_common::AltBlock {
                hash: [1u8; 32].into(),
                previous_block: Default::default(),
                height: 0,
                timestamp: 0,
            }),
            0,
            UBig::ONE,
            None,
            0,
        );
        assert!(status.raise_validity(BlockStatus::ValidContext));
        assert!(!status.raise_validity(BlockStatus::ValidTree));
        assert_eq!(status.status, BlockStatus::ValidContext);

        status.set_failed(BlockStatus::FailedChild);
        status.set_failed(BlockStatus::FailedBlock);
        status.set_failed(BlockStatus::FailedChild);
        assert_eq!(status.status, BlockStatus::FailedBlock);
        assert!(!status.raise_validity(BlockStatus::ValidTree));
        assert!(!status.is_valid());
    }
}
