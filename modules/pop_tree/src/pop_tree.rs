//! Proof-of-Proof block trees.
//!
//! Three trees protect one another: BTC headers are chosen by work, VBK
//! headers by how early they were published into BTC, and ALT blocks by
//! how early they were published into VBK. Proofs arrive as payloads on
//! the protected blocks; they are stored as reversible commands and
//! executed only while their block is on the applied branch.

pub mod add_block;
pub mod add_endorsement;
pub mod add_vtb;
pub mod alt_tree;
pub mod block;
pub mod block_index;
pub mod block_tree;
pub mod chain;
pub mod command;
pub mod fork_resolution;
pub mod payloads;
pub mod pop_state_machine;
pub mod repository;
pub mod rewards;
pub mod tree_observer;
pub mod vbk_block_tree;

pub use alt_tree::AltTree;
pub use block::{Block, EndorsementRecord, HashOf};
pub use block_index::{BlockIndex, BlockStatus};
pub use block_tree::{BlockTree, ForkChoice};
pub use chain::Chain;
pub use command::{AltCommand, CommandId, CommandInfo, VbkCommand};
pub use fork_resolution::PopTree;
pub use repository::{load_tree, save_tree, BlockRepository, InMemoryBlockRepository, StoredBlock};
pub use rewards::{EndorsementProof, PopRewards};
pub use tree_observer::BlockTreeObserver;
pub use vbk_block_tree::VbkBlockTree;

/// Tree of Bitcoin headers, chosen by chain work.
pub type BtcBlockTree = BlockTree<pop_common::BtcBlock>;
