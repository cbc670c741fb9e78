//! Observer trait for block tree events.

use crate::block::{Block, HashOf};

/// Callback receiver for block tree events.
///
/// The host implements this to follow the active chain without polling,
/// e.g. to reorganise its own state when the tip moves.
pub trait BlockTreeObserver<B: Block>: Send + Sync {
    /// The active tip moved from `from` to `to`, now at `height`.
    fn tip_changed(&self, from: Option<HashOf<B>>, to: Option<HashOf<B>>, height: Option<u32>);

    /// A block and its descendants were marked invalid.
    fn block_invalidated(&self, hash: HashOf<B>);
}
