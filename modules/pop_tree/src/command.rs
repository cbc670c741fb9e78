//! Reversible payload commands.
//!
//! Payloads attached to a block are translated into commands once and
//! stored on the block. The state machine executes them when the block
//! joins the applied chain and unexecutes them, in reverse, when it
//! leaves. A command must leave the trees exactly as it found them once
//! unexecuted.

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use pop_common::{BtcBlock, ValidationResult, VbkBlock};

use crate::add_block::AddBlock;
use crate::add_endorsement::AddEndorsement;
use crate::add_vtb::AddVtb;
use crate::alt_tree::AltTree;
use crate::vbk_block_tree::VbkBlockTree;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a command. Clones keep it, so it survives tree snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    pub fn next() -> Self {
        Self(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity and description, independent of the tree a command runs on.
pub trait CommandInfo {
    fn id(&self) -> CommandId;
    fn describe(&self) -> String;
}

/// A reversible effect on `T`.
pub trait Command<T>: CommandInfo {
    fn execute(&mut self, tree: &mut T) -> ValidationResult<()>;

    /// Undo a successful [`execute`](Self::execute).
    fn unexecute(&mut self, tree: &mut T);
}

// BTC blocks carry no payloads
impl CommandInfo for Infallible {
    fn id(&self) -> CommandId {
        match *self {}
    }

    fn describe(&self) -> String {
        match *self {}
    }
}

/// Commands carried by VBK blocks.
#[derive(Debug, Clone)]
pub enum VbkCommand {
    AddBtcBlock(AddBlock<BtcBlock>),
    AddBtcEndorsement(AddEndorsement<VbkBlock>),
}

impl CommandInfo for VbkCommand {
    fn id(&self) -> CommandId {
        match self {
            VbkCommand::AddBtcBlock(c) => c.id(),
            VbkCommand::AddBtcEndorsement(c) => c.id(),
        }
    }

    fn describe(&self) -> String {
        match self {
            VbkCommand::AddBtcBlock(c) => c.describe(),
            VbkCommand::AddBtcEndorsement(c) => c.describe(),
        }
    }
}

impl Command<VbkBlockTree> for VbkCommand {
    fn execute(&mut self, tree: &mut VbkBlockTree) -> ValidationResult<()> {
        match self {
            VbkCommand::AddBtcBlock(c) => c.execute(tree.btc_mut()),
            VbkCommand::AddBtcEndorsement(c) => c.execute(tree),
        }
    }

    fn unexecute(&mut self, tree: &mut VbkBlockTree) {
        match self {
            VbkCommand::AddBtcBlock(c) => c.unexecute(tree.btc_mut()),
            VbkCommand::AddBtcEndorsement(c) => c.unexecute(tree),
        }
    }
}

/// Commands carried by ALT blocks.
#[derive(Debug, Clone)]
pub enum AltCommand {
    AddVbkBlock(AddBlock<VbkBlock>),
    AddVtb(AddVtb),
    AddVbkEndorsement(AddEndorsement<pop_common::AltBlock>),
}

impl CommandInfo for AltCommand {
    fn id(&self) -> CommandId {
        match self {
            AltCommand::AddVbkBlock(c) => c.id(),
            AltCommand::AddVtb(c) => c.id(),
            AltCommand::AddVbkEndorsement(c) => c.id(),
        }
    }

    fn describe(&self) -> String {
        match self {
            AltCommand::AddVbkBlock(c) => c.describe(),
            AltCommand::AddVtb(c) => c.describe(),
            AltCommand::AddVbkEndorsement(c) => c.describe(),
        }
    }
}

impl Command<AltTree> for AltCommand {
    fn execute(&mut self, tree: &mut AltTree) -> ValidationResult<()> {
        match self {
            AltCommand::AddVbkBlock(c) => c.execute(tree.vbk_mut()),
            AltCommand::AddVtb(c) => c.execute(tree),
            AltCommand::AddVbkEndorsement(c) => c.execute(tree),
        }
    }

    fn unexecute(&mut self, tree: &mut AltTree) {
        match self {
            AltCommand::AddVbkBlock(c) => c.unexecute(tree.vbk_mut()),
            AltCommand::AddVtb(c) => c.unexecute(tree),
            AltCommand::AddVbkEndorsement(c) => c.unexecute(tree),
        }
    }
}
