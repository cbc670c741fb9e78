//! Import of a VTB into the VBK tree on behalf of an ALT block.

use std::slice;
use std::sync::Arc;

use pop_common::{ValidationResult, Vtb};

use crate::alt_tree::AltTree;
use crate::command::{Command, CommandId, CommandInfo};

/// Attaches a VTB to its containing VBK block.
///
/// Executing appends the VTB's commands to the VBK block; unexecuting
/// removes exactly that suffix again, found by the id of its first
/// command.
#[derive(Debug, Clone)]
pub struct AddVtb {
    id: CommandId,
    vtb: Arc<Vtb>,
    first_appended: Option<CommandId>,
}

impl AddVtb {
    pub fn new(vtb: Arc<Vtb>) -> Self {
        Self {
            id: CommandId::next(),
            vtb,
            first_appended: None,
        }
    }

    pub fn vtb(&self) -> &Vtb {
        &self.vtb
    }
}

impl CommandInfo for AddVtb {
    fn id(&self) -> CommandId {
        self.id
    }

    fn describe(&self) -> String {
        format!(
            "AddVtb{{id={}, containing={}, published={}}}",
            self.vtb.id(),
            self.vtb.containing_block.hash(),
            self.vtb.transaction.published_block.hash()
        )
    }
}

impl Command<AltTree> for AddVtb {
    fn execute(&mut self, tree: &mut AltTree) -> ValidationResult<()> {
        let containing = self.vtb.containing_block.hash();
        match tree.vbk_mut().add_payloads(&containing, slice::from_ref(&*self.vtb)) {
            Ok(first) => {
                self.first_appended = first;
                Ok(())
            }
            Err(state) => Err(state.push(self.describe())),
        }
    }

    fn unexecute(&mut self, tree: &mut AltTree) {
        if let Some(first) = self.first_appended.take() {
            let containing = self.vtb.containing_block.hash();
            tree.vbk_mut().remove_payloads(&containing, first);
        }
    }
}
