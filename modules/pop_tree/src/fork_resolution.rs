//! PoP fork resolution.
//!
//! A protected tree prefers the branch whose blocks were published
//! earlier in the protecting chain. Two branches are scored from the
//! point of the highest keystone at or below their fork:
//!
//! * every endorsement contained in a branch contributes, provided its
//!   block of proof is on the protecting chain's active branch;
//! * an endorsement is worth the relative score of how late its proof was
//!   published compared to the earliest proof of the same block across
//!   both branches;
//! * each endorsed block contributes at most its maximum block score.
//!
//! The branch with the strictly higher score wins. Equal scores fall back
//! to chain work, so ALT blocks that carry no PoP behave like any other
//! chain.
//!
//! Scoring a branch needs its endorsements applied, so the comparison
//! moves the applied state between the two branches and back.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use pop_common::{PopForkParams, ValidationError, ValidationResult};
use tracing::{debug, error, info, warn};

use crate::block::{Block, CommandOf, EndorsementOf, EndorsementRecord, HashOf};
use crate::block_index::BlockStatus;
use crate::block_tree::ForkChoice;
use crate::chain::Chain;
use crate::command::{CommandId, CommandInfo};
use crate::pop_state_machine::{ApplyFailure, PopStateMachine};

/// A tree protected by PoP: it carries payload commands and applied state.
pub trait PopTree: ForkChoice + Sized {
    fn pop_params(&self) -> &PopForkParams;

    /// Tip of the branch whose commands are executed.
    fn state_tip(&self) -> Option<HashOf<Self::Block>>;
    fn set_state_tip(&mut self, tip: Option<HashOf<Self::Block>>);

    fn execute_command(&mut self, command: &mut CommandOf<Self::Block>) -> ValidationResult<()>;
    fn unexecute_command(&mut self, command: &mut CommandOf<Self::Block>);

    /// Whether the protecting tree knows the endorsement's block of proof.
    fn knows_block_of_proof(&self, endorsement: &EndorsementOf<Self::Block>) -> bool;

    /// Height of the endorsement's block of proof, if it is on the
    /// protecting tree's active chain.
    fn proof_height(&self, endorsement: &EndorsementOf<Self::Block>) -> Option<u32>;
}

/// Whether going from `bottom` to `tip` passes a keystone.
pub fn is_crossed_keystone_boundary(bottom: u32, tip: u32, keystone_interval: u32) -> bool {
    bottom / keystone_interval < tip / keystone_interval
}

/// Proof heights of endorsements contained in a branch, by endorsed
/// height.
type Publications = BTreeMap<u32, Vec<u32>>;

fn collect_publications<T: PopTree>(tree: &T, from_height: u32, tip: &HashOf<T::Block>) -> Publications {
    let mut publications = Publications::new();
    let chain = Chain::from_tip(tree.tree(), from_height, Some(tip));
    for hash in chain.iter() {
        let Some(index) = tree.tree().get_block_index(hash) else {
            continue;
        };
        for endorsement in index.containing_endorsements.values() {
            if endorsement.endorsed_height() < from_height {
                continue;
            }
            if let Some(proof_height) = tree.proof_height(endorsement) {
                publications.entry(endorsement.endorsed_height()).or_default().push(proof_height);
            }
        }
    }
    for heights in publications.values_mut() {
        heights.sort_unstable();
    }
    publications
}

/// Scores of two branches' publications against each other.
fn score_publications(params: &PopForkParams, a: &Publications, b: &Publications) -> (f64, f64) {
    let earliest = |height: &u32| {
        let first = |p: &Publications| p.get(height).and_then(|h| h.first().copied());
        match (first(a), first(b)) {
            (Some(x), Some(y)) => x.min(y),
            (Some(x), None) | (None, Some(x)) => x,
            (None, None) => 0,
        }
    };
    let score = |p: &Publications| -> f64 {
        p.iter()
            .map(|(height, proofs)| {
                let best = earliest(height);
                let sum: f64 = proofs.iter().map(|h| params.relative_score(h - best)).sum();
                sum.min(params.max_block_score(*height))
            })
            .sum()
    };
    (score(a), score(b))
}

/// Move the state to `target`. On failure the failing block is marked
/// invalid and the state returns to where it was.
fn try_switch_state<T: PopTree>(tree: &mut T, target: &HashOf<T::Block>) -> bool {
    let original = tree.state_tip();
    let Err(ApplyFailure { block, state }) =
        PopStateMachine::new(tree).unapply_and_apply(Some(target))
    else {
        return true;
    };

    warn!(chain = <T::Block as Block>::NAME, hash = %block, %state, "Block is invalid");
    tree.tree_mut().mark_failed(&block, BlockStatus::FailedBlock);
    if let Err(failure) = PopStateMachine::new(tree).unapply_and_apply(original.as_ref()) {
        error!(
            chain = <T::Block as Block>::NAME,
            to = ?original,
            state = %failure.state,
            "State cannot return"
        );
    }
    false
}

/// Compare the PoP scores of the branches ending at `a` and `b`.
///
/// `Greater` means `a` is better. Branches that contain one another, or
/// that do not both reach past the keystone below their fork, are
/// `Equal`. The applied state is the same before and after, though
/// blocks found invalid on the way are marked so.
pub fn compare_pop_score<T: PopTree>(
    tree: &mut T,
    a: &HashOf<T::Block>,
    b: &HashOf<T::Block>,
) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (Some(index_a), Some(index_b)) =
        (tree.tree().get_block_index(a), tree.tree().get_block_index(b))
    else {
        return Ordering::Equal;
    };
    let (height_a, height_b) = (index_a.height, index_b.height);
    if tree.tree().is_ancestor(a, b) || tree.tree().is_ancestor(b, a) {
        return Ordering::Equal;
    }

    let keystone_interval = tree.pop_params().keystone_interval;
    let chain_a = Chain::from_tip(tree.tree(), tree.tree().root_height(), Some(a));
    let Some(keystone) =
        chain_a.find_highest_keystone_at_or_before_fork(tree.tree(), b, keystone_interval)
    else {
        return Ordering::Equal;
    };
    let Some(keystone_height) = tree.tree().get_block_index(&keystone).map(|i| i.height) else {
        return Ordering::Equal;
    };
    if !is_crossed_keystone_boundary(keystone_height, height_a, keystone_interval)
        || !is_crossed_keystone_boundary(keystone_height, height_b, keystone_interval)
    {
        return Ordering::Equal;
    }

    let original = tree.state_tip();
    let publications_a =
        try_switch_state(tree, a).then(|| collect_publications(tree, keystone_height, a));
    let publications_b =
        try_switch_state(tree, b).then(|| collect_publications(tree, keystone_height, b));
    if tree.state_tip() != original {
        if let Err(failure) = PopStateMachine::new(tree).unapply_and_apply(original.as_ref()) {
            error!(
                chain = <T::Block as Block>::NAME,
                to = ?original,
                state = %failure.state,
                "State cannot return"
            );
        }
    }

    match (publications_a, publications_b) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (Some(pa), Some(pb)) => {
            let (score_a, score_b) = score_publications(tree.pop_params(), &pa, &pb);
            debug!(
                chain = <T::Block as Block>::NAME,
                a = %a,
                score_a,
                b = %b,
                score_b,
                "PoP scores"
            );
            if score_a > score_b {
                Ordering::Greater
            } else if score_b > score_a {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        }
    }
}

/// PoP comparison of two branches with a chain-work fallback.
pub fn compare_branches<T: PopTree>(
    tree: &mut T,
    a: &HashOf<T::Block>,
    b: &HashOf<T::Block>,
) -> ValidationResult<Ordering> {
    for hash in [a, b] {
        if tree.tree().get_block_index(hash).is_none() {
            return Err(ValidationError::UnknownBlock {
                hash: hash.to_string(),
            }
            .into());
        }
    }
    let pop = compare_pop_score(tree, a, b);
    if pop != Ordering::Equal {
        return Ok(pop);
    }
    let work = |h: &HashOf<T::Block>| tree.tree().get_block_index(h).map(|i| i.chain_work.clone());
    Ok(work(a).cmp(&work(b)))
}

/// Make `candidate` the active tip if it beats the current one.
pub fn determine_best_chain<T: PopTree>(
    tree: &mut T,
    candidate: &HashOf<T::Block>,
    is_bootstrap: bool,
) {
    let Some(index) = tree.tree().get_block_index(candidate) else {
        return;
    };
    if !index.is_valid() {
        return;
    }
    let Some(current) = tree.tree().best_chain().tip().copied() else {
        switch_to(tree, candidate);
        return;
    };
    if current == *candidate {
        return;
    }

    let pop = if is_bootstrap {
        Ordering::Equal
    } else {
        compare_pop_score(tree, candidate, &current)
    };
    let better = match pop {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => tree.tree().is_better_by_work(candidate),
    };
    if better {
        switch_to(tree, candidate);
    }
}

/// Apply the branch ending at `candidate` and make it active. A branch
/// that fails to apply is invalidated and the active chain stays.
fn switch_to<T: PopTree>(tree: &mut T, candidate: &HashOf<T::Block>) {
    let previous = tree.tree().best_chain().tip().copied();
    if try_switch_state(tree, candidate) {
        tree.tree_mut().set_active_tip(Some(*candidate));
        return;
    }
    info!(
        chain = <T::Block as Block>::NAME,
        tip = ?previous,
        candidate = %candidate,
        "Keeping tip, branch failed to apply"
    );
    if tree.state_tip() != previous {
        if let Err(failure) = PopStateMachine::new(tree).unapply_and_apply(previous.as_ref()) {
            error!(
                chain = <T::Block as Block>::NAME,
                state = %failure.state,
                "State lost the active chain"
            );
        }
    }
}

/// Make `tip` active again with its branch applied. Unknown and invalid
/// blocks are left alone.
pub fn restore_tip<T: PopTree>(tree: &mut T, tip: &HashOf<T::Block>) {
    if tree.tree().get_block_index(tip).is_some_and(|index| index.is_valid()) {
        switch_to(tree, tip);
    }
}

/// Step the active chain and the applied state back to `to`.
pub fn retreat_tip<T: PopTree>(tree: &mut T, to: Option<HashOf<T::Block>>) {
    if let Err(failure) = PopStateMachine::new(tree).unapply_and_apply(to.as_ref()) {
        error!(
            chain = <T::Block as Block>::NAME,
            to = ?to,
            state = %failure.state,
            "State cannot retreat"
        );
    }
    tree.tree_mut().set_active_tip(to);
}

/// Append `commands` to `containing`.
///
/// If the block is applied the commands execute at once: the state steps
/// back to the block, runs them, and returns to the previous tip. Failing
/// commands are dropped again and their error returned. So are commands
/// that a block above `containing` cannot be applied on top of, in which
/// case that block's error is returned and nothing is invalidated.
pub fn add_commands<T: PopTree>(
    tree: &mut T,
    containing: &HashOf<T::Block>,
    commands: Vec<CommandOf<T::Block>>,
) -> ValidationResult<()> {
    let Some(index) = tree.tree().get_block_index(containing) else {
        return Err(ValidationError::ContainingBlockNotFound {
            hash: containing.to_string(),
        }
        .into());
    };
    if !index.is_valid() {
        return Err(ValidationError::BadChain {
            hash: containing.to_string(),
        }
        .into());
    }
    let applied = tree.state_tip().is_some_and(|tip| tree.tree().is_ancestor(containing, &tip));

    if !applied {
        if let Some(index) = tree.tree_mut().get_block_index_mut(containing) {
            index.commands.extend(commands);
        }
        reevaluate_subtree(tree, containing);
        return Ok(());
    }

    let previous = tree.state_tip();
    PopStateMachine::new(tree).unapply(Some(containing));

    let mut commands = commands;
    if let Err(state) = execute_all(tree, &mut commands) {
        reapply(tree, previous);
        return Err(state);
    }
    let appended = commands.len();
    if let Some(index) = tree.tree_mut().get_block_index_mut(containing) {
        index.commands.extend(commands);
    }

    if let Some(target) = previous {
        if let Err(ApplyFailure { block, state }) = PopStateMachine::new(tree).apply(&target) {
            debug!(
                chain = <T::Block as Block>::NAME,
                containing = %containing,
                conflicting = %block,
                "Commands conflict with a later block"
            );
            take_back(tree, containing, appended);
            reapply(tree, previous);
            return Err(state);
        }
    }
    reevaluate_subtree(tree, containing);
    Ok(())
}

/// Execute `commands` in order. On failure the ones already executed are
/// undone.
fn execute_all<T: PopTree>(tree: &mut T, commands: &mut [CommandOf<T::Block>]) -> ValidationResult<()> {
    let mut executed = 0;
    let mut failure = None;
    for command in commands.iter_mut() {
        if let Err(state) = tree.execute_command(command) {
            failure = Some(state);
            break;
        }
        executed += 1;
    }
    let Some(state) = failure else {
        return Ok(());
    };
    for done in commands[..executed].iter_mut().rev() {
        tree.unexecute_command(done);
    }
    Err(state)
}

/// Unexecute and drop the last `count` commands of the applied block
/// `containing`.
fn take_back<T: PopTree>(tree: &mut T, containing: &HashOf<T::Block>, count: usize) {
    let mut removed = match tree.tree_mut().get_block_index_mut(containing) {
        Some(index) => {
            let at = index.commands.len().saturating_sub(count);
            index.commands.split_off(at)
        }
        None => return,
    };
    for command in removed.iter_mut().rev() {
        tree.unexecute_command(command);
    }
}

/// Remove the commands of `containing` starting at the one with id
/// `first`. Nothing happens if the block or the command is gone.
pub fn remove_commands<T: PopTree>(
    tree: &mut T,
    containing: &HashOf<T::Block>,
    first: CommandId,
) {
    let Some(index) = tree.tree().get_block_index(containing) else {
        return;
    };
    let Some(position) = index.commands.iter().position(|c| c.id() == first) else {
        warn!(
            chain = <T::Block as Block>::NAME,
            containing = %containing,
            command = %first,
            "Block has no such command"
        );
        return;
    };
    let applied = tree.state_tip().is_some_and(|tip| tree.tree().is_ancestor(containing, &tip));

    let previous = tree.state_tip();
    if applied {
        PopStateMachine::new(tree).unapply(Some(containing));
    }
    let mut removed = match tree.tree_mut().get_block_index_mut(containing) {
        Some(index) => index.commands.split_off(position),
        None => return,
    };
    if applied {
        for command in removed.iter_mut().rev() {
            tree.unexecute_command(command);
        }
        reapply(tree, previous);
    }
    reevaluate_subtree(tree, containing);
}

/// Re-apply the branch up to `target` after the state stepped back on it.
/// A block that no longer applies is invalidated with its descendants.
fn reapply<T: PopTree>(tree: &mut T, target: Option<HashOf<T::Block>>) {
    let Some(target) = target else {
        return;
    };
    if let Err(ApplyFailure { block, state }) = PopStateMachine::new(tree).apply(&target) {
        warn!(chain = <T::Block as Block>::NAME, hash = %block, %state, "Block no longer applies");
        tree.invalidate_subtree(&block, BlockStatus::FailedBlock);
    }
}

fn reevaluate_subtree<T: PopTree>(tree: &mut T, hash: &HashOf<T::Block>) {
    for tip in tree.tree().find_valid_tips(hash) {
        tree.determine_best_chain(&tip, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 4, 5 => false ; "below first keystone")]
    #[test_case(0, 5, 5 => true ; "reaches next keystone")]
    #[test_case(5, 9, 5 => false ; "within interval")]
    #[test_case(5, 12, 5 => true ; "past next keystone")]
    fn crossed_boundary(bottom: u32, tip: u32, interval: u32) -> bool {
        is_crossed_keystone_boundary(bottom, tip, interval)
    }

    #[test]
    fn earlier_publications_score_higher() {
        let params = PopForkParams::default();
        // branch a published block 10 at protecting height 100, b at 120
        let a = Publications::from([(10, vec![100])]);
        let b = Publications::from([(10, vec![120])]);
        let (score_a, score_b) = score_publications(&params, &a, &b);
        assert_eq!(score_a, 1.0);
        assert_eq!(score_b, params.relative_score(20));
        assert!(score_a > score_b);
    }

    #[test_case(11 => 2.0 ; "normal block")]
    #[test_case(10 => 3.0 ; "keystone")]
    fn block_score_is_capped(height: u32) -> f64 {
        let params = PopForkParams::default();
        // four on-time endorsements would score 4.0 uncapped
        let a = Publications::from([(height, vec![100, 100, 100, 100])]);
        let b = Publications::new();
        let (score_a, score_b) = score_publications(&params, &a, &b);
        assert_eq!(score_a, params.max_block_score(height));
        assert_eq!(score_b, 0.0);
        score_a
    }

    #[test]
    fn scores_are_symmetric() {
        let params = PopForkParams::default();
        let a = Publications::from([(10, vec![100, 113]), (11, vec![101])]);
        let b = Publications::from([(10, vec![104]), (12, vec![130])]);
        let (ab_a, ab_b) = score_publications(&params, &a, &b);
        let (ba_b, ba_a) = score_publications(&params, &b, &a);
        assert_eq!(ab_a, ba_a);
        assert_eq!(ab_b, ba_b);
    }
}
