//! ALT and VBK trees driven through their public API.

mod common;

use std::cmp::Ordering;
use std::sync::Arc;

use pop_common::{AltBlock, AltHash, AltPayloads, VbkBlock};
use pop_module_tree::{
    load_tree, save_tree, AltTree, ForkChoice, InMemoryBlockRepository, PopTree, VbkBlockTree,
};
use pop_test_utils::{
    alt_params, btc_params, make_alt_payloads, make_atv, mine_alt, mine_vbk, mine_vbk_chain,
    vbk_params,
};

fn alt_tree() -> AltTree {
    common::init_tracing();
    let mut tree = AltTree::new(
        Arc::new(alt_params()),
        Arc::new(vbk_params()),
        Arc::new(btc_params()),
    );
    tree.bootstrap().unwrap();
    tree
}

fn mine_on(tree: &mut AltTree, parent: &AltHash, count: usize) -> Vec<AltBlock> {
    let mut prev = (*tree.tree().get_block_index(parent).unwrap().header).clone();
    let mut blocks = Vec::new();
    for _ in 0..count {
        let block = mine_alt(&prev);
        tree.accept_block(block.clone()).unwrap();
        prev = block.clone();
        blocks.push(block);
    }
    blocks
}

/// Payloads endorsing `endorsed` from a VBK block mined on `vbk_prev`,
/// with `context` connecting `vbk_prev` to the VBK tree.
fn endorse(
    tree: &AltTree,
    endorsed: &AltBlock,
    vbk_prev: &VbkBlock,
    context: Vec<VbkBlock>,
) -> (AltPayloads, VbkBlock) {
    let containing = mine_vbk(vbk_prev);
    let atv = make_atv(tree.params(), endorsed, b"miner", &containing, context);
    (make_alt_payloads(endorsed, atv, Vec::new(), Vec::new()), containing)
}

#[test]
fn earlier_publications_take_over_and_compare_antisymmetrically() {
    let mut tree = alt_tree();
    let genesis = alt_params().bootstrap_block.hash;
    let vbk_genesis = vbk_params().genesis_block;

    let a = mine_on(&mut tree, &genesis, 20);
    let a_tip = a[19].hash;
    let (payloads, _) = endorse(&tree, &a[11], &vbk_genesis, Vec::new());
    tree.add_payloads(&a[14].hash, &[payloads], true).unwrap();

    let b = mine_on(&mut tree, &a[9].hash, 12);
    let b_tip = b[11].hash;
    assert_eq!(tree.tree().best_chain().tip(), Some(&a_tip));

    // two endorsements on B, the first published as early as A's
    let (first, vbk1) = endorse(&tree, &b[1], &vbk_genesis, Vec::new());
    let (second, _) = endorse(&tree, &b[2], &vbk1, vec![vbk1.clone()]);
    tree.add_payloads(&b[4].hash, &[first, second], true).unwrap();

    assert_eq!(tree.tree().best_chain().tip(), Some(&b_tip));
    assert_eq!(tree.state_tip(), Some(b_tip));
    assert!(tree.endorsements_of(&a[11].hash).is_empty());
    assert_eq!(tree.vbk().tree().best_chain().tip_height(), Some(2));

    let vbk_blocks = tree.vbk().tree().len();
    assert_eq!(tree.compare_branches(&b_tip, &a_tip).unwrap(), Ordering::Greater);
    assert_eq!(tree.compare_branches(&a_tip, &b_tip).unwrap(), Ordering::Less);
    // comparing leaves the applied state where it was
    assert_eq!(tree.state_tip(), Some(b_tip));
    assert_eq!(tree.vbk().tree().len(), vbk_blocks);
}

#[test]
fn leaving_and_returning_restores_state() {
    let mut tree = alt_tree();
    let genesis = alt_params().bootstrap_block.hash;
    let main = mine_on(&mut tree, &genesis, 8);
    let (payloads, vbk) = endorse(&tree, &main[5], &vbk_params().genesis_block, Vec::new());
    tree.add_payloads(&main[6].hash, &[payloads], true).unwrap();
    assert_eq!(tree.endorsements_of(&main[5].hash).len(), 1);

    // a longer fork within the same keystone interval takes over by work
    let side = mine_on(&mut tree, &main[5].hash, 3);
    assert_eq!(tree.state_tip(), Some(side[2].hash));
    assert!(tree.endorsements_of(&main[5].hash).is_empty());
    assert!(tree.vbk().tree().get_block_index(&vbk.hash()).is_none());

    // and losing it brings the payloads back
    tree.invalidate_block(&side[0].hash);
    assert_eq!(tree.state_tip(), Some(main[7].hash));
    assert_eq!(tree.endorsements_of(&main[5].hash).len(), 1);
    assert!(tree.vbk().tree().get_block_index(&vbk.hash()).is_some());
}

#[test]
fn failed_atomic_add_changes_nothing() {
    let mut tree = alt_tree();
    let genesis = alt_params().bootstrap_block.hash;
    let blocks = mine_on(&mut tree, &genesis, 4);
    let (good, _) = endorse(&tree, &blocks[0], &vbk_params().genesis_block, Vec::new());
    // the containing VBK block's parent is nowhere to be found
    let orphan = mine_vbk_chain(&vbk_params().genesis_block, 2);
    let (bad, _) = endorse(&tree, &blocks[1], &orphan[1], Vec::new());

    let err = tree.add_payloads(&blocks[3].hash, &[good, bad], true).unwrap_err();
    assert_eq!(err.stack()[0], "alt-add-payloads[1]");
    assert!(tree.tree().get_block_index(&blocks[3].hash).unwrap().commands.is_empty());
    assert!(tree.endorsements_of(&blocks[0].hash).is_empty());
    assert_eq!(tree.vbk().tree().len(), 1);
}

#[test]
fn vbk_headers_survive_a_repository_round_trip() {
    common::init_tracing();
    let vbk = || VbkBlockTree::new(Arc::new(vbk_params()), Arc::new(btc_params()));
    let mut tree = vbk();
    tree.btc_mut().bootstrap_with_genesis().unwrap();
    tree.bootstrap_with_genesis().unwrap();

    let main = mine_vbk_chain(&vbk_params().genesis_block, 30);
    let side = mine_vbk_chain(&main[9], 5);
    for block in main.iter().chain(side.iter()) {
        tree.accept_block(block.clone()).unwrap();
    }

    let repository = InMemoryBlockRepository::<VbkBlock>::new();
    assert_eq!(save_tree(&tree, &repository).unwrap(), 36);

    let mut loaded = vbk();
    assert_eq!(load_tree(&mut loaded, &repository).unwrap(), 36);
    assert_eq!(loaded.tree().best_chain().tip(), Some(&main[29].hash()));
    assert_eq!(loaded.tree().tips().count(), 2);
}
