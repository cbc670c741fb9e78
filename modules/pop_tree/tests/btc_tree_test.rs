//! Bitcoin header tree: long chains and work-based fork choice.

mod common;

use std::sync::Arc;

use pop_common::{BtcBlock, BtcHash};
use pop_module_tree::{BlockStatus, BtcBlockTree, ForkChoice};
use pop_test_utils::{btc_params, mine_btc, mine_btc_chain};

fn btc_tree() -> BtcBlockTree {
    common::init_tracing();
    let mut tree = BtcBlockTree::new(Arc::new(btc_params()));
    tree.bootstrap_with_genesis().unwrap();
    tree
}

fn accept_all(tree: &mut BtcBlockTree, blocks: &[BtcBlock]) {
    for block in blocks {
        tree.accept_block(block.clone()).unwrap();
    }
}

fn tip(tree: &BtcBlockTree) -> BtcHash {
    *tree.best_chain().tip().unwrap()
}

#[test]
fn ten_thousand_blocks_link_up() {
    let mut tree = btc_tree();
    let mut prev = btc_params().genesis_block;
    for _ in 0..10_000 {
        let block = mine_btc(&prev);
        tree.accept_block(block.clone()).unwrap();
        prev = block;
    }

    let chain = tree.best_chain();
    assert_eq!(chain.len(), 10_001);
    assert_eq!(chain.tip(), Some(&prev.hash()));
    for height in 1..=10_000 {
        let block = tree.get_block_index(chain.get(height).unwrap()).unwrap();
        assert_eq!(block.height, height);
        assert_eq!(Some(&block.header.previous_block), chain.get(height - 1));
    }
}

#[test]
fn more_work_switches_the_active_chain() {
    let mut tree = btc_tree();
    let genesis = btc_params().genesis_block;

    let fork1 = mine_btc_chain(&genesis, 99);
    accept_all(&mut tree, &fork1);
    assert_eq!(tree.best_chain().len(), 100);

    // fork2 leaves fork1 at height 49 and reaches 149
    let fork2 = mine_btc_chain(&fork1[48], 100);
    accept_all(&mut tree, &fork2);
    assert_eq!(tip(&tree), fork2[99].hash());
    assert_eq!(tree.best_chain().len(), 150);

    // fork1 to 129 is still behind
    let more = mine_btc_chain(&fork1[98], 30);
    accept_all(&mut tree, &more);
    assert_eq!(tip(&tree), fork2[99].hash());
    assert_eq!(tree.best_chain().len(), 150);

    // and to 159 ahead
    let rest = mine_btc_chain(&more[29], 30);
    accept_all(&mut tree, &rest);
    assert_eq!(tip(&tree), rest[29].hash());
    assert_eq!(tree.best_chain().len(), 160);
    assert_eq!(tree.best_chain().get(60), Some(&fork1[59].hash()));
}

#[test]
fn accepting_twice_stores_once() {
    let mut tree = btc_tree();
    let block = mine_btc(&btc_params().genesis_block);
    let first = tree.accept_block(block.clone()).unwrap();
    let second = tree.accept_block(block).unwrap();
    assert_eq!(first, second);
    assert_eq!(tree.len(), 2);
}

#[test]
fn wrong_bits_are_rejected() {
    let mut tree = btc_tree();
    let mut block = mine_btc(&btc_params().genesis_block);
    block.bits = 0x1d00ffff;
    let err = tree.accept_block(block).unwrap_err();
    assert_eq!(err.stack()[0], "accept-block");
    assert_eq!(tree.len(), 1);
}

#[test]
fn invalidation_falls_back_to_the_other_fork() {
    let mut tree = btc_tree();
    let genesis = btc_params().genesis_block;
    let main = mine_btc_chain(&genesis, 10);
    accept_all(&mut tree, &main);
    let side = mine_btc_chain(&main[2], 5);
    accept_all(&mut tree, &side);
    assert_eq!(tip(&tree), main[9].hash());

    tree.invalidate_block(&main[4].hash());
    assert_eq!(tip(&tree), side[4].hash());
    let failed = tree.get_block_index(&main[9].hash()).unwrap();
    assert_eq!(failed.status, BlockStatus::FailedChild);

    // children of invalid blocks are refused
    let late = mine_btc(&main[9]);
    assert_eq!(tree.accept_block(late).unwrap_err().code(), "bad-chain");
    assert_eq!(tip(&tree), side[4].hash());
}
