mod common;

use std::collections::HashSet;

use common::{init_logging, random_item};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rrtree::{Item, RRTree, RRTreeBuilder, TreeClearIOState};

fn update_tree(scratch: usize) -> RRTree {
    RRTreeBuilder::update_tree()
        .node_capacity(3, 8)
        .buffer_size(20)
        .gc_index_cache_size(4)
        .gc_initial_scratch_mem_size(scratch)
        .open_in_memory()
        .unwrap()
}

/// Random inserts and deletes; returns the items that should be present.
fn churn(tree: &mut RRTree, rng: &mut StdRng, live: &mut Vec<Item>, next_id: &mut u64, steps: usize) {
    for _ in 0..steps {
        if live.is_empty() || rng.gen_bool(0.55) {
            let item = random_item(rng, *next_id);
            *next_id += 1;
            tree.insert(item).unwrap();
            live.push(item);
        } else {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            tree.remove(victim).unwrap();
        }
    }
}

fn full_scan(tree: &mut RRTree) -> HashSet<Item> {
    tree.query_all().unwrap().collect()
}

fn check_transparency(rebuild: bool, scratch: usize, seed: u64) {
    let mut tree = update_tree(scratch);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live = Vec::new();
    let mut next_id = 0;

    for round in 0..4 {
        churn(&mut tree, &mut rng, &mut live, &mut next_id, 400);
        let expected: HashSet<Item> = live.iter().copied().collect();
        let before = full_scan(&mut tree);
        assert_eq!(before, expected, "round {} before gc", round);
        let ratio_before = tree.physical_to_logical_ratio();
        let buffered = tree.current_buffer_size();

        tree.clean_garbage(rebuild).unwrap();
        assert_eq!(full_scan(&mut tree), before, "round {} after gc", round);
        assert!(tree.physical_to_logical_ratio() <= ratio_before);
        assert_eq!(tree.current_buffer_size(), buffered);
        assert!(tree.check_invariants().unwrap().is_empty());

        tree.clean_garbage(rebuild).unwrap();
        assert_eq!(full_scan(&mut tree), before, "round {} after second gc", round);
    }
    tree.verify_contents(&live.into_iter().collect()).unwrap();
}

#[test]
fn test_vacuum_is_transparent() {
    init_logging();
    check_transparency(false, 64, 5);
}

#[test]
fn test_vacuum_with_tiny_scratch_is_transparent() {
    init_logging();
    check_transparency(false, 4, 6);
}

#[test]
fn test_rebuild_is_transparent() {
    init_logging();
    check_transparency(true, 64, 8);
}

#[test]
fn test_rebuild_with_tiny_scratch_is_transparent() {
    init_logging();
    check_transparency(true, 3, 9);
}

#[test]
fn test_rebuild_reports_disposal_cost() {
    init_logging();
    let mut tree = update_tree(32);
    let mut rng = StdRng::seed_from_u64(13);
    let mut live = Vec::new();
    let mut next_id = 0;
    churn(&mut tree, &mut rng, &mut live, &mut next_id, 300);
    tree.on_next_eb_force_full_emptying();
    tree.forced_empty_buffer().unwrap();
    assert_eq!(tree.current_buffer_size(), 0);

    let state = tree.clean_garbage(true).unwrap();
    assert!(state.reads > 0);
    assert_eq!(state.reads, state.writes);
    assert_eq!(tree.disk_data_items(), live.len() as u64);
    assert_eq!(tree.physical_to_logical_ratio(), 1.0);

    let gc = &tree.stats().gc;
    assert_eq!(gc.leaf_nodes_before.count, 1);
    assert!(gc.run_write_ios.total > 0.0);
    assert!(gc.run_read_ios.total > 0.0);
}

#[test]
fn test_vacuum_records_statistics() {
    init_logging();
    let mut tree = update_tree(8);
    let mut rng = StdRng::seed_from_u64(17);
    let mut live = Vec::new();
    let mut next_id = 0;
    churn(&mut tree, &mut rng, &mut live, &mut next_id, 500);

    tree.clean_garbage(false).unwrap();
    let gc = &tree.stats().gc;
    assert_eq!(gc.leaf_nodes_before.count, 1);
    assert_eq!(gc.partial_cleaning_iterations.count, 1);
    assert!(gc.peak_nodes_loaded_at_once >= 1);
    assert!(gc.leaf_nodes_after.total <= gc.leaf_nodes_before.total);
}

#[test]
fn test_gc_on_data_tree_is_a_no_op() {
    init_logging();
    let mut tree = RRTreeBuilder::data_tree()
        .node_capacity(3, 8)
        .buffer_size(20)
        .open_in_memory()
        .unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let mut live = Vec::new();
    let mut next_id = 0;
    churn(&mut tree, &mut rng, &mut live, &mut next_id, 200);
    let before = full_scan(&mut tree);
    let counters = tree.io_counters();
    for rebuild in [false, true] {
        assert_eq!(tree.clean_garbage(rebuild).unwrap(), TreeClearIOState::default());
    }
    assert_eq!(tree.io_counters(), counters);
    assert_eq!(full_scan(&mut tree), before);
}
