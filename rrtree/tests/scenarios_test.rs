mod common;

use std::collections::HashSet;

use common::{grid_item, init_logging};
use rrtree::{Item, RRTreeBuilder, Rect, TreeClearIOState};

#[test]
fn test_full_buffer_is_emptied_on_next_insert() {
    init_logging();
    let mut tree = RRTreeBuilder::data_tree()
        .buffer_size(101)
        .open_in_memory()
        .unwrap();

    for id in 0..100 {
        tree.insert(grid_item(id)).unwrap();
        assert!(!tree.is_buffer_full(), "buffer full after {} inserts", id + 1);
    }
    tree.insert(grid_item(100)).unwrap();
    assert!(tree.is_buffer_full());
    assert_eq!(tree.disk_data_items(), 0);

    tree.insert(grid_item(101)).unwrap();
    assert!(tree.was_buffer_emptied());
    assert!(!tree.is_buffer_full());
    assert_eq!(tree.current_buffer_size(), 1);
    assert_eq!(tree.disk_data_items(), 101);
    assert!(tree.check_invariants().unwrap().is_empty());

    for id in 0..=100 {
        let item = grid_item(id);
        let hits: Vec<Item> = tree.query(&item.rect, 0).unwrap().collect();
        assert_eq!(hits, vec![item]);
    }
}

fn query_new_item_near_disk_items(piggybacking: bool) -> (Vec<Item>, usize, usize) {
    let mut tree = RRTreeBuilder::data_tree()
        .buffer_size(50)
        .piggybacking(piggybacking)
        .open_in_memory()
        .unwrap();
    for id in 0..50 {
        tree.insert(grid_item(id)).unwrap();
    }
    // far from the disk items, so no query touches it
    tree.insert(Item::new(50, Rect::new(1000.0, 1000.0, 1001.0, 1001.0)))
        .unwrap();
    assert!(tree.was_buffer_emptied());
    assert_eq!(tree.disk_data_items(), 50);

    // in the gap between items 0 and 1
    let new_item = Item::new(51, Rect::new(1.5, 0.2, 2.5, 0.8));
    tree.insert(new_item).unwrap();
    let before = tree.current_buffer_size();
    let hits: Vec<Item> = tree.query(&new_item.rect, 0).unwrap().collect();
    let after = tree.current_buffer_size();
    assert!(tree.check_invariants().unwrap().is_empty());
    (hits, before, after)
}

#[test]
fn test_query_piggybacks_new_item_into_leaf() {
    init_logging();
    let new_item = Item::new(51, Rect::new(1.5, 0.2, 2.5, 0.8));

    let (hits, before, after) = query_new_item_near_disk_items(true);
    assert_eq!(hits, vec![new_item]);
    assert_eq!(before, 2);
    assert_eq!(after, 1);

    let (hits, before, after) = query_new_item_near_disk_items(false);
    assert_eq!(hits, vec![new_item]);
    assert_eq!(before, 2);
    assert_eq!(after, 2);
}

#[test]
fn test_insert_then_delete_annihilates_in_buffer() {
    init_logging();
    for builder in [RRTreeBuilder::data_tree(), RRTreeBuilder::update_tree()] {
        let mut tree = builder.buffer_size(200).open_in_memory().unwrap();
        for id in 0..100 {
            tree.insert(grid_item(id)).unwrap();
        }
        for id in 0..100 {
            assert_eq!(tree.remove(grid_item(id)).unwrap(), Some(grid_item(id)));
        }
        assert_eq!(tree.current_buffer_size(), 0);
        assert_eq!(tree.annihilation_counts().insertion_then_deletion, 100);
        assert_eq!(tree.data_items(), 0);

        for rebuild in [false, true] {
            let state = tree.clean_garbage(rebuild).unwrap();
            assert_eq!(state, TreeClearIOState { reads: 0, writes: 0 });
        }
        assert_eq!(tree.io_counters().gets, 0);
        assert_eq!(tree.io_counters().writes(), 0);
        assert_eq!(tree.query_all().unwrap().count(), 0);
    }
}

#[test]
fn test_insert_then_query_returns_exactly_the_item() {
    init_logging();
    let mut tree = RRTreeBuilder::update_tree()
        .node_capacity(3, 8)
        .buffer_size(16)
        .open_in_memory()
        .unwrap();
    for id in 0..120 {
        let item = grid_item(id);
        tree.insert(item).unwrap();
        let hits: Vec<Item> = tree.query(&item.rect, 0).unwrap().collect();
        assert_eq!(hits, vec![item]);
    }
    let empty = Rect::new(-10.0, -10.0, -5.0, -5.0);
    assert_eq!(tree.query(&empty, 0).unwrap().count(), 0);
}

#[test]
fn test_delete_then_insert_restores_item() {
    init_logging();
    let mut tree = RRTreeBuilder::data_tree()
        .node_capacity(2, 4)
        .buffer_size(4)
        .open_in_memory()
        .unwrap();
    for id in 0..10 {
        tree.insert(grid_item(id)).unwrap();
    }
    tree.on_next_eb_force_full_emptying();
    tree.forced_empty_buffer().unwrap();
    assert_eq!(tree.current_buffer_size(), 0);
    let item = grid_item(3);
    assert_eq!(tree.remove(item).unwrap(), None);
    assert_eq!(tree.query(&item.rect, 0).unwrap().count(), 0);
    tree.insert(item).unwrap();
    assert_eq!(tree.annihilation_counts().deletion_then_insertion, 1);
    assert_eq!(tree.query(&item.rect, 0).unwrap().collect::<Vec<_>>(), vec![item]);
}

#[test]
fn test_removing_absent_items_keeps_data_tree_consistent() {
    init_logging();
    let mut tree = RRTreeBuilder::data_tree()
        .node_capacity(2, 4)
        .buffer_size(3)
        .open_in_memory()
        .unwrap();
    let mut expected = HashSet::new();
    for id in 0..20 {
        tree.insert(grid_item(id)).unwrap();
        expected.insert(grid_item(id));
    }
    // never inserted
    for id in 100..106 {
        assert_eq!(tree.remove(grid_item(id)).unwrap(), None);
    }
    for id in 20..30 {
        tree.insert(grid_item(id)).unwrap();
        expected.insert(grid_item(id));
    }
    assert!(tree.stats().deletions_not_found > 0);
    tree.on_next_eb_force_full_emptying();
    tree.forced_empty_buffer().unwrap();
    assert_eq!(tree.current_buffer_size(), 0);
    assert_eq!(tree.stats().deletions_not_found, 6);
    assert_eq!(tree.data_items(), 30);
    assert_eq!(tree.disk_data_items(), 30);
    assert!(tree.check_invariants().unwrap().is_empty());
    tree.verify_contents(&expected).unwrap();
}

#[test]
fn test_insert_after_removing_absent_item_is_kept() {
    init_logging();
    let mut tree = RRTreeBuilder::data_tree()
        .node_capacity(2, 4)
        .buffer_size(8)
        .open_in_memory()
        .unwrap();
    for id in 0..6 {
        tree.insert(grid_item(id)).unwrap();
    }
    tree.on_next_eb_force_full_emptying();
    tree.forced_empty_buffer().unwrap();

    let item = grid_item(40);
    assert_eq!(tree.remove(item).unwrap(), None);
    assert_eq!(tree.data_items(), 5);
    tree.insert(item).unwrap();
    assert_eq!(tree.annihilation_counts().deletion_then_insertion, 0);
    assert_eq!(tree.stats().deletions_not_found, 1);
    assert_eq!(tree.data_items(), 7);
    assert_eq!(tree.query(&item.rect, 0).unwrap().collect::<Vec<_>>(), vec![item]);

    tree.on_next_eb_force_full_emptying();
    tree.forced_empty_buffer().unwrap();
    assert_eq!(tree.disk_data_items(), 7);
    assert_eq!(tree.query(&item.rect, 0).unwrap().collect::<Vec<_>>(), vec![item]);
}

#[test]
fn test_zero_size_buffer_applies_updates_immediately() {
    init_logging();
    for builder in [RRTreeBuilder::data_tree(), RRTreeBuilder::update_tree()] {
        let mut tree = builder
            .node_capacity(2, 4)
            .buffer_size(0)
            .open_in_memory()
            .unwrap();
        let mut expected = HashSet::new();
        for id in 0..30 {
            tree.insert(grid_item(id)).unwrap();
            expected.insert(grid_item(id));
            assert!(tree.was_buffer_emptied());
            assert_eq!(tree.current_buffer_size(), 0);
        }
        for id in (0..30).step_by(3) {
            assert_eq!(tree.remove(grid_item(id)).unwrap(), None);
            expected.remove(&grid_item(id));
            assert_eq!(tree.current_buffer_size(), 0);
        }
        assert_eq!(tree.data_items(), 20);
        assert!(tree.height() > 1);
        assert!(tree.check_invariants().unwrap().is_empty());
        tree.verify_contents(&expected).unwrap();
        for id in 0..30 {
            let item = grid_item(id);
            let hits: Vec<Item> = tree.query(&item.rect, 0).unwrap().collect();
            assert_eq!(hits.contains(&item), expected.contains(&item));
        }
    }
}
