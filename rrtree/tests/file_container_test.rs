mod common;

use std::collections::HashSet;

use common::{grid_item, init_logging};
use rrtree::{Container, FileContainer, Item, RRTreeBuilder, RRTreeError, Rect};

#[test]
fn test_tree_over_file_container() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let container = FileContainer::create(dir.path().join("tree.rrt")).unwrap();
    assert_eq!(container.header().unwrap().page_size, 16384);

    let mut tree = RRTreeBuilder::update_tree()
        .node_capacity(4, 16)
        .buffer_size(32)
        .open(Box::new(container))
        .unwrap();

    let mut expected = HashSet::new();
    for id in 0..400 {
        tree.insert(grid_item(id)).unwrap();
        expected.insert(grid_item(id));
    }
    for id in (0..400).step_by(5) {
        tree.remove(grid_item(id)).unwrap();
        expected.remove(&grid_item(id));
    }
    tree.verify_contents(&expected).unwrap();

    tree.clean_garbage(false).unwrap();
    tree.verify_contents(&expected).unwrap();
    tree.clean_garbage(true).unwrap();
    tree.verify_contents(&expected).unwrap();
    assert!(tree.check_invariants().unwrap().is_empty());
    assert!(tree.io_counters().gets > 0);

    let window = Rect::new(0.0, 0.0, 10.0, 10.0);
    let hits: HashSet<Item> = tree.query(&window, 0).unwrap().collect();
    let wanted: HashSet<Item> = expected
        .iter()
        .filter(|i| i.rect.overlaps(&window))
        .copied()
        .collect();
    assert_eq!(hits, wanted);
}

#[test]
fn test_open_rejects_used_container() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut container = FileContainer::create(dir.path().join("used.rrt")).unwrap();
    container
        .insert(&rrtree::disk_tree::Node::empty_leaf())
        .unwrap();
    let err = RRTreeBuilder::data_tree()
        .open(Box::new(container))
        .err()
        .unwrap();
    assert!(matches!(err, RRTreeError::Configuration(_)));
}
