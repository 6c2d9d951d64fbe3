mod common;

use std::collections::HashSet;

use common::{init_logging, random_item};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rrtree::{Item, RRTree, RRTreeBuilder, Rect, TreeFlavor};

const CAPACITIES: [(usize, usize); 3] = [(1, 3), (2, 4), (3, 7)];

const STRATEGIES: [(&str, Option<f64>); 5] = [
    ("everything", None),
    ("largest", None),
    ("threshold", Some(3.0)),
    ("divide-by-fanout", Some(1.0)),
    ("largest-split-deletes-ins", None),
];

/// Ids above this are never inserted
const ABSENT_IDS: u64 = 1 << 40;

/// Ground truth of a random workload
struct Workload {
    rng: StdRng,
    live: Vec<Item>,
    dead: Vec<Item>,
    next_id: u64,
    next_absent_id: u64,
    remove_absent: bool,
}

impl Workload {
    fn new(seed: u64, remove_absent: bool) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            live: Vec::new(),
            dead: Vec::new(),
            next_id: 0,
            next_absent_id: ABSENT_IDS,
            remove_absent,
        }
    }

    fn step(&mut self, tree: &mut RRTree) {
        let roll: f64 = self.rng.gen();
        if self.live.is_empty() || roll < 0.35 {
            let item = random_item(&mut self.rng, self.next_id);
            self.next_id += 1;
            tree.insert(item).unwrap();
            self.live.push(item);
        } else if roll < 0.55 && !self.dead.is_empty() {
            let i = self.rng.gen_range(0..self.dead.len());
            let item = self.dead.swap_remove(i);
            tree.insert(item).unwrap();
            self.live.push(item);
        } else if roll < 0.65 && self.remove_absent {
            let item = if self.dead.is_empty() || self.rng.gen_bool(0.5) {
                let item = random_item(&mut self.rng, self.next_absent_id);
                self.next_absent_id += 1;
                item
            } else {
                let i = self.rng.gen_range(0..self.dead.len());
                self.dead[i]
            };
            assert_eq!(tree.remove(item).unwrap(), None);
        } else {
            let i = self.rng.gen_range(0..self.live.len());
            let item = self.live.swap_remove(i);
            tree.remove(item).unwrap();
            self.dead.push(item);
        }
    }

    fn expected(&self) -> HashSet<Item> {
        self.live.iter().copied().collect()
    }

    fn check(&mut self, tree: &mut RRTree, label: &str) {
        assert!(tree.check_invariants().unwrap().is_empty(), "{}", label);
        tree.verify_contents(&self.expected())
            .unwrap_or_else(|e| panic!("{}: {}", label, e));

        let x: f64 = self.rng.gen_range(0.0..900.0);
        let y: f64 = self.rng.gen_range(0.0..900.0);
        let window = Rect::new(x, y, x + 100.0, y + 100.0);
        let hits: HashSet<Item> = tree.query(&window, 0).unwrap().collect();
        let expected: HashSet<Item> = self
            .live
            .iter()
            .filter(|item| item.rect.overlaps(&window))
            .copied()
            .collect();
        assert_eq!(hits, expected, "{}: window {}", label, window);
    }
}

fn open(flavor: TreeFlavor, capacity: (usize, usize), strategy: (&str, Option<f64>)) -> RRTree {
    let builder = match flavor {
        TreeFlavor::Data => RRTreeBuilder::data_tree(),
        TreeFlavor::Update => RRTreeBuilder::update_tree(),
    };
    builder
        .node_capacity(capacity.0, capacity.1)
        .buffer_size(7)
        .gc_initial_scratch_mem_size(16)
        .push_down_strategy_by_name(strategy.0, strategy.1)
        .open_in_memory()
        .unwrap()
}

fn run_workload(flavor: TreeFlavor, seed: u64) {
    let remove_absent = flavor == TreeFlavor::Data;
    for capacity in CAPACITIES {
        for (n, strategy) in STRATEGIES.into_iter().enumerate() {
            let mut tree = open(flavor, capacity, strategy);
            let mut workload = Workload::new(seed + n as u64, remove_absent);
            for round in 0..6 {
                for _ in 0..150 {
                    workload.step(&mut tree);
                }
                let label = format!("{:?} {:?} {} round {}", flavor, capacity, strategy.0, round);
                workload.check(&mut tree, &label);

                tree.clean_garbage(round % 2 == 1).unwrap();
                workload.check(&mut tree, &format!("{} after gc", label));
            }

            tree.on_next_eb_force_full_emptying();
            tree.forced_empty_buffer().unwrap();
            assert_eq!(tree.current_buffer_size(), 0);
            assert_eq!(tree.data_items(), workload.live.len() as u64);
            workload.check(&mut tree, "final");
        }
    }
}

#[test]
fn test_data_tree_workload_with_reinsertions_and_absent_removals() {
    init_logging();
    run_workload(TreeFlavor::Data, 100);
}

#[test]
fn test_update_tree_workload_with_reinsertions_and_gc() {
    init_logging();
    run_workload(TreeFlavor::Update, 200);
}

#[test]
fn test_update_tree_workload_routing_deletions_as_insertions() {
    init_logging();
    for capacity in CAPACITIES {
        let mut tree = RRTreeBuilder::update_tree()
            .node_capacity(capacity.0, capacity.1)
            .buffer_size(7)
            .group_maker_by_name("delsasins")
            .open_in_memory()
            .unwrap();
        let mut workload = Workload::new(300 + capacity.1 as u64, false);
        for round in 0..6 {
            for _ in 0..150 {
                workload.step(&mut tree);
            }
            tree.clean_garbage(round % 2 == 0).unwrap();
            workload.check(&mut tree, &format!("{:?} round {}", capacity, round));
        }
    }
}
