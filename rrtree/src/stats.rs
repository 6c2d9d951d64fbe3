//! Statistics collected by the engine.
//!
//! Nothing in here influences correctness: the engine records counters and
//! histograms into an [`RRTreeStats`] accumulator that callers read through
//! [`crate::RRTree::stats`].

use std::collections::{BTreeMap, HashMap};

use crate::operation::{Entry, OperationType};

// ============================================================================
// Histograms
// ============================================================================

/// A sparse histogram from an integer key to an integer weight
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticalData {
    data: BTreeMap<i64, i64>,
}

impl StatisticalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, key: i64, delta: i64) {
        *self.data.entry(key).or_insert(0) += delta;
    }

    /// Weight stored for `key`, 0 if absent
    pub fn get(&self, key: i64) -> i64 {
        self.data.get(&key).copied().unwrap_or(0)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.data.iter().map(|(k, v)| (*k, *v))
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> i64 {
        self.data.values().sum()
    }

    /// Weighted mean of the keys, 0 for an empty histogram
    pub fn mean(&self) -> f64 {
        let weight = self.total_weight();
        if weight == 0 {
            return 0.0;
        }
        let sum: i64 = self.data.iter().map(|(k, v)| k * v).sum();
        sum as f64 / weight as f64
    }

    /// Merges another histogram into this one
    pub fn merge(&mut self, other: &StatisticalData) {
        for (k, v) in other.iter() {
            self.update(k, v);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Bumps `key` in the histogram at `index`, creating missing histograms.
fn inc_histogram_in_list(list: &mut Vec<StatisticalData>, index: usize, key: i64) {
    if list.len() < index + 1 {
        list.resize_with(index + 1, StatisticalData::new);
    }
    list[index].update(key, 1);
}

/// Running count and total of a per-GC figure
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateStats {
    pub count: u64,
    pub total: f64,
}

impl AggregateStats {
    pub fn register(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Counter of operations split per operation type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTypeStat {
    pub insertions: u64,
    pub deletions: u64,
}

impl OperationTypeStat {
    pub fn register(&mut self, entry: &Entry) {
        match entry.op {
            OperationType::Insertion => self.insertions += 1,
            OperationType::Deletion => self.deletions += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.insertions + self.deletions
    }
}

// ============================================================================
// Operation lifetimes
// ============================================================================

/// Levels an operation was returned to the buffer from, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifetimeStatEntry {
    pub returned_at_levels: Vec<u32>,
}

impl LifetimeStatEntry {
    pub fn return_to_buffer(&mut self, level: u32) {
        self.returned_at_levels.push(level);
    }
}

/// Aggregate of all operations that survived the same number of emptyings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TotalsForEB {
    pub operations: u64,
    /// Operations returned to the buffer at least once
    pub returned_operations: u64,
    /// Histogram of the levels operations were returned from
    pub return_levels: StatisticalData,
}

/// Operation lifetimes keyed by the number of emptyings survived.
///
/// Key 0 holds operations completed before any emptying happened (this
/// includes annihilated pairs); key -1 holds operations still buffered when
/// [`RRTreeStats::register_buffer_lifetimes`] ran during their first cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpLifetimeStats {
    totals: BTreeMap<i64, TotalsForEB>,
}

impl OpLifetimeStats {
    pub fn update_lifetime(&mut self, ebs_survived: i64, entry: Option<&LifetimeStatEntry>) {
        let totals = self.totals.entry(ebs_survived).or_default();
        totals.operations += 1;
        if let Some(entry) = entry {
            if !entry.returned_at_levels.is_empty() {
                totals.returned_operations += 1;
            }
            for level in &entry.returned_at_levels {
                totals.return_levels.update(*level as i64, 1);
            }
        }
    }

    pub fn get(&self, ebs_survived: i64) -> Option<&TotalsForEB> {
        self.totals.get(&ebs_survived)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &TotalsForEB)> {
        self.totals.iter()
    }
}

#[derive(Debug, Clone)]
struct RunningLifetime {
    eb_num: u64,
    entry: LifetimeStatEntry,
}

// ============================================================================
// Garbage collection
// ============================================================================

/// Per-GC figures averaged over all collections
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub partial_unload_created_nodes: AggregateStats,
    pub partial_unload_ratio: AggregateStats,
    pub part_of_tree_cleaned_with_unload: AggregateStats,
    pub unloaded_entries: AggregateStats,
    pub partial_cleaning_iterations: AggregateStats,
    pub index_nodes_before: AggregateStats,
    pub leaf_nodes_before: AggregateStats,
    pub index_nodes_after: AggregateStats,
    pub leaf_nodes_after: AggregateStats,
    pub run_write_ios: AggregateStats,
    pub run_read_ios: AggregateStats,
    /// Most leaves held in scratch memory at once by a vacuum pass
    pub peak_nodes_loaded_at_once: usize,
}

// ============================================================================
// Engine statistics
// ============================================================================

/// Counters and histograms of buffer emptying, GroupUpdate and piggybacking
#[derive(Debug, Clone, Default)]
pub struct RRTreeStats {
    /// Updates between consecutive emptyings
    pub emptying_frequency: StatisticalData,
    pub completed_emptyings: u64,
    pub failed_emptyings: u64,
    /// Data tree deletions dropped because no leaf held their item
    pub deletions_not_found: u64,
    updates_since_last_emptying: i64,

    /// Per-level histograms of GroupUpdate group sizes
    pub group_sizes: Vec<StatisticalData>,
    pub insertion_only_group_sizes: Vec<StatisticalData>,
    pub back_to_buffer_group_sizes: Vec<StatisticalData>,

    pub group_update_invocations: u64,
    pub group_update_restarts: u64,
    pub leaf_node_updates: u64,
    pub non_leaf_node_updates: u64,
    pub single_entry_nodes: u64,
    pub trivial_child_integrations: u64,
    pub integrate_child_invocations: u64,
    pub empty_children: u64,
    pub children_replacing_parent: u64,
    pub insert_subtree_invocations: u64,
    pub insert_subtree_recursions: u64,
    pub merge_subtree_invocations: u64,
    pub merge_subtree_recursions: u64,

    pub query_piggybackings: OperationTypeStat,
    pub leaf_update_piggybackings: OperationTypeStat,
    pub nonleaf_update_piggybackings: OperationTypeStat,
    pub non_piggybacked_size_increasing_ops: u64,
    pub non_piggybacked_size_decreasing_ops: u64,

    pub op_lifetimes: OpLifetimeStats,
    running_lifetimes: HashMap<Entry, RunningLifetime>,

    pub gc: GcStats,
}

impl RRTreeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_update(&mut self) {
        self.updates_since_last_emptying += 1;
    }

    pub fn register_empty_buffer(&mut self) {
        self.emptying_frequency
            .update(self.updates_since_last_emptying, 1);
        self.updates_since_last_emptying = 0;
    }

    pub fn register_end_of_empty_buffer(&mut self) {
        self.completed_emptyings += 1;
    }

    pub fn register_failed_emptying(&mut self) {
        self.failed_emptyings += 1;
    }

    pub fn register_back_to_buffer_group(&mut self, level: u32, group_size: usize) {
        inc_histogram_in_list(
            &mut self.back_to_buffer_group_sizes,
            level as usize,
            group_size as i64,
        );
    }

    pub fn register_back_to_buffer_operation(&mut self, level: u32, op: &Entry) {
        if let Some(running) = self.running_lifetimes.get_mut(op) {
            running.entry.return_to_buffer(level);
        }
    }

    pub fn update_group_update_statistics(
        &mut self,
        level: u32,
        group_size: usize,
        insertion_only: bool,
    ) {
        inc_histogram_in_list(&mut self.group_sizes, level as usize, group_size as i64);
        if insertion_only {
            inc_histogram_in_list(
                &mut self.insertion_only_group_sizes,
                level as usize,
                group_size as i64,
            );
        }
    }

    /// Group size histogram summed over all levels
    pub fn global_group_sizes(&self) -> StatisticalData {
        let mut result = StatisticalData::new();
        for level in &self.group_sizes {
            result.merge(level);
        }
        result
    }

    /// Records an update entering the buffer.
    ///
    /// When the buffer shrank by one the update annihilated its opposite: both
    /// lifetimes end now. Otherwise a lifetime is opened for the new entry.
    pub fn register_op_lifetime(&mut self, entry: Entry, old_size: usize, new_size: usize) {
        if old_size == new_size + 1 {
            self.op_lifetimes.update_lifetime(0, None);
            self.complete_update_lifetime(&entry.opposite());
        } else {
            self.running_lifetimes.insert(
                entry,
                RunningLifetime {
                    eb_num: self.completed_emptyings,
                    entry: LifetimeStatEntry::default(),
                },
            );
        }
    }

    pub fn complete_update_lifetime(&mut self, entry: &Entry) {
        if let Some(running) = self.running_lifetimes.remove(entry) {
            let ebs = self.completed_emptyings.saturating_sub(running.eb_num) as i64;
            self.op_lifetimes.update_lifetime(ebs, Some(&running.entry));
        }
    }

    pub fn has_update_lifetime(&self, entry: &Entry) -> bool {
        self.running_lifetimes.contains_key(entry)
    }

    /// Closes the lifetimes of every operation still buffered.
    pub fn register_buffer_lifetimes(&mut self) {
        for running in self.running_lifetimes.values() {
            let mut ebs = self.completed_emptyings.saturating_sub(running.eb_num) as i64;
            // Arrived after the last emptying and never had a chance
            if ebs == 0 {
                ebs = -1;
            }
            self.op_lifetimes.update_lifetime(ebs, Some(&running.entry));
        }
    }
}
