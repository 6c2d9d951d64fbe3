//! Push-down strategies: which operation groups leave the buffer now.
//!
//! A strategy is asked once per index node visited by an emptying. It splits
//! the node's [`IndexEntryOpGroupMap`] into groups that descend further and
//! groups that return to the buffer. Strategies hold no state of their own;
//! their counters go to a [`PushDownStats`] accumulator.

use crate::disk_tree::NodeCapacity;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::group_map::{GroupKey, IndexEntryOpGroupMap};
use crate::operation::OperationGroup;

/// Selection rule among several equally largest groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Push every group of maximal size
    #[default]
    PushAll,
    /// Push the first group of maximal size in routing order
    PickFirst,
}

/// Root-level selection of the largest group(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargestGroupPolicy {
    pub by_insertions: bool,
    pub tie_break: TieBreak,
    /// Also push buffered groups sharing a deletion with a pushed group
    pub split_deletes: bool,
}

impl Default for LargestGroupPolicy {
    fn default() -> Self {
        Self {
            by_insertions: false,
            tie_break: TieBreak::PushAll,
            split_deletes: false,
        }
    }
}

/// Where in the tree a push-down decision is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushDownContext {
    /// Level of the node whose children the groups are routed to
    pub node_level: u32,
    /// Number of entries of that node
    pub node_size: usize,
    pub root_level: u32,
    /// The decision belongs to a restarted GroupUpdate
    pub restarted: bool,
    pub capacity: NodeCapacity,
}

impl PushDownContext {
    fn at_root(&self) -> bool {
        self.node_level == self.root_level
    }
}

/// Counters kept by the strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushDownStats {
    pub threshold_satisfied: u64,
    pub threshold_unsatisfied: u64,
    /// Groups pushed only because they tied with the largest one
    pub equal_largest_groups: u64,
}

/// Result of a push-down decision
#[derive(Debug, Clone, Default)]
pub struct PushDownAndBufferGroups {
    pub push: IndexEntryOpGroupMap,
    pub buffer: IndexEntryOpGroupMap,
}

/// The push-down strategy family
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushDownStrategy {
    /// Push every group
    Everything,
    /// Push groups of at least `threshold` operations, falling back to the
    /// largest group when none qualifies
    Threshold { threshold: usize, by_insertions: bool },
    /// [`PushDownStrategy::Threshold`] at the root, everything below
    RootLevelThreshold { threshold: usize, by_insertions: bool },
    /// The largest group(s) at the root, everything below
    Largest(LargestGroupPolicy),
    /// The largest group(s) at the root, a fixed threshold below
    ThresholdBelowRoot {
        root: LargestGroupPolicy,
        threshold: usize,
        by_insertions: bool,
    },
    /// The largest group(s) at the root; below, groups of at least the node's
    /// operations divided by the average fanout scaled by `coefficient`
    DivideByConstantBelowRoot {
        root: LargestGroupPolicy,
        coefficient: f64,
        by_insertions: bool,
    },
    /// The largest group(s) at the root; below, groups of at least the node's
    /// operations per child scaled by `coefficient`
    DivideByFanoutBelowRoot {
        root: LargestGroupPolicy,
        coefficient: f64,
        by_insertions: bool,
    },
}

impl Default for PushDownStrategy {
    fn default() -> Self {
        PushDownStrategy::Largest(LargestGroupPolicy::default())
    }
}

impl PushDownStrategy {
    /// Parses a strategy name with its parameter.
    ///
    /// Names ending in `-ins` measure groups by their insertions only.
    pub fn from_name(name: &str, param: Option<f64>) -> RRTreeResult<Self> {
        let lower = name.to_ascii_lowercase();
        let (base, by_insertions) = match lower.strip_suffix("-ins") {
            Some(base) => (base.to_string(), true),
            None => (lower.clone(), false),
        };
        let root = LargestGroupPolicy {
            by_insertions,
            ..LargestGroupPolicy::default()
        };
        let strategy = match base.as_str() {
            "everything" => PushDownStrategy::Everything,
            "largest" => PushDownStrategy::Largest(root),
            "largest-split-deletes" => PushDownStrategy::Largest(LargestGroupPolicy {
                split_deletes: true,
                ..root
            }),
            "largest-pick-first" => PushDownStrategy::Largest(LargestGroupPolicy {
                tie_break: TieBreak::PickFirst,
                ..root
            }),
            "threshold" => PushDownStrategy::Threshold {
                threshold: required_threshold(name, param)?,
                by_insertions,
            },
            "root-threshold" => PushDownStrategy::RootLevelThreshold {
                threshold: required_threshold(name, param)?,
                by_insertions,
            },
            "threshold-below-root" => PushDownStrategy::ThresholdBelowRoot {
                root,
                threshold: required_threshold(name, param)?,
                by_insertions,
            },
            "divide-by-constant" => PushDownStrategy::DivideByConstantBelowRoot {
                root,
                coefficient: required_coefficient(name, param)?,
                by_insertions,
            },
            "divide-by-fanout" => PushDownStrategy::DivideByFanoutBelowRoot {
                root,
                coefficient: required_coefficient(name, param)?,
                by_insertions,
            },
            _ => {
                return Err(RRTreeError::Configuration(format!(
                    "unknown push-down strategy '{}'",
                    name
                )))
            }
        };
        Ok(strategy)
    }

    /// Checks the strategy parameters.
    pub fn validate(&self) -> RRTreeResult<()> {
        match self {
            PushDownStrategy::DivideByConstantBelowRoot { coefficient, .. }
            | PushDownStrategy::DivideByFanoutBelowRoot { coefficient, .. } => {
                check_coefficient("push-down coefficient", *coefficient).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// Whether the strategy usually pushes most of the buffer.
    ///
    /// If so, the emptying clears the buffer and re-adds the groups that stay;
    /// otherwise it removes only the pushed groups.
    pub fn will_empty_big_part_of_buffer(&self) -> bool {
        matches!(
            self,
            PushDownStrategy::Everything | PushDownStrategy::Threshold { .. }
        )
    }

    pub fn choose(
        &self,
        groups: IndexEntryOpGroupMap,
        ctx: &PushDownContext,
        stats: &mut PushDownStats,
    ) -> PushDownAndBufferGroups {
        match *self {
            PushDownStrategy::Everything => push_all(groups),
            PushDownStrategy::Threshold {
                threshold,
                by_insertions,
            } => select_above_threshold(groups, threshold, by_insertions, true, stats),
            PushDownStrategy::RootLevelThreshold {
                threshold,
                by_insertions,
            } => {
                if ctx.at_root() {
                    select_above_threshold(groups, threshold, by_insertions, true, stats)
                } else {
                    push_all(groups)
                }
            }
            PushDownStrategy::Largest(policy) => choose_largest(groups, policy, ctx, stats),
            PushDownStrategy::ThresholdBelowRoot {
                root,
                threshold,
                by_insertions,
            } => {
                if ctx.at_root() {
                    choose_largest(groups, root, ctx, stats)
                } else {
                    select_above_threshold(groups, threshold, by_insertions, true, stats)
                }
            }
            PushDownStrategy::DivideByConstantBelowRoot {
                root,
                coefficient,
                by_insertions,
            } => {
                if ctx.at_root() {
                    return choose_largest(groups, root, ctx, stats);
                }
                let average_fanout = (ctx.capacity.min + ctx.capacity.max) / 2;
                let divisor = ((average_fanout as f64 * coefficient).trunc() as usize).max(1);
                let threshold = total_significant(&groups, by_insertions) / divisor;
                select_above_threshold(groups, threshold, by_insertions, false, stats)
            }
            PushDownStrategy::DivideByFanoutBelowRoot {
                root,
                coefficient,
                by_insertions,
            } => {
                if ctx.at_root() {
                    return choose_largest(groups, root, ctx, stats);
                }
                let per_child = if ctx.node_size == 0 {
                    0.0
                } else {
                    total_significant(&groups, by_insertions) as f64 / ctx.node_size as f64
                };
                let threshold = (per_child * coefficient).trunc() as usize;
                select_above_threshold(groups, threshold, by_insertions, false, stats)
            }
        }
    }
}

fn required_threshold(name: &str, param: Option<f64>) -> RRTreeResult<usize> {
    match param {
        Some(t) if t.is_finite() && t >= 0.0 && t.fract() == 0.0 => Ok(t as usize),
        Some(t) => Err(RRTreeError::Configuration(format!(
            "push-down strategy '{}' needs a non-negative integer threshold, got {}",
            name, t
        ))),
        None => Err(RRTreeError::Configuration(format!(
            "push-down strategy '{}' needs a threshold",
            name
        ))),
    }
}

fn required_coefficient(name: &str, param: Option<f64>) -> RRTreeResult<f64> {
    match param {
        Some(c) => check_coefficient(name, c),
        None => Err(RRTreeError::Configuration(format!(
            "push-down strategy '{}' needs a coefficient",
            name
        ))),
    }
}

fn check_coefficient(name: &str, c: f64) -> RRTreeResult<f64> {
    if c.is_finite() && c > 0.0 {
        Ok(c)
    } else {
        Err(RRTreeError::Configuration(format!(
            "{} must be finite and positive, got {}",
            name, c
        )))
    }
}

fn significant(group: &OperationGroup, by_insertions: bool) -> usize {
    group.size_in_significant_ops(by_insertions)
}

fn total_significant(groups: &IndexEntryOpGroupMap, by_insertions: bool) -> usize {
    groups
        .iter()
        .map(|(_, g)| significant(g, by_insertions))
        .sum()
}

fn push_all(groups: IndexEntryOpGroupMap) -> PushDownAndBufferGroups {
    PushDownAndBufferGroups {
        push: groups,
        buffer: IndexEntryOpGroupMap::new(),
    }
}

/// Pushes groups of at least `threshold` significant operations.
///
/// With `fallback`, the largest group is pushed when no group qualifies.
fn select_above_threshold(
    groups: IndexEntryOpGroupMap,
    threshold: usize,
    by_insertions: bool,
    fallback: bool,
    stats: &mut PushDownStats,
) -> PushDownAndBufferGroups {
    let mut result = PushDownAndBufferGroups::default();
    let mut biggest: Option<(GroupKey, usize)> = None;
    for (key, group) in groups {
        let size = significant(&group, by_insertions);
        if biggest.map_or(size > 0, |(_, b)| size > b) {
            biggest = Some((key, size));
        }
        if size >= threshold {
            result.push.put(key, group);
        } else {
            result.buffer.put(key, group);
        }
    }
    if result.push.is_empty() && !result.buffer.is_empty() {
        stats.threshold_unsatisfied += 1;
        if fallback {
            // Deletion-only groups measured by insertions have no largest; take the first
            let key = match biggest {
                Some((key, _)) => Some(key),
                None => result.buffer.keys().next().copied(),
            };
            if let Some(key) = key {
                result.push.move_group_from(&mut result.buffer, key);
            }
        }
    } else {
        stats.threshold_satisfied += 1;
    }
    result
}

fn choose_largest(
    groups: IndexEntryOpGroupMap,
    policy: LargestGroupPolicy,
    ctx: &PushDownContext,
    stats: &mut PushDownStats,
) -> PushDownAndBufferGroups {
    if ctx.restarted || !ctx.at_root() {
        return push_all(groups);
    }
    let largest = groups
        .iter()
        .map(|(_, g)| significant(g, policy.by_insertions))
        .max();
    let Some(largest) = largest else {
        return push_all(groups);
    };

    let mut result = PushDownAndBufferGroups::default();
    for (key, group) in groups {
        let is_largest = significant(&group, policy.by_insertions) == largest;
        let take = is_largest && (policy.tie_break == TieBreak::PushAll || result.push.is_empty());
        if take {
            result.push.put(key, group);
        } else {
            result.buffer.put(key, group);
        }
    }
    stats.equal_largest_groups += result.push.len().saturating_sub(1) as u64;

    if policy.split_deletes {
        pull_groups_sharing_deletions(&mut result);
    }
    result
}

/// Moves buffered groups sharing a deletion with a pushed group to the push side.
fn pull_groups_sharing_deletions(result: &mut PushDownAndBufferGroups) {
    loop {
        let pushed = result.push.flatten();
        let shared = result.buffer.iter().find_map(|(key, group)| {
            group
                .iter()
                .any(|e| e.is_deletion() && pushed.contains(e))
                .then_some(*key)
        });
        match shared {
            Some(key) => result.push.move_group_from(&mut result.buffer, key),
            None => break,
        }
    }
}
