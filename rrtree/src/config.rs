//! Tree configuration and the builder that opens a tree.

use std::num::NonZeroUsize;

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_GC_INDEX_CACHE_SIZE, DEFAULT_GC_SCRATCH_MEM_SIZE,
    DEFAULT_MAX_NODE_CAPACITY, DEFAULT_MIN_NODE_CAPACITY,
};
use crate::container::{Container, MemoryContainer};
use crate::disk_tree::{NodeCapacity, TreeFlavor};
use crate::engine::RRTree;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::group_maker::GroupMakerKind;
use crate::push_down::PushDownStrategy;
use crate::tracer::{NullObjectTracer, ObjectTracer};

/// Initialization parameters of an [`RRTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct RRTreeConfig {
    pub flavor: TreeFlavor,
    pub min_node_capacity: usize,
    pub max_node_capacity: usize,
    pub buffer_size: usize,
    pub group_maker: GroupMakerKind,
    pub push_down_strategy: PushDownStrategy,
    pub enable_update_index_node_piggybacking: bool,
    pub enable_update_leaf_node_piggybacking: bool,
    pub enable_query_piggybacking: bool,
    /// Relative expansion of node rectangles when piggybacking during updates
    pub piggybacking_epsilon: f64,
    pub gc_index_cache_size: NonZeroUsize,
    /// Garbage collector scratch memory, in entries
    pub gc_initial_scratch_mem_size: usize,
    /// Data tree only: each leaf insertion evicts the oldest entry of the leaf
    pub insertion_removes_old_insertion: bool,
}

impl RRTreeConfig {
    pub fn new(flavor: TreeFlavor) -> Self {
        Self {
            flavor,
            min_node_capacity: DEFAULT_MIN_NODE_CAPACITY,
            max_node_capacity: DEFAULT_MAX_NODE_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            group_maker: default_group_maker(flavor),
            push_down_strategy: PushDownStrategy::default(),
            enable_update_index_node_piggybacking: false,
            enable_update_leaf_node_piggybacking: false,
            enable_query_piggybacking: false,
            piggybacking_epsilon: 0.0,
            gc_index_cache_size: NonZeroUsize::new(DEFAULT_GC_INDEX_CACHE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            gc_initial_scratch_mem_size: DEFAULT_GC_SCRATCH_MEM_SIZE,
            insertion_removes_old_insertion: false,
        }
    }

    pub fn capacity(&self) -> NodeCapacity {
        NodeCapacity::new(self.min_node_capacity, self.max_node_capacity)
    }

    pub fn set_capacity(&mut self, min: usize, max: usize) -> RRTreeResult<()> {
        if min == 0 {
            return Err(config_error("minimum node capacity must be at least 1"));
        }
        if min > max {
            return Err(config_error(format!(
                "minimum node capacity {} exceeds maximum node capacity {}",
                min, max
            )));
        }
        if 2 * min > max {
            return Err(config_error(format!(
                "maximum node capacity {} must be at least twice the minimum {}",
                max, min
            )));
        }
        self.min_node_capacity = min;
        self.max_node_capacity = max;
        Ok(())
    }

    /// A buffer size of 0 applies every update to the disk tree right away.
    pub fn set_buffer_size(&mut self, size: usize) -> RRTreeResult<()> {
        self.buffer_size = size;
        Ok(())
    }

    pub fn set_piggybacking_epsilon(&mut self, epsilon: f64) -> RRTreeResult<()> {
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(config_error(format!(
                "piggybacking epsilon must be finite and non-negative, got {}",
                epsilon
            )));
        }
        self.piggybacking_epsilon = epsilon;
        Ok(())
    }

    pub fn set_gc_index_cache_size(&mut self, size: usize) -> RRTreeResult<()> {
        self.gc_index_cache_size = NonZeroUsize::new(size)
            .ok_or_else(|| config_error("GC index cache size must be at least 1"))?;
        Ok(())
    }

    pub fn set_gc_initial_scratch_mem_size(&mut self, size: usize) -> RRTreeResult<()> {
        if size == 0 {
            return Err(config_error("GC scratch memory size must be at least 1"));
        }
        self.gc_initial_scratch_mem_size = size;
        Ok(())
    }

    pub fn set_push_down_strategy(&mut self, strategy: PushDownStrategy) -> RRTreeResult<()> {
        strategy.validate()?;
        self.push_down_strategy = strategy;
        Ok(())
    }

    /// Checks the cross-parameter rules.
    pub fn validate(&self) -> RRTreeResult<()> {
        let mut check = self.clone();
        check.set_capacity(self.min_node_capacity, self.max_node_capacity)?;
        check.set_piggybacking_epsilon(self.piggybacking_epsilon)?;
        check.set_gc_initial_scratch_mem_size(self.gc_initial_scratch_mem_size)?;
        self.push_down_strategy.validate()?;
        match (self.flavor, self.group_maker) {
            (TreeFlavor::Data, GroupMakerKind::InsertionsOnly) => Err(config_error(
                "insertions-only grouping requires an update tree",
            )),
            (TreeFlavor::Update, GroupMakerKind::Trivial) => Err(config_error(
                "update trees store deletions in one leaf and cannot fan them out",
            )),
            (TreeFlavor::Data, GroupMakerKind::DeletionsAsInsertions)
                if !self.insertion_removes_old_insertion =>
            {
                Err(config_error(
                    "data trees must fan deletions out unless insertions evict old entries",
                ))
            }
            _ => Ok(()),
        }?;
        if self.insertion_removes_old_insertion && self.flavor != TreeFlavor::Data {
            return Err(config_error(
                "insertion_removes_old_insertion is only supported by data trees",
            ));
        }
        Ok(())
    }
}

impl Default for RRTreeConfig {
    fn default() -> Self {
        Self::new(TreeFlavor::Data)
    }
}

fn default_group_maker(flavor: TreeFlavor) -> GroupMakerKind {
    match flavor {
        TreeFlavor::Data => GroupMakerKind::Trivial,
        TreeFlavor::Update => GroupMakerKind::InsertionsOnly,
    }
}

fn config_error(msg: impl Into<String>) -> RRTreeError {
    RRTreeError::Configuration(msg.into())
}

/// Builder for opening an [`RRTree`].
///
/// Setters capture the first invalid value; it is returned when the tree is
/// opened.
///
/// # Examples
///
/// ```rust
/// use rrtree::{Item, Rect, RRTreeBuilder};
///
/// # fn main() -> rrtree::RRTreeResult<()> {
/// let mut tree = RRTreeBuilder::data_tree()
///     .node_capacity(2, 8)
///     .buffer_size(16)
///     .open_in_memory()?;
/// tree.insert(Item::new(1, Rect::point(0.5, 0.5)))?;
/// assert_eq!(tree.query(&Rect::new(0.0, 0.0, 1.0, 1.0), 0)?.count(), 1);
/// # Ok(())
/// # }
/// ```
pub struct RRTreeBuilder {
    error: Option<RRTreeError>,
    config: RRTreeConfig,
    tracer: Box<dyn ObjectTracer>,
}

impl RRTreeBuilder {
    pub fn new(flavor: TreeFlavor) -> Self {
        RRTreeBuilder {
            error: None,
            config: RRTreeConfig::new(flavor),
            tracer: Box::new(NullObjectTracer),
        }
    }

    pub fn data_tree() -> Self {
        Self::new(TreeFlavor::Data)
    }

    pub fn update_tree() -> Self {
        Self::new(TreeFlavor::Update)
    }

    fn apply<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut RRTreeConfig) -> RRTreeResult<()>,
    {
        if self.error.is_none() {
            if let Err(e) = f(&mut self.config) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn node_capacity(self, min: usize, max: usize) -> Self {
        self.apply(|c| c.set_capacity(min, max))
    }

    pub fn buffer_size(self, size: usize) -> Self {
        self.apply(|c| c.set_buffer_size(size))
    }

    pub fn group_maker(self, kind: GroupMakerKind) -> Self {
        self.apply(|c| {
            c.group_maker = kind;
            Ok(())
        })
    }

    /// Selects the grouping policy by name (`trivial`, `delsasins`, `insonly`).
    pub fn group_maker_by_name(self, name: &str) -> Self {
        self.apply(|c| {
            c.group_maker = GroupMakerKind::from_name(name)?;
            Ok(())
        })
    }

    pub fn push_down_strategy(self, strategy: PushDownStrategy) -> Self {
        self.apply(|c| c.set_push_down_strategy(strategy))
    }

    /// Selects the push-down strategy by name with its threshold or coefficient.
    pub fn push_down_strategy_by_name(self, name: &str, param: Option<f64>) -> Self {
        self.apply(|c| c.set_push_down_strategy(PushDownStrategy::from_name(name, param)?))
    }

    pub fn update_index_node_piggybacking(self, enabled: bool) -> Self {
        self.apply(|c| {
            c.enable_update_index_node_piggybacking = enabled;
            Ok(())
        })
    }

    pub fn update_leaf_node_piggybacking(self, enabled: bool) -> Self {
        self.apply(|c| {
            c.enable_update_leaf_node_piggybacking = enabled;
            Ok(())
        })
    }

    pub fn query_piggybacking(self, enabled: bool) -> Self {
        self.apply(|c| {
            c.enable_query_piggybacking = enabled;
            Ok(())
        })
    }

    /// Enables query, leaf-update and index-update piggybacking at once.
    pub fn piggybacking(self, enabled: bool) -> Self {
        self.query_piggybacking(enabled)
            .update_leaf_node_piggybacking(enabled)
            .update_index_node_piggybacking(enabled)
    }

    pub fn piggybacking_epsilon(self, epsilon: f64) -> Self {
        self.apply(|c| c.set_piggybacking_epsilon(epsilon))
    }

    pub fn gc_index_cache_size(self, size: usize) -> Self {
        self.apply(|c| c.set_gc_index_cache_size(size))
    }

    pub fn gc_initial_scratch_mem_size(self, size: usize) -> Self {
        self.apply(|c| c.set_gc_initial_scratch_mem_size(size))
    }

    pub fn insertion_removes_old_insertion(self, enabled: bool) -> Self {
        self.apply(|c| {
            c.insertion_removes_old_insertion = enabled;
            Ok(())
        })
    }

    pub fn object_tracer(mut self, tracer: Box<dyn ObjectTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn config(&self) -> &RRTreeConfig {
        &self.config
    }

    /// Opens a tree over `container`, which must not hold any node yet.
    pub fn open(self, container: Box<dyn Container>) -> RRTreeResult<RRTree> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.config.validate()?;
        if !container.is_empty() {
            return Err(config_error(format!(
                "container already holds {} nodes",
                container.len()
            )));
        }
        Ok(RRTree::new(self.config, container, self.tracer))
    }

    pub fn open_in_memory(self) -> RRTreeResult<RRTree> {
        self.open(Box::new(MemoryContainer::new()))
    }
}
