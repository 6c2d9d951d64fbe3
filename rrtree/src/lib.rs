//! # rrtree - Buffered R-tree
//!
//! An R-tree variant (the R^R-tree) that defers updates into an in-memory
//! buffer and applies them to the disk-resident tree in batches. It targets
//! workloads with high update rates over spatial data, where maintaining the
//! tree once per operation costs too much I/O.
//!
//! ## How updates flow
//!
//! 1. `insert` and `remove` land in the buffer; an operation whose opposite is
//!    already buffered cancels it (annihilation)
//! 2. a full buffer is emptied: buffered operations are grouped by the child
//!    of the root they are headed for
//! 3. a push-down strategy chooses which groups go down now
//! 4. a GroupUpdate pushes each chosen group through the tree recursively,
//!    splitting and merging nodes on the way back up
//!
//! Queries combine the disk tree with the buffer and may fold qualifying
//! buffered operations into the leaves they visit (piggybacking).
//!
//! ## Tree flavors
//!
//! - [`TreeFlavor::Data`] leaves hold items; a deletion removes the item
//! - [`TreeFlavor::Update`] leaves hold insertion and deletion entries that
//!   cancel when they meet. Garbage collection ([`RRTree::clean_garbage`])
//!   reclaims the space of pairs that never met.
//!
//! ## Quick Start
//!
//! ```rust
//! use rrtree::{Item, Rect, RRTreeBuilder};
//!
//! # fn main() -> rrtree::RRTreeResult<()> {
//! let mut tree = RRTreeBuilder::data_tree()
//!     .node_capacity(2, 4)
//!     .buffer_size(8)
//!     .open_in_memory()?;
//!
//! for id in 0..100u64 {
//!     let x = id as f64;
//!     tree.insert(Item::new(id, Rect::point(x, x)))?;
//! }
//! tree.remove(Item::new(7, Rect::point(7.0, 7.0)))?;
//!
//! let hits: Vec<Item> = tree.query(&Rect::new(0.0, 0.0, 9.5, 9.5), 0)?.collect();
//! assert_eq!(hits.len(), 9);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`buffer`] - the update buffer and its annihilation counters
//! - [`config`] - configuration and the tree builder
//! - [`container`] - block containers holding node records
//! - [`disk_tree`] - the disk-resident tree, its nodes and splitter
//! - [`engine`] - the [`RRTree`] engine, GroupUpdate and queries
//! - [`gc`] - vacuum and rebuild garbage collection
//! - [`group_maker`] - grouping buffered operations by target subtree
//! - [`push_down`] - push-down strategies
//! - [`piggyback`] - leaf piggybacking
//! - [`stats`] - engine statistics
//! - [`tracer`] - object tracers for following one item

pub mod buffer;
pub mod config;
pub mod constants;
pub mod container;
pub mod disk_tree;
pub mod engine;
pub mod entry_collection;
pub mod errors;
pub mod gc;
pub mod geometry;
pub mod group_maker;
pub mod group_map;
pub mod operation;
pub mod piggyback;
pub mod push_down;
pub mod stats;
pub mod tracer;

pub use buffer::{AnnihilationCounts, RRTreeBuffer};
pub use config::{RRTreeBuilder, RRTreeConfig};
pub use container::{Container, FileContainer, IoCounters, MemoryContainer, NodeId};
pub use disk_tree::{NodeCapacity, TreeClearIOState, TreeFlavor};
pub use engine::{QueryCursor, RRTree};
pub use errors::{RRTreeError, RRTreeResult};
pub use geometry::Rect;
pub use group_maker::GroupMakerKind;
pub use operation::{Entry, Item, ItemId, OperationType};
pub use push_down::{LargestGroupPolicy, PushDownStrategy, TieBreak};
pub use stats::{GcStats, RRTreeStats};
pub use tracer::{IdObjectTracer, NullObjectTracer, ObjectTracer, TraceClass, TraceOperation};
