//! Debugging hook that follows a single item through the engine.

use std::fmt;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::{Entry, Item, ItemId};

/// Component a traced event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceClass {
    RrTree,
    Piggybacking,
    EntryCollection,
    QueryProcessing,
    Gc,
}

/// Points in the engine where traced items are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceOperation {
    InsertToBuffer,
    RemoveFromBuffer,
    PutOpBackToBuffer,
    GroupUpdateStart,
    GroupUpdateBeforeIndexPiggybacking,
    GroupUpdateAfterIndexPiggybacking,
    UpdateLeafNode,
    CompleteOperation,
    DropNotFoundDeletion,
    IndexNodePiggybacking,
    LeafNodePiggybacking,
    EntryCollectionAdd,
    EntryCollectionAddAnnihilate,
    DataTreeQueryDiskResult,
    DataTreeQueryBufferResult,
    DataTreeQueryFinalResult,
    UpdateTreeQueryDiskResult,
    UpdateTreeQueryBufferResult,
    VacuumAnnihilation,
    VacuumCompaction,
    RebuildRunWrite,
    RebuildMergeRead,
    RebuildMergeAnnihilation,
}

impl TraceOperation {
    pub fn class(self) -> TraceClass {
        use TraceOperation::*;
        match self {
            InsertToBuffer
            | RemoveFromBuffer
            | PutOpBackToBuffer
            | GroupUpdateStart
            | GroupUpdateBeforeIndexPiggybacking
            | GroupUpdateAfterIndexPiggybacking
            | UpdateLeafNode
            | CompleteOperation
            | DropNotFoundDeletion => TraceClass::RrTree,
            IndexNodePiggybacking | LeafNodePiggybacking => TraceClass::Piggybacking,
            EntryCollectionAdd | EntryCollectionAddAnnihilate => TraceClass::EntryCollection,
            DataTreeQueryDiskResult
            | DataTreeQueryBufferResult
            | DataTreeQueryFinalResult
            | UpdateTreeQueryDiskResult
            | UpdateTreeQueryBufferResult => TraceClass::QueryProcessing,
            VacuumAnnihilation
            | VacuumCompaction
            | RebuildRunWrite
            | RebuildMergeRead
            | RebuildMergeAnnihilation => TraceClass::Gc,
        }
    }
}

impl fmt::Display for TraceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.class(), self)
    }
}

/// A recorded trace event
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub operation: TraceOperation,
    pub item: Item,
    /// Operation type when the event concerns a buffered entry
    pub entry: Option<Entry>,
}

/// Receives engine events about items
pub trait ObjectTracer {
    /// Starts following `id`. Only one item can be followed.
    fn register_object(&mut self, id: ItemId) -> RRTreeResult<()>;

    fn trace_object(&mut self, item: &Item, op: TraceOperation);

    fn trace_update_tree_entry(&mut self, entry: &Entry, op: TraceOperation);
}

/// Tracer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObjectTracer;

impl ObjectTracer for NullObjectTracer {
    fn register_object(&mut self, _id: ItemId) -> RRTreeResult<()> {
        Ok(())
    }

    fn trace_object(&mut self, _item: &Item, _op: TraceOperation) {}

    fn trace_update_tree_entry(&mut self, _entry: &Entry, _op: TraceOperation) {}
}

/// Tracer following one item id.
///
/// Events are logged at trace level and kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct IdObjectTracer {
    traced: Option<ItemId>,
    events: Vec<TraceEvent>,
}

impl IdObjectTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traced_id(&self) -> Option<ItemId> {
        self.traced
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Stops following the current item and forgets its events
    pub fn reset(&mut self) {
        self.traced = None;
        self.events.clear();
    }

    fn record(&mut self, item: &Item, entry: Option<Entry>, op: TraceOperation) {
        if self.traced != Some(item.id) {
            return;
        }
        match entry {
            Some(e) => trace!("{}: {:?} of item {} at {}", op, e.op, item.id, item.rect),
            None => trace!("{}: item {} at {}", op, item.id, item.rect),
        }
        self.events.push(TraceEvent {
            operation: op,
            item: *item,
            entry,
        });
    }
}

impl ObjectTracer for IdObjectTracer {
    fn register_object(&mut self, id: ItemId) -> RRTreeResult<()> {
        if let Some(current) = self.traced {
            return Err(RRTreeError::Tracer(format!(
                "already tracing item {}, cannot trace {}",
                current, id
            )));
        }
        self.traced = Some(id);
        Ok(())
    }

    fn trace_object(&mut self, item: &Item, op: TraceOperation) {
        self.record(item, None, op);
    }

    fn trace_update_tree_entry(&mut self, entry: &Entry, op: TraceOperation) {
        self.record(&entry.item, Some(*entry), op);
    }
}

/// Shared tracer, so the caller keeps a handle to inspect it
impl<T: ObjectTracer> ObjectTracer for Arc<Mutex<T>> {
    fn register_object(&mut self, id: ItemId) -> RRTreeResult<()> {
        self.lock().register_object(id)
    }

    fn trace_object(&mut self, item: &Item, op: TraceOperation) {
        self.lock().trace_object(item, op)
    }

    fn trace_update_tree_entry(&mut self, entry: &Entry, op: TraceOperation) {
        self.lock().trace_update_tree_entry(entry, op)
    }
}
