//! Constants for the buffered R-tree.

/// Default minimum number of entries in a non-root node
pub const DEFAULT_MIN_NODE_CAPACITY: usize = 25;

/// Default maximum number of entries in a node
pub const DEFAULT_MAX_NODE_CAPACITY: usize = 64;

/// Default number of pending operations held by the buffer
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Default number of index nodes cached by the vacuum collector
pub const DEFAULT_GC_INDEX_CACHE_SIZE: usize = 64;

/// Default garbage collector scratch memory, in entries
pub const DEFAULT_GC_SCRATCH_MEM_SIZE: usize = 4096;

/// Hilbert curve order used to sort rectangle centers during GC
pub const HILBERT_ORDER: u32 = 16;

/// Target leaf fill factor of a rebuilt tree
pub const REBUILD_FILL_FACTOR: f64 = 0.8;

/// Block size used to account the I/O of rebuild runs
pub const IO_BLOCK_SIZE: usize = 4096;

/// Page size of the file container (16KB)
pub const PAGE_SIZE: usize = 16384;

/// Magic number for file container identification
pub const MAGIC: u32 = 0x5252_5452; // "RRTR"

/// File container format version
pub const VERSION: u32 = 1;
