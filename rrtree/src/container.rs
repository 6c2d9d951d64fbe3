//! Block containers holding disk node records.
//!
//! The tree only needs four operations on its backing store (`get`, `insert`,
//! `update`, `remove` by node identifier) plus I/O counters for accounting.
//! Two containers are provided:
//! - [`MemoryContainer`] keeps bincode-encoded records in a map
//! - [`FileContainer`] stores one record per fixed-size page of a file, guarded
//!   by a CRC32 checksum, and reuses freed pages

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::{MAGIC, PAGE_SIZE, VERSION};
use crate::disk_tree::Node;
use crate::errors::{RRTreeError, RRTreeResult};

/// Node ID - unique identifier for a node record in a container
pub type NodeId = u64;

/// Snapshot of container I/O counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub gets: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
}

impl IoCounters {
    /// Counter increase since `earlier`
    pub fn since(&self, earlier: &IoCounters) -> IoCounters {
        IoCounters {
            gets: self.gets - earlier.gets,
            inserts: self.inserts - earlier.inserts,
            updates: self.updates - earlier.updates,
            removes: self.removes - earlier.removes,
        }
    }

    pub fn writes(&self) -> u64 {
        self.inserts + self.updates + self.removes
    }
}

/// Backing store of node records
pub trait Container {
    fn get(&self, id: NodeId) -> RRTreeResult<Node>;

    fn insert(&mut self, node: &Node) -> RRTreeResult<NodeId>;

    fn update(&mut self, id: NodeId, node: &Node) -> RRTreeResult<()>;

    fn remove(&mut self, id: NodeId) -> RRTreeResult<()>;

    fn counters(&self) -> IoCounters;

    /// Number of live records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Internal I/O counter tracking
#[derive(Debug, Default)]
struct IoStatistics {
    gets: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
}

impl IoStatistics {
    fn snapshot(&self) -> IoCounters {
        IoCounters {
            gets: self.gets.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }
}

fn encode_node(node: &Node) -> RRTreeResult<Vec<u8>> {
    bincode::serde::encode_to_vec(node, bincode::config::legacy())
        .map_err(|e| RRTreeError::Serialization(e.to_string()))
}

fn decode_node(bytes: &[u8]) -> RRTreeResult<Node> {
    bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(node, _)| node)
        .map_err(|e| RRTreeError::Serialization(e.to_string()))
}

fn unknown_node(id: NodeId) -> RRTreeError {
    RRTreeError::invariant(format!("node {} is not stored in the container", id))
}

// ============================================================================
// Memory Container
// ============================================================================

/// Container keeping encoded node records in memory
#[derive(Debug)]
pub struct MemoryContainer {
    records: HashMap<NodeId, Vec<u8>>,
    next_id: NodeId,
    stats: IoStatistics,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_id: 1,
            stats: IoStatistics::default(),
        }
    }
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Container for MemoryContainer {
    fn get(&self, id: NodeId) -> RRTreeResult<Node> {
        let bytes = self.records.get(&id).ok_or_else(|| unknown_node(id))?;
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        decode_node(bytes)
    }

    fn insert(&mut self, node: &Node) -> RRTreeResult<NodeId> {
        let bytes = encode_node(node)?;
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, bytes);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn update(&mut self, id: NodeId, node: &Node) -> RRTreeResult<()> {
        let bytes = encode_node(node)?;
        let slot = self.records.get_mut(&id).ok_or_else(|| unknown_node(id))?;
        *slot = bytes;
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> RRTreeResult<()> {
        self.records.remove(&id).ok_or_else(|| unknown_node(id))?;
        self.stats.removes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn counters(&self) -> IoCounters {
        self.stats.snapshot()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// File Container
// ============================================================================

/// A page wrapped with CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageWithChecksum {
    checksum: u32,
    node: Node,
}

impl PageWithChecksum {
    fn new(node: Node) -> RRTreeResult<Self> {
        let checksum = Self::calculate_checksum(&node)?;
        Ok(Self { checksum, node })
    }

    fn calculate_checksum(node: &Node) -> RRTreeResult<u32> {
        Ok(Self::crc32(&encode_node(node)?))
    }

    /// CRC32-MPEG2
    fn crc32(data: &[u8]) -> u32 {
        let mut crc: u32 = 0xFFFFFFFF;
        const POLY: u32 = 0x04C11DB7;

        for &byte in data {
            crc ^= (byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x80000000 != 0 {
                    (crc << 1) ^ POLY
                } else {
                    crc << 1
                };
            }
        }

        crc ^ 0xFFFFFFFF
    }

    fn into_node(self) -> RRTreeResult<Node> {
        let expected = Self::calculate_checksum(&self.node)?;
        if self.checksum != expected {
            return Err(RRTreeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Page checksum mismatch - possible corruption (expected: {:x}, got: {:x})",
                    expected, self.checksum
                ),
            )));
        }
        Ok(self.node)
    }
}

/// Header stored in page 0 of a container file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
}

impl FileHeader {
    fn new(page_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            page_size: page_size as u32,
        }
    }

    pub fn validate(&self) -> RRTreeResult<()> {
        if self.magic != MAGIC {
            return Err(RRTreeError::Serialization(
                "Invalid container file (bad magic)".into(),
            ));
        }
        if self.version != VERSION {
            return Err(RRTreeError::Serialization(format!(
                "Unsupported container file version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Container storing one node per fixed-size page of a file.
///
/// Page 0 holds the [`FileHeader`]; node `id` lives in page `id`. Each `get` is
/// exactly one seek and one read. Freed pages are reused by later inserts.
pub struct FileContainer {
    file: RwLock<File>,
    path: PathBuf,
    page_size: usize,
    next_page: NodeId,
    live: HashSet<NodeId>,
    free_pages: Vec<NodeId>,
    stats: IoStatistics,
}

impl FileContainer {
    /// Create a new container file, truncating any existing content
    pub fn create(path: impl AsRef<Path>) -> RRTreeResult<Self> {
        Self::create_with_page_size(path, PAGE_SIZE)
    }

    pub fn create_with_page_size(path: impl AsRef<Path>, page_size: usize) -> RRTreeResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let container = Self {
            file: RwLock::new(file),
            path: path.as_ref().to_path_buf(),
            page_size,
            next_page: 1,
            live: HashSet::new(),
            free_pages: Vec::new(),
            stats: IoStatistics::default(),
        };
        let header = bincode::serde::encode_to_vec(FileHeader::new(page_size), bincode::config::legacy())
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
        container.write_raw(0, header)?;
        Ok(container)
    }

    /// Reads and validates the header page
    pub fn header(&self) -> RRTreeResult<FileHeader> {
        let mut buffer = vec![0u8; self.page_size];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buffer)?;
        }
        let header: FileHeader = bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(header, _)| header)
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
        header.validate()?;
        Ok(header)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync(&self) -> RRTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn offset(&self, id: NodeId) -> u64 {
        id * self.page_size as u64
    }

    fn read_page(&self, id: NodeId) -> RRTreeResult<Node> {
        let mut buffer = vec![0u8; self.page_size];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(self.offset(id)))?;
            file.read_exact(&mut buffer)?;
        }

        let page: PageWithChecksum =
            bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
                .map(|(page, _)| page)
                .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
        page.into_node()
    }

    fn write_page(&self, id: NodeId, node: &Node) -> RRTreeResult<()> {
        let page = PageWithChecksum::new(node.clone())?;
        let bytes = bincode::serde::encode_to_vec(&page, bincode::config::legacy())
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;

        if bytes.len() > self.page_size {
            return Err(RRTreeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Node too large: {} bytes (max {})",
                    bytes.len(),
                    self.page_size
                ),
            )));
        }

        self.write_raw(self.offset(id), bytes)
    }

    fn write_raw(&self, offset: u64, mut bytes: Vec<u8>) -> RRTreeResult<()> {
        bytes.resize(self.page_size, 0);
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

impl Container for FileContainer {
    fn get(&self, id: NodeId) -> RRTreeResult<Node> {
        if !self.live.contains(&id) {
            return Err(unknown_node(id));
        }
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        self.read_page(id)
    }

    fn insert(&mut self, node: &Node) -> RRTreeResult<NodeId> {
        let id = match self.free_pages.pop() {
            Some(id) => id,
            None => {
                let id = self.next_page;
                self.next_page += 1;
                id
            }
        };
        if let Err(e) = self.write_page(id, node) {
            self.free_pages.push(id);
            return Err(e);
        }
        self.live.insert(id);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn update(&mut self, id: NodeId, node: &Node) -> RRTreeResult<()> {
        if !self.live.contains(&id) {
            return Err(unknown_node(id));
        }
        self.write_page(id, node)?;
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> RRTreeResult<()> {
        if !self.live.remove(&id) {
            return Err(unknown_node(id));
        }
        self.free_pages.push(id);
        self.stats.removes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn counters(&self) -> IoCounters {
        self.stats.snapshot()
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}
