//! Fixed-precision node coordinate store feeding way/relation geometry
//! resolution (C4/C5): a sorted-sparse on-disk array for extracts, a
//! direct-indexed memory-mapped array for planet-scale inputs, or a plain
//! in-memory map — selected by `ConvertOptions::node_cache_mode` and picked
//! up by every pipeline stage that needs to turn a node id into a
//! coordinate.

use memmap2::{Mmap, MmapMut};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{CoreError, Result};

const STAGE: &str = "node_store";

fn runtime<E: std::fmt::Display>(msg: impl Into<String>) -> impl FnOnce(E) -> CoreError {
    let msg = msg.into();
    move |e| CoreError::runtime(STAGE, anyhow::anyhow!("{msg}: {e}"))
}

// 8 bytes per node: 4 bytes lon (i32), 4 bytes lat (i32)
// Stored as fixed precision integers (deg * 10^7)
const NODE_SIZE: usize = 8;
// 16 bytes per entry: 8 bytes node id (u64), 8 bytes packed coords (i64)
const SPARSE_ENTRY_SIZE: usize = 16;
const SCALE_FACTOR: f64 = 10_000_000.0;

pub struct NodeStoreWriter {
    inner: NodeStoreWriterImpl,
}

pub struct NodeStoreReader {
    inner: NodeStoreReaderImpl,
}

enum NodeStoreWriterImpl {
    Sparse(SparseNodeStoreWriter),
    Dense(DenseNodeStoreWriter),
    Memory(MemoryNodeStore),
}

enum NodeStoreReaderImpl {
    Sparse(SparseNodeStoreReader),
    Dense(DenseNodeStoreReader),
    Memory(MemoryNodeStore),
}

struct SparseNodeStoreWriter {
    writer: BufWriter<NamedTempFile>,
    count: u64,
    last_id: Option<u64>,
    is_sorted: bool,
}

struct SparseNodeStoreReader {
    mmap: Mmap,
    count: u64,
    /// If Some, file is automatically deleted when this struct is dropped
    _temp_file: Option<NamedTempFile>,
}

struct DenseNodeStoreWriter {
    mmap: MmapMut,
    max_nodes: u64,
    /// If Some, file is automatically deleted when this struct is dropped
    _temp_file: Option<NamedTempFile>,
}

struct DenseNodeStoreReader {
    mmap: Mmap,
    max_nodes: u64,
    /// If Some, file is automatically deleted when this struct is dropped
    _temp_file: Option<NamedTempFile>,
}

#[derive(Clone)]
struct MemoryNodeStore {
    nodes: HashMap<u64, (i32, i32)>,
}

impl NodeStoreWriter {
    /// Create a sparse node store (sorted array, efficient for extracts).
    pub fn new_sparse() -> Result<Self> {
        let temp_file =
            NamedTempFile::new().map_err(runtime("failed to create temporary sparse cache file"))?;
        Ok(Self {
            inner: NodeStoreWriterImpl::Sparse(SparseNodeStoreWriter {
                writer: BufWriter::new(temp_file),
                count: 0,
                last_id: None,
                is_sorted: true,
            }),
        })
    }

    /// Create a dense node store backed by a memory-mapped file at the given path.
    /// The file is NOT automatically deleted - caller is responsible for cleanup.
    pub fn new_dense<P: AsRef<Path>>(path: P, max_nodes: u64) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(runtime("failed to open dense cache file"))?;

        let file_size = max_nodes
            .checked_mul(NODE_SIZE as u64)
            .ok_or_else(|| CoreError::runtime(STAGE, anyhow::anyhow!("dense cache size overflow")))?;
        file.set_len(file_size)
            .map_err(runtime("failed to set dense cache file length"))?;

        // SAFETY: the file handle is exclusively owned by this struct and no
        // other process touches it while the writer mmap is live.
        let mmap =
            unsafe { MmapMut::map_mut(&file).map_err(runtime("failed to map dense cache file"))? };

        Ok(Self {
            inner: NodeStoreWriterImpl::Dense(DenseNodeStoreWriter {
                mmap,
                max_nodes,
                _temp_file: None,
            }),
        })
    }

    /// Create a dense node store backed by a temporary memory-mapped file.
    /// The file is automatically deleted when this store (and its reader) are dropped.
    pub fn new_dense_temp(max_nodes: u64) -> Result<Self> {
        let temp_file =
            NamedTempFile::new().map_err(runtime("failed to create temporary dense cache file"))?;

        let file_size = max_nodes.checked_mul(NODE_SIZE as u64).ok_or_else(|| {
            CoreError::runtime(STAGE, anyhow::anyhow!("temporary dense cache size overflow"))
        })?;
        temp_file
            .as_file()
            .set_len(file_size)
            .map_err(runtime("failed to set temporary dense cache file length"))?;

        // SAFETY: same as `new_dense` — exclusive ownership, single-threaded
        // during the write phase.
        let mmap = unsafe {
            MmapMut::map_mut(temp_file.as_file())
                .map_err(runtime("failed to map temporary dense cache file"))?
        };

        Ok(Self {
            inner: NodeStoreWriterImpl::Dense(DenseNodeStoreWriter {
                mmap,
                max_nodes,
                _temp_file: Some(temp_file),
            }),
        })
    }

    pub fn new_memory() -> Self {
        Self {
            inner: NodeStoreWriterImpl::Memory(MemoryNodeStore {
                nodes: HashMap::new(),
            }),
        }
    }

    pub fn put(&mut self, id: u64, lat: f64, lon: f64) -> Result<()> {
        match &mut self.inner {
            NodeStoreWriterImpl::Sparse(store) => store.put(id, lat, lon),
            NodeStoreWriterImpl::Dense(store) => store.put(id, lat, lon),
            NodeStoreWriterImpl::Memory(store) => store.put(id, lat, lon),
        }
    }

    pub fn finalize(self) -> Result<NodeStoreReader> {
        match self.inner {
            NodeStoreWriterImpl::Sparse(store) => store.finalize(),
            NodeStoreWriterImpl::Dense(store) => store.finalize(),
            NodeStoreWriterImpl::Memory(store) => Ok(NodeStoreReader {
                inner: NodeStoreReaderImpl::Memory(store),
            }),
        }
    }
}

impl NodeStoreReader {
    pub fn get(&self, id: u64) -> Option<(f64, f64)> {
        match &self.inner {
            NodeStoreReaderImpl::Sparse(store) => store.get(id),
            NodeStoreReaderImpl::Dense(store) => store.get(id),
            NodeStoreReaderImpl::Memory(store) => store.get(id),
        }
    }
}

/// Pack lat/lon into a single i64 for sparse storage
fn pack_coords(lat: f64, lon: f64) -> i64 {
    let lat_fixed = (lat * SCALE_FACTOR) as i32;
    let lon_fixed = (lon * SCALE_FACTOR) as i32;
    ((lon_fixed as i64) << 32) | ((lat_fixed as i64) & 0xFFFFFFFF)
}

/// Unpack i64 back to (lon, lat)
fn unpack_coords(packed: i64) -> (f64, f64) {
    let lon_fixed = (packed >> 32) as i32;
    let lat_fixed = packed as i32;
    (
        lon_fixed as f64 / SCALE_FACTOR,
        lat_fixed as f64 / SCALE_FACTOR,
    )
}

fn write_sparse_entry<W: Write>(writer: &mut W, id: u64, packed: i64) -> Result<()> {
    writer.write_all(&id.to_le_bytes())?;
    writer.write_all(&packed.to_le_bytes())?;
    Ok(())
}

impl SparseNodeStoreWriter {
    fn put(&mut self, id: u64, lat: f64, lon: f64) -> Result<()> {
        let packed = pack_coords(lat, lon);
        if let Some(last_id) = self.last_id
            && id < last_id
        {
            self.is_sorted = false;
            return Err(CoreError::InvalidInput(
                "node IDs are out of order for sparse cache; sort by type then id first".to_string(),
            ));
        }
        self.last_id = Some(id);
        self.count = self.count.saturating_add(1);
        write_sparse_entry(&mut self.writer, id, packed)
    }

    fn finalize(mut self) -> Result<NodeStoreReader> {
        self.writer
            .flush()
            .map_err(runtime("failed to flush sparse cache file"))?;
        let temp_file = self
            .writer
            .into_inner()
            .map_err(runtime("failed to finalize sparse cache file"))?;

        if !self.is_sorted {
            return Err(CoreError::InvalidInput(
                "node IDs are out of order for sparse cache; sort by type then id first".to_string(),
            ));
        }

        let file_len = temp_file
            .as_file()
            .metadata()
            .map_err(runtime("failed to stat sparse cache file"))?
            .len();
        if file_len % SPARSE_ENTRY_SIZE as u64 != 0 {
            return Err(CoreError::runtime(
                STAGE,
                anyhow::anyhow!("sparse cache file size is not aligned to entry size"),
            ));
        }
        let file_count = file_len / SPARSE_ENTRY_SIZE as u64;
        if file_count != self.count {
            return Err(CoreError::runtime(
                STAGE,
                anyhow::anyhow!(
                    "sparse cache count mismatch: expected {}, file has {}",
                    self.count,
                    file_count
                ),
            ));
        }

        Ok(NodeStoreReader {
            inner: NodeStoreReaderImpl::Sparse(SparseNodeStoreReader {
                // SAFETY: exclusive ownership of the temp file; no concurrent writer.
                mmap: unsafe {
                    Mmap::map(temp_file.as_file()).map_err(runtime("failed to map sparse cache file"))?
                },
                count: self.count,
                _temp_file: Some(temp_file),
            }),
        })
    }
}

impl SparseNodeStoreReader {
    fn get(&self, id: u64) -> Option<(f64, f64)> {
        let mut low = 0u64;
        let mut high = self.count;

        while low < high {
            let mid = low + (high - low) / 2;
            let offset = (mid as usize) * SPARSE_ENTRY_SIZE;
            let data = &self.mmap[offset..offset + SPARSE_ENTRY_SIZE];
            let mid_id = u64::from_le_bytes(data[0..8].try_into().unwrap());
            let packed = i64::from_le_bytes(data[8..16].try_into().unwrap());

            match mid_id.cmp(&id) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(unpack_coords(packed)),
            }
        }

        None
    }
}

impl DenseNodeStoreWriter {
    fn put(&mut self, id: u64, lat: f64, lon: f64) -> Result<()> {
        if id >= self.max_nodes {
            return Err(CoreError::InvalidInput(format!(
                "node ID {id} exceeds node_cache_max_nodes ({}); raise it or use node_cache_mode=memory",
                self.max_nodes
            )));
        }

        let offset = (id as usize) * NODE_SIZE;

        let lat_fixed = (lat * SCALE_FACTOR) as i32;
        let lon_fixed = (lon * SCALE_FACTOR) as i32;

        let data = &mut self.mmap[offset..offset + NODE_SIZE];
        data[0..4].copy_from_slice(&lon_fixed.to_le_bytes());
        data[4..8].copy_from_slice(&lat_fixed.to_le_bytes());
        Ok(())
    }

    fn finalize(self) -> Result<NodeStoreReader> {
        let mmap = self
            .mmap
            .make_read_only()
            .map_err(runtime("failed to set dense cache to read-only"))?;
        Ok(NodeStoreReader {
            inner: NodeStoreReaderImpl::Dense(DenseNodeStoreReader {
                mmap,
                max_nodes: self.max_nodes,
                _temp_file: self._temp_file,
            }),
        })
    }
}

impl DenseNodeStoreReader {
    fn get(&self, id: u64) -> Option<(f64, f64)> {
        if id >= self.max_nodes {
            return None;
        }

        let offset = (id as usize) * NODE_SIZE;
        let data = &self.mmap[offset..offset + NODE_SIZE];

        Some(decode_coords(data))
    }
}

impl MemoryNodeStore {
    fn put(&mut self, id: u64, lat: f64, lon: f64) -> Result<()> {
        let lat_fixed = (lat * SCALE_FACTOR) as i32;
        let lon_fixed = (lon * SCALE_FACTOR) as i32;
        self.nodes.insert(id, (lon_fixed, lat_fixed));
        Ok(())
    }

    fn get(&self, id: u64) -> Option<(f64, f64)> {
        let (lon_fixed, lat_fixed) = self.nodes.get(&id)?;
        Some((
            *lon_fixed as f64 / SCALE_FACTOR,
            *lat_fixed as f64 / SCALE_FACTOR,
        ))
    }
}

fn decode_coords(data: &[u8]) -> (f64, f64) {
    let lon_bytes: [u8; 4] = data[0..4].try_into().unwrap();
    let lat_bytes: [u8; 4] = data[4..8].try_into().unwrap();

    let lon_fixed = i32::from_le_bytes(lon_bytes);
    let lat_fixed = i32::from_le_bytes(lat_bytes);

    let lon = lon_fixed as f64 / SCALE_FACTOR;
    let lat = lat_fixed as f64 / SCALE_FACTOR;

    (lon, lat)
}
