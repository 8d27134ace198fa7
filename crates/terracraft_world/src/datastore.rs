//! # Edit Persistence
//!
//! Player edits are kept as per-chunk, ordered edit logs. A chunk's content
//! is always `generate(seed, coord)` with its log replayed on top, so only
//! the log needs to survive.
//!
//! ## Guarantees
//!
//! 1. **Last write wins**: a later edit at a position replaces the earlier
//!    entry, so replaying the log reproduces the final state
//! 2. **Atomic snapshot**: `flush` encodes each log under the lock and never
//!    sees a half-recorded edit
//! 3. **Bounded loss**: on a crash, only edits recorded since the last
//!    successful flush of that chunk are lost
//!
//! Each chunk record is written to a temp file and renamed into place, so a
//! crash mid-write leaves the previous record intact.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use terracraft_procedural::{Block, BlockEntity, ChunkCoord, LocalPos, WorldError, WorldResult, MAX_WORLD_HEIGHT};
use tracing::{debug, error, info, warn};

use crate::record;

/// One recorded block change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edit {
    /// Position inside the chunk.
    pub pos: LocalPos,
    /// Block and state written.
    pub block: Block,
    /// Block entity written with the block.
    pub entity: Option<BlockEntity>,
}

impl Edit {
    /// Plain block edit without an entity.
    #[must_use]
    pub const fn new(pos: LocalPos, block: Block) -> Self {
        Self { pos, block, entity: None }
    }
}

/// Backing storage for encoded chunk records.
pub trait ChunkStore: Send + Sync {
    /// Reads the record of a chunk. `Ok(None)` if the chunk has none.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` if the storage cannot be read.
    fn read(&self, seed: u64, coord: ChunkCoord) -> WorldResult<Option<Vec<u8>>>;

    /// Replaces the record of a chunk.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` if the record could not be stored.
    fn write(&self, seed: u64, coord: ChunkCoord, data: &[u8]) -> WorldResult<()>;

    /// Chunks with a stored record.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` if the storage cannot be listed.
    fn list(&self, seed: u64) -> WorldResult<Vec<ChunkCoord>>;
}

fn io_failure(action: &str, path: &Path, err: &std::io::Error) -> WorldError {
    WorldError::PersistenceFailure { reason: format!("{action} {}: {err}", path.display()) }
}

/// Records as files: `<root>/<seed as 16 hex digits>/c.<cx>.<cz>.tce`.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`. Directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn seed_dir(&self, seed: u64) -> PathBuf {
        self.root.join(format!("{seed:016x}"))
    }

    /// Path of a chunk's record.
    #[must_use]
    pub fn record_path(&self, seed: u64, coord: ChunkCoord) -> PathBuf {
        self.seed_dir(seed).join(format!("c.{}.{}.tce", coord.x, coord.z))
    }

    fn parse_name(name: &str) -> Option<ChunkCoord> {
        let rest = name.strip_prefix("c.")?.strip_suffix(".tce")?;
        let (x, z) = rest.split_once('.')?;
        Some(ChunkCoord::new(x.parse().ok()?, z.parse().ok()?))
    }
}

impl ChunkStore for FileStore {
    fn read(&self, seed: u64, coord: ChunkCoord) -> WorldResult<Option<Vec<u8>>> {
        let path = self.record_path(seed, coord);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_failure("cannot read", &path, &e)),
        }
    }

    fn write(&self, seed: u64, coord: ChunkCoord, data: &[u8]) -> WorldResult<()> {
        let dir = self.seed_dir(seed);
        fs::create_dir_all(&dir).map_err(|e| io_failure("cannot create", &dir, &e))?;

        let path = self.record_path(seed, coord);
        let tmp = path.with_extension("tce.tmp");
        fs::write(&tmp, data).map_err(|e| io_failure("cannot write", &tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| io_failure("cannot replace", &path, &e))
    }

    fn list(&self, seed: u64) -> WorldResult<Vec<ChunkCoord>> {
        let dir = self.seed_dir(seed);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_failure("cannot list", &dir, &e)),
        };

        let mut coords: Vec<ChunkCoord> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str().and_then(Self::parse_name))
            .collect();
        coords.sort_unstable();
        Ok(coords)
    }
}

/// In-memory store. Clones share the same records, which lets a test
/// reopen a "fresh" data store on the same backing.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<(u64, ChunkCoord), Vec<u8>>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkStore for MemoryStore {
    fn read(&self, seed: u64, coord: ChunkCoord) -> WorldResult<Option<Vec<u8>>> {
        Ok(self.records.lock().get(&(seed, coord)).cloned())
    }

    fn write(&self, seed: u64, coord: ChunkCoord, data: &[u8]) -> WorldResult<()> {
        self.records.lock().insert((seed, coord), data.to_vec());
        Ok(())
    }

    fn list(&self, seed: u64) -> WorldResult<Vec<ChunkCoord>> {
        let mut coords: Vec<ChunkCoord> =
            self.records.lock().keys().filter(|(s, _)| *s == seed).map(|(_, c)| *c).collect();
        coords.sort_unstable();
        Ok(coords)
    }
}

/// Ordered edits of one chunk plus flush bookkeeping.
#[derive(Debug, Default)]
struct EditLog {
    edits: Vec<Edit>,
    /// Bumped on every recorded edit.
    revision: u64,
    /// Revision last written to the backing store.
    flushed: u64,
}

impl EditLog {
    fn from_persisted(edits: Vec<Edit>) -> Self {
        Self { edits, revision: 0, flushed: 0 }
    }

    const fn is_dirty(&self) -> bool {
        self.revision != self.flushed
    }

    fn record(&mut self, edit: Edit) {
        self.edits.retain(|e| e.pos != edit.pos);
        self.edits.push(edit);
        self.revision += 1;
    }
}

/// Persistent per-chunk edit logs for one world seed.
pub struct DataStore {
    seed: u64,
    /// Edits at or above this y are rejected.
    world_height: usize,
    store: Box<dyn ChunkStore>,
    /// Logs of chunks touched this session (loaded lazily).
    logs: Mutex<HashMap<ChunkCoord, EditLog>>,
    /// Held from snapshot to rename so records land in revision order.
    writes: Mutex<()>,
}

impl DataStore {
    /// Data store over any backing.
    #[must_use]
    pub fn new(seed: u64, store: Box<dyn ChunkStore>) -> Self {
        Self {
            seed,
            world_height: MAX_WORLD_HEIGHT,
            store,
            logs: Mutex::new(HashMap::new()),
            writes: Mutex::new(()),
        }
    }

    /// Restricts recorded edits to `height` blocks.
    #[must_use]
    pub fn with_world_height(mut self, height: usize) -> Self {
        self.world_height = height;
        self
    }

    /// Data store over a [`FileStore`] at `root`.
    #[must_use]
    pub fn open(seed: u64, root: &Path) -> Self {
        Self::new(seed, Box::new(FileStore::new(root)))
    }

    /// Data store that never touches the disk.
    #[must_use]
    pub fn in_memory(seed: u64) -> Self {
        Self::new(seed, Box::new(MemoryStore::new()))
    }

    /// World seed the records belong to.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Reads and decodes a chunk's persisted edits.
    fn load(&self, coord: ChunkCoord) -> WorldResult<Vec<Edit>> {
        match self.store.read(self.seed, coord)? {
            None => Ok(Vec::new()),
            Some(data) => record::decode(self.seed, coord, &data)
                .map_err(|reason| WorldError::CorruptChunk { coord, reason }),
        }
    }

    /// Appends an edit, replacing any earlier edit at the same position.
    ///
    /// The chunk's persisted edits are loaded first so a flush never
    /// overwrites them.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` above the world height, `InvalidBlockEntity` for an
    /// entity that could not be read back, `PersistenceFailure` if the
    /// persisted edits cannot be read, or `CorruptChunk` if they do not
    /// decode. The edit is not recorded.
    pub fn record_edit(&self, coord: ChunkCoord, edit: Edit) -> WorldResult<()> {
        if usize::from(edit.pos.y()) >= self.world_height {
            return Err(WorldError::OutOfBounds {
                x: i32::from(edit.pos.x()),
                y: i32::from(edit.pos.y()),
                z: i32::from(edit.pos.z()),
            });
        }
        if let Some(entity) = &edit.entity {
            entity.validate()?;
        }

        let mut logs = self.logs.lock();
        if !logs.contains_key(&coord) {
            let persisted = self.load(coord)?;
            logs.insert(coord, EditLog::from_persisted(persisted));
        }
        if let Some(log) = logs.get_mut(&coord) {
            log.record(edit);
        }
        Ok(())
    }

    /// Ordered edits of a chunk, empty if it has none.
    ///
    /// A storage read failure is logged and treated as "no edits" (the
    /// chunk is still playable; the result is not cached so a later call
    /// retries the read).
    ///
    /// # Errors
    ///
    /// `CorruptChunk` if the stored record fails verification.
    pub fn get_edits(&self, coord: ChunkCoord) -> WorldResult<Vec<Edit>> {
        let mut logs = self.logs.lock();
        if let Some(log) = logs.get(&coord) {
            return Ok(log.edits.clone());
        }

        match self.load(coord) {
            Ok(edits) => {
                logs.insert(coord, EditLog::from_persisted(edits.clone()));
                Ok(edits)
            }
            Err(WorldError::PersistenceFailure { reason }) => {
                warn!(chunk = %coord, %reason, "Cannot read persisted edits, treating chunk as unedited");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Cached edits of a chunk, without touching storage.
    #[must_use]
    pub fn snapshot(&self, coord: ChunkCoord) -> Option<Vec<Edit>> {
        self.logs.lock().get(&coord).map(|log| log.edits.clone())
    }

    /// Chunks with edits not yet written to storage, sorted.
    #[must_use]
    pub fn pending_chunks(&self) -> Vec<ChunkCoord> {
        let mut pending: Vec<ChunkCoord> =
            self.logs.lock().iter().filter(|(_, log)| log.is_dirty()).map(|(c, _)| *c).collect();
        pending.sort_unstable();
        pending
    }

    /// True if the chunk has unwritten edits.
    #[must_use]
    pub fn has_pending(&self, coord: ChunkCoord) -> bool {
        self.logs.lock().get(&coord).is_some_and(EditLog::is_dirty)
    }

    /// Every chunk with edits, persisted or pending, sorted.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` if the storage cannot be listed.
    pub fn coords(&self) -> WorldResult<Vec<ChunkCoord>> {
        let mut all: HashSet<ChunkCoord> = self.store.list(self.seed)?.into_iter().collect();
        all.extend(self.logs.lock().iter().filter(|(_, log)| !log.edits.is_empty()).map(|(c, _)| *c));
        let mut coords: Vec<ChunkCoord> = all.into_iter().collect();
        coords.sort_unstable();
        Ok(coords)
    }

    /// Writes one chunk's log if it has unwritten edits.
    ///
    /// Returns `true` if a record was written.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` if the write fails; the edits stay pending.
    pub fn flush_chunk(&self, coord: ChunkCoord) -> WorldResult<bool> {
        let _writing = self.writes.lock();
        let snapshot = {
            let logs = self.logs.lock();
            match logs.get(&coord) {
                Some(log) if log.is_dirty() => (log.revision, record::encode(self.seed, coord, &log.edits)),
                _ => return Ok(false),
            }
        };
        self.write_snapshot(coord, snapshot)?;
        Ok(true)
    }

    /// Writes every pending log.
    ///
    /// Every chunk is attempted even if one fails. Returns the number of
    /// records written.
    ///
    /// # Errors
    ///
    /// The first `PersistenceFailure`; failed chunks stay pending.
    pub fn flush(&self) -> WorldResult<usize> {
        let _writing = self.writes.lock();
        let snapshots: Vec<(ChunkCoord, (u64, Vec<u8>))> = {
            let logs = self.logs.lock();
            logs.iter()
                .filter(|(_, log)| log.is_dirty())
                .map(|(coord, log)| (*coord, (log.revision, record::encode(self.seed, *coord, &log.edits))))
                .collect()
        };

        let mut written = 0;
        let mut first_error = None;
        for (coord, snapshot) in snapshots {
            match self.write_snapshot(coord, snapshot) {
                Ok(()) => written += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if written > 0 {
            info!(chunks = written, "Flushed chunk edits");
        }
        first_error.map_or(Ok(written), Err)
    }

    fn write_snapshot(&self, coord: ChunkCoord, (revision, data): (u64, Vec<u8>)) -> WorldResult<()> {
        if let Err(e) = self.store.write(self.seed, coord, &data) {
            error!(chunk = %coord, error = %e, "Failed to persist chunk edits");
            return Err(e);
        }
        debug!(chunk = %coord, bytes = data.len(), "Persisted chunk edits");

        if let Some(log) = self.logs.lock().get_mut(&coord) {
            // Edits recorded during the write keep the log dirty
            log.flushed = log.flushed.max(revision);
        }
        Ok(())
    }

    /// Drops a clean log from memory. Dirty logs are kept.
    pub fn release(&self, coord: ChunkCoord) {
        let mut logs = self.logs.lock();
        if logs.get(&coord).is_some_and(|log| !log.is_dirty()) {
            logs.remove(&coord);
        }
    }
}
