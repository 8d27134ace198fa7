//! # World
//!
//! The chunk lifecycle manager and the only mutator of chunk state.
//!
//! ## Chunk Lifecycle
//!
//! ```text
//! Unloaded ──request──▶ Generating ──commit──▶ Loaded ──edit──▶ Dirty
//!     ▲                     │                    │                │
//!     │                  failure              unload           flush
//!     │                     ▼                    ▼                │
//!     └──── backoff ─── (retry) / Failed    Unloading ◀───────────┘
//! ```
//!
//! A chunk's content is always `generate(seed, coord)` with the DataStore's
//! edits replayed on top. A chunk whose persisted edits cannot be trusted is
//! held as `Corrupt`: every query against it fails instead of returning
//! made-up blocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use terracraft_procedural::{
    Block, BlockEntity, BlockId, BlockRegistry, BlockState, Chunk, ChunkCoord, ChunkGenerator, LocalPos,
    WorldError, WorldResult,
};
use tracing::{debug, error, info, warn};

use crate::config::{WorldConfig, MAX_RADIUS};
use crate::datastore::{ChunkStore, DataStore, Edit, FileStore, MemoryStore};
use crate::generation::{ChunkSource, GenerationPool, GenerationResult};

/// Longest wait between generation retries, in update cycles.
const MAX_BACKOFF_CYCLES: u64 = 32;

/// Lifecycle state of a chunk coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Not resident and not being generated.
    Unloaded,
    /// Queued or running on the generation pool.
    Generating,
    /// Resident with no unpersisted edits.
    Loaded,
    /// Resident with edits not yet written to storage.
    Dirty,
    /// Out of range but kept resident until its edits are written.
    Unloading,
    /// Persisted edits failed verification. Queries fail.
    Corrupt,
    /// Generation retry budget exhausted.
    Failed,
}

/// A subchunk whose mesh must be rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirtySubchunk {
    /// Owning chunk.
    pub coord: ChunkCoord,
    /// Subchunk index (`y / 16`).
    pub index: usize,
}

/// Session counters and current residency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    /// Resident chunks.
    pub loaded_chunks: usize,
    /// Chunks queued or generating.
    pub generating_chunks: usize,
    /// Chunks held as corrupt.
    pub corrupt_chunks: usize,
    /// Chunks parked after exhausting retries.
    pub failed_chunks: usize,
    /// Chunks with edits not yet written.
    pub pending_edit_chunks: usize,
    /// Generator invocations this session.
    pub generations_run: u64,
    /// Chunks committed this session.
    pub chunks_loaded: u64,
    /// Chunks unloaded this session.
    pub chunks_unloaded: u64,
    /// Finished generations thrown away because nobody wanted them.
    pub chunks_discarded: u64,
    /// Edits recorded this session.
    pub edits_recorded: u64,
    /// Calls to `update`.
    pub update_cycles: u64,
}

/// Read-only block queries for physics and collision.
pub trait BlockQuery {
    /// Block at world coordinates.
    ///
    /// # Errors
    ///
    /// `OutOfBounds`, `ChunkNotLoaded` or `CorruptChunk`.
    fn block_at(&self, x: i32, y: i32, z: i32) -> WorldResult<BlockId>;

    /// True if the block at world coordinates collides.
    ///
    /// Unloaded, corrupt and out-of-range positions are not solid.
    fn is_solid(&self, x: i32, y: i32, z: i32) -> bool;
}

#[derive(Clone, Copy, Debug)]
struct RetryState {
    attempts: u32,
    next_cycle: u64,
    failed: bool,
}

/// Manages the lifecycle of chunks.
pub struct World {
    config: WorldConfig,
    blocks: Arc<BlockRegistry>,
    store: DataStore,
    pool: GenerationPool,
    chunks: HashMap<ChunkCoord, Chunk>,
    corrupt: HashMap<ChunkCoord, WorldError>,
    /// Resident chunks whose unload is waiting on a successful write.
    unloading: HashSet<ChunkCoord>,
    retries: HashMap<ChunkCoord, RetryState>,
    /// Player chunk at the last update.
    center: Option<ChunkCoord>,
    /// Chunks beyond this distance of `center` are not kept.
    keep_radius: u32,
    cycle: u64,
    updates_since_save: u32,
    stats: WorldStats,
    shut_down: bool,
}

impl World {
    /// Creates a world from configuration.
    ///
    /// Edits are stored under `save_path`, or in memory if it is unset.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an invalid configuration or registry file.
    pub fn new(config: WorldConfig) -> WorldResult<Self> {
        let store: Box<dyn ChunkStore> = match &config.save_path {
            Some(path) => Box::new(FileStore::new(path)),
            None => Box::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Creates a world over an explicit edit store.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an invalid configuration or registry file.
    pub fn with_store(config: WorldConfig, store: Box<dyn ChunkStore>) -> WorldResult<Self> {
        config.validate()?;
        let (blocks, biomes) = config.load_registries()?;
        let generator = ChunkGenerator::new(
            config.world_seed(),
            config.world_height,
            config.sea_level,
            Arc::clone(&blocks),
            biomes,
        )?;
        Self::build(config, store, Arc::new(generator), blocks)
    }

    /// Creates a world with a custom chunk source.
    ///
    /// Chunks produced by `source` must match `config.world_height`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an invalid configuration or registry file.
    pub fn with_source(
        config: WorldConfig,
        store: Box<dyn ChunkStore>,
        source: Arc<dyn ChunkSource>,
    ) -> WorldResult<Self> {
        config.validate()?;
        let (blocks, _) = config.load_registries()?;
        Self::build(config, store, source, blocks)
    }

    fn build(
        config: WorldConfig,
        store: Box<dyn ChunkStore>,
        source: Arc<dyn ChunkSource>,
        blocks: Arc<BlockRegistry>,
    ) -> WorldResult<Self> {
        let pool = GenerationPool::new(source, config.generation_workers)?;
        info!(
            seed = config.seed,
            height = config.world_height,
            load_radius = config.load_radius,
            workers = config.generation_workers,
            "World created"
        );
        Ok(Self {
            keep_radius: config.unload_radius,
            store: DataStore::new(config.seed, store).with_world_height(config.world_height),
            config,
            blocks,
            pool,
            chunks: HashMap::new(),
            corrupt: HashMap::new(),
            unloading: HashSet::new(),
            retries: HashMap::new(),
            center: None,
            cycle: 0,
            updates_since_save: 0,
            stats: WorldStats::default(),
            shut_down: false,
        })
    }

    /// World configuration.
    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Block registry.
    #[must_use]
    pub fn blocks(&self) -> &Arc<BlockRegistry> {
        &self.blocks
    }

    /// Edit store.
    #[must_use]
    pub const fn data_store(&self) -> &DataStore {
        &self.store
    }

    /// Chunk containing a world position.
    #[must_use]
    pub fn world_to_chunk(x: f64, z: f64) -> ChunkCoord {
        ChunkCoord::from_block_pos(x.floor() as i32, z.floor() as i32)
    }

    // =========================================================================
    // Update loop
    // =========================================================================

    /// Loads and unloads chunks around the player with the configured radius.
    ///
    /// Returns the number of chunks committed.
    pub fn update(&mut self, x: f64, z: f64) -> usize {
        self.update_with_radius(x, z, self.config.load_radius)
    }

    /// Loads and unloads chunks around the player.
    ///
    /// Chunks farther than the unload radius (or `radius`, if larger) are
    /// unloaded first, then missing chunks within `radius` are requested,
    /// nearest first, and finished generations are committed. Never blocks
    /// on generation. `radius` is capped at [`MAX_RADIUS`].
    ///
    /// Returns the number of chunks committed.
    pub fn update_with_radius(&mut self, x: f64, z: f64, radius: u32) -> usize {
        let radius = Self::capped_radius(radius);
        self.cycle += 1;
        self.stats.update_cycles += 1;

        let center = Self::world_to_chunk(x, z);
        self.center = Some(center);
        self.keep_radius = self.config.unload_radius.max(radius);

        self.evict_distant(center);
        self.request_missing(center, radius);

        let results = self.pool.poll();
        let committed = self.commit_all(results);

        self.autosave();
        committed
    }

    fn capped_radius(radius: u32) -> u32 {
        if radius > MAX_RADIUS {
            warn!(radius, max = MAX_RADIUS, "Radius capped");
        }
        radius.min(MAX_RADIUS)
    }

    fn evict_distant(&mut self, center: ChunkCoord) {
        let keep = self.keep_radius;
        let mut distant: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .copied()
            .filter(|coord| coord.chebyshev_distance(center) > keep)
            .collect();
        distant.sort_unstable();

        for coord in distant {
            // Failure is logged in unload_chunk; the chunk stays Unloading
            let _ = self.unload_chunk(coord);
        }

        // Back in range before the write went through
        self.unloading.retain(|coord| coord.chebyshev_distance(center) > keep);
        self.corrupt.retain(|coord, _| coord.chebyshev_distance(center) <= keep);
        self.retries.retain(|coord, _| coord.chebyshev_distance(center) <= keep);
    }

    fn request_missing(&mut self, center: ChunkCoord, radius: u32) {
        let r = radius as i32;
        let mut wanted: Vec<ChunkCoord> = (-r..=r)
            .flat_map(|dx| (-r..=r).map(move |dz| center.offset(dx, dz)))
            .filter(|coord| self.needs_request(*coord))
            .collect();
        wanted.sort_unstable_by_key(|coord| (coord.chebyshev_distance(center), *coord));

        for coord in wanted.into_iter().take(self.config.max_chunks_per_update) {
            self.pool.submit(coord);
        }
    }

    fn needs_request(&self, coord: ChunkCoord) -> bool {
        if self.chunks.contains_key(&coord) || self.corrupt.contains_key(&coord) || self.pool.is_in_flight(coord)
        {
            return false;
        }
        self.retries.get(&coord).map_or(true, |retry| !retry.failed && self.cycle >= retry.next_cycle)
    }

    fn autosave(&mut self) {
        if self.config.autosave_interval == 0 {
            return;
        }
        self.updates_since_save += 1;
        if self.updates_since_save >= self.config.autosave_interval {
            self.updates_since_save = 0;
            if let Err(e) = self.flush() {
                error!(error = %e, "Autosave failed, edits stay pending");
            }
        }
    }

    /// Queues generation of a chunk. Returns `false` if it is already
    /// resident, corrupt or in flight.
    pub fn request_chunk(&mut self, coord: ChunkCoord) -> bool {
        if self.chunks.contains_key(&coord) || self.corrupt.contains_key(&coord) {
            return false;
        }
        self.pool.submit(coord)
    }

    /// Waits for every in-flight generation (bounded by the configured
    /// timeout) and commits the results.
    ///
    /// Returns the number of chunks committed.
    pub fn flush_generation_queue(&mut self) -> usize {
        let results = self.pool.wait_all(self.config.generation_timeout());
        self.commit_all(results)
    }

    fn commit_all(&mut self, results: Vec<GenerationResult>) -> usize {
        let mut committed = 0;
        for done in results {
            if !self.is_wanted(done.coord) {
                self.stats.chunks_discarded += 1;
                debug!(chunk = %done.coord, "Discarded generation for chunk out of range");
                continue;
            }
            if self.install(done.coord, done.result).is_ok() {
                committed += 1;
            }
        }
        committed
    }

    fn is_wanted(&self, coord: ChunkCoord) -> bool {
        self.center.map_or(true, |center| coord.chebyshev_distance(center) <= self.keep_radius)
    }

    /// Commits a generation result: replays edits, or records the failure.
    fn install(&mut self, coord: ChunkCoord, result: WorldResult<Chunk>) -> WorldResult<()> {
        let mut chunk = match result {
            Ok(chunk) => chunk,
            Err(e) => {
                self.note_generation_failure(coord, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.restore_edits(&mut chunk) {
            error!(chunk = %coord, error = %e, "Chunk held as corrupt");
            self.corrupt.insert(coord, e.clone());
            return Err(e);
        }

        chunk.mark_all_dirty();
        self.retries.remove(&coord);
        self.chunks.insert(coord, chunk);
        self.stats.chunks_loaded += 1;
        debug!(chunk = %coord, "Committed chunk");
        Ok(())
    }

    fn restore_edits(&self, chunk: &mut Chunk) -> WorldResult<()> {
        let coord = chunk.coord();
        if chunk.height() != self.config.world_height {
            return Err(WorldError::CorruptChunk {
                coord,
                reason: format!("height {} but world height is {}", chunk.height(), self.config.world_height),
            });
        }

        let corrupt = |reason: String| WorldError::CorruptChunk { coord, reason };
        for edit in self.store.get_edits(coord)? {
            if !edit.block.id.is_air() {
                let props = self
                    .blocks
                    .get(edit.block.id)
                    .ok_or_else(|| corrupt(format!("persisted block {} is not registered", edit.block.id)))?;
                if let Some(entity) = &edit.entity {
                    if props.entity != Some(entity.kind()) {
                        return Err(corrupt(format!("persisted entity does not fit block {}", edit.block.id)));
                    }
                }
            } else if edit.entity.is_some() {
                return Err(corrupt("persisted entity on air".into()));
            }
            chunk
                .restore(edit.pos, edit.block, edit.entity)
                .map_err(|e| corrupt(format!("cannot replay edit: {e}")))?;
        }
        Ok(())
    }

    fn note_generation_failure(&mut self, coord: ChunkCoord, e: &WorldError) {
        let max = self.config.max_generation_attempts;
        let cycle = self.cycle;
        let retry = self.retries.entry(coord).or_insert(RetryState { attempts: 0, next_cycle: 0, failed: false });
        retry.attempts += 1;

        if retry.attempts >= max {
            retry.failed = true;
            error!(chunk = %coord, attempts = retry.attempts, error = %e, "Chunk generation failed permanently");
        } else {
            let backoff = (1u64 << (retry.attempts - 1).min(6)).min(MAX_BACKOFF_CYCLES);
            retry.next_cycle = cycle + backoff;
            warn!(chunk = %coord, attempts = retry.attempts, backoff, error = %e, "Chunk generation failed, retrying");
        }
    }

    /// Clears retry bookkeeping so failed chunks are requested again.
    pub fn retry_failed(&mut self) {
        let failed = self.retries.values().filter(|retry| retry.failed).count();
        self.retries.clear();
        if failed > 0 {
            info!(chunks = failed, "Retrying failed chunks");
        }
    }

    // =========================================================================
    // Explicit load / unload
    // =========================================================================

    /// Makes a chunk resident, generating it on this thread if needed.
    ///
    /// Waits for an in-flight generation up to the configured timeout.
    /// Ignores the load radius and any retry backoff.
    ///
    /// # Errors
    ///
    /// `CorruptChunk` if the chunk is held as corrupt, `GenerationFailure`
    /// on failure or timeout.
    pub fn load_chunk(&mut self, coord: ChunkCoord) -> WorldResult<()> {
        if self.chunks.contains_key(&coord) {
            return Ok(());
        }
        if let Some(e) = self.corrupt.get(&coord) {
            return Err(e.clone());
        }

        let result = if self.pool.is_in_flight(coord) {
            self.pool.wait_for(coord, self.config.generation_timeout()).ok_or_else(|| {
                WorldError::GenerationFailure { coord, reason: "timed out waiting for generation".into() }
            })?
        } else {
            self.pool.generate_now(coord)
        };
        self.install(coord, result)
    }

    /// Loads every chunk within `radius` of a position synchronously.
    ///
    /// Returns the number of chunks newly loaded.
    ///
    /// # Errors
    ///
    /// The first load error; the remaining chunks are still attempted.
    pub fn ensure_loaded_around(&mut self, x: f64, z: f64, radius: u32) -> WorldResult<usize> {
        let center = Self::world_to_chunk(x, z);
        let r = Self::capped_radius(radius) as i32;
        let mut loaded = 0;
        let mut first_error = None;

        for dx in -r..=r {
            for dz in -r..=r {
                let coord = center.offset(dx, dz);
                if self.chunks.contains_key(&coord) {
                    continue;
                }
                match self.load_chunk(coord) {
                    Ok(()) => loaded += 1,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(loaded), Err)
    }

    /// Writes a chunk's edits and drops it from memory.
    ///
    /// Returns `false` if the chunk was not resident.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` if the edits cannot be written. The chunk stays
    /// resident as [`ChunkState::Unloading`] and is retried on later updates.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> WorldResult<bool> {
        if !self.chunks.contains_key(&coord) {
            self.corrupt.remove(&coord);
            return Ok(false);
        }

        if let Err(e) = self.store.flush_chunk(coord) {
            if self.unloading.insert(coord) {
                warn!(chunk = %coord, "Unload deferred until edits are written");
            }
            return Err(e);
        }

        self.unloading.remove(&coord);
        self.chunks.remove(&coord);
        self.store.release(coord);
        self.stats.chunks_unloaded += 1;
        debug!(chunk = %coord, "Unloaded chunk");
        Ok(true)
    }

    // =========================================================================
    // Block access
    // =========================================================================

    fn locate(&self, x: i32, y: i32, z: i32) -> WorldResult<(ChunkCoord, LocalPos)> {
        let (coord, pos) = LocalPos::from_world(x, y, z, self.config.world_height)?;
        if let Some(e) = self.corrupt.get(&coord) {
            return Err(e.clone());
        }
        if !self.chunks.contains_key(&coord) {
            return Err(WorldError::ChunkNotLoaded(coord));
        }
        Ok((coord, pos))
    }

    fn resident(&self, coord: ChunkCoord) -> WorldResult<&Chunk> {
        self.chunks.get(&coord).ok_or(WorldError::ChunkNotLoaded(coord))
    }

    /// Block at world coordinates.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` for y outside the world, `ChunkNotLoaded` or
    /// `CorruptChunk` for a chunk that cannot be queried.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> WorldResult<BlockId> {
        let (coord, pos) = self.locate(x, y, z)?;
        Ok(self.resident(coord)?.block_at(pos))
    }

    /// Block state at world coordinates.
    ///
    /// # Errors
    ///
    /// As [`World::get_block`].
    pub fn get_block_state(&self, x: i32, y: i32, z: i32) -> WorldResult<BlockState> {
        let (coord, pos) = self.locate(x, y, z)?;
        Ok(self.resident(coord)?.get_state(pos))
    }

    /// Block entity at world coordinates.
    ///
    /// # Errors
    ///
    /// As [`World::get_block`].
    pub fn get_block_entity(&self, x: i32, y: i32, z: i32) -> WorldResult<Option<&BlockEntity>> {
        let (coord, pos) = self.locate(x, y, z)?;
        Ok(self.resident(coord)?.get_block_entity(pos))
    }

    /// Sets a block with its default state, creating an empty block entity
    /// if the block carries one.
    ///
    /// # Errors
    ///
    /// As [`World::set_block_with`].
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> WorldResult<()> {
        self.set_block_with(x, y, z, Block::new(id), None)
    }

    /// Sets a block, its state and block entity, and records the edit.
    ///
    /// A block that carries an entity gets an empty one when `entity` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds`, `ChunkNotLoaded`, `CorruptChunk`, `UnknownBlock` for
    /// an unregistered id, `BlockEntityMismatch` for an entity the block
    /// does not carry, `InvalidBlockEntity` for a payload that could not be
    /// persisted, or a persistence error from recording the edit. The chunk
    /// is unchanged on error.
    pub fn set_block_with(
        &mut self,
        x: i32,
        y: i32,
        z: i32,
        block: Block,
        entity: Option<BlockEntity>,
    ) -> WorldResult<()> {
        let (coord, pos) = self.locate(x, y, z)?;
        let entity = self.checked_entity(block.id, entity)?;
        self.apply_edit(coord, Edit { pos, block, entity })
    }

    /// Replaces the block entity at a position, keeping the block.
    ///
    /// # Errors
    ///
    /// As [`World::set_block_with`].
    pub fn set_block_entity(&mut self, x: i32, y: i32, z: i32, entity: BlockEntity) -> WorldResult<()> {
        let (coord, pos) = self.locate(x, y, z)?;
        let block = self.resident(coord)?.full_block(pos);
        let entity = self.checked_entity(block.id, Some(entity))?;
        self.apply_edit(coord, Edit { pos, block, entity })
    }

    fn checked_entity(&self, id: BlockId, entity: Option<BlockEntity>) -> WorldResult<Option<BlockEntity>> {
        let expected = if id.is_air() { None } else { self.blocks.require(id)?.entity };
        match (expected, entity) {
            (Some(kind), None) => Ok(Some(BlockEntity::empty(kind))),
            (expected, Some(entity)) if expected != Some(entity.kind()) => {
                Err(WorldError::BlockEntityMismatch { block: id, entity: entity.kind() })
            }
            (_, Some(entity)) => {
                entity.validate()?;
                Ok(Some(entity))
            }
            (_, None) => Ok(None),
        }
    }

    fn apply_edit(&mut self, coord: ChunkCoord, edit: Edit) -> WorldResult<()> {
        // Recorded first so a failed record leaves the chunk untouched
        self.store.record_edit(coord, edit.clone())?;

        let chunk = self.chunks.get_mut(&coord).ok_or(WorldError::ChunkNotLoaded(coord))?;
        chunk.set_block_with(
            i32::from(edit.pos.x()),
            i32::from(edit.pos.y()),
            i32::from(edit.pos.z()),
            edit.block,
            edit.entity,
        )?;
        self.stats.edits_recorded += 1;
        Ok(())
    }

    /// True if the block at world coordinates collides.
    #[must_use]
    pub fn is_solid(&self, x: i32, y: i32, z: i32) -> bool {
        self.get_block(x, y, z).map_or(false, |id| self.blocks.is_solid(id))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Resident chunk at `coord`.
    #[must_use]
    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    /// Resident chunk coordinates, sorted.
    #[must_use]
    pub fn loaded_chunks(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.chunks.keys().copied().collect();
        coords.sort_unstable();
        coords
    }

    /// Lifecycle state of a coordinate.
    #[must_use]
    pub fn chunk_state(&self, coord: ChunkCoord) -> ChunkState {
        if let Some(chunk) = self.chunks.get(&coord) {
            if self.unloading.contains(&coord) {
                ChunkState::Unloading
            } else if chunk.is_edited() {
                ChunkState::Dirty
            } else {
                ChunkState::Loaded
            }
        } else if self.corrupt.contains_key(&coord) {
            ChunkState::Corrupt
        } else if self.pool.is_in_flight(coord) {
            ChunkState::Generating
        } else if self.retries.get(&coord).is_some_and(|retry| retry.failed) {
            ChunkState::Failed
        } else {
            ChunkState::Unloaded
        }
    }

    /// Drains mesh-dirty subchunks of every resident chunk, ordered by
    /// chunk then subchunk. Newly loaded chunks report every subchunk.
    pub fn take_dirty_subchunks(&mut self) -> Vec<DirtySubchunk> {
        let mut coords: Vec<ChunkCoord> = self.chunks.keys().copied().collect();
        coords.sort_unstable();

        let mut dirty = Vec::new();
        for coord in coords {
            if let Some(chunk) = self.chunks.get_mut(&coord) {
                dirty.extend(chunk.take_dirty_subchunks().into_iter().map(|index| DirtySubchunk { coord, index }));
            }
        }
        dirty
    }

    /// Writes all pending edits to storage.
    ///
    /// Returns the number of chunk records written.
    ///
    /// # Errors
    ///
    /// The first `PersistenceFailure`; failed chunks stay pending.
    pub fn flush(&mut self) -> WorldResult<usize> {
        let result = self.store.flush();
        for (coord, chunk) in &mut self.chunks {
            if chunk.is_edited() && !self.store.has_pending(*coord) {
                chunk.clear_edited();
            }
        }
        result
    }

    /// Session statistics.
    #[must_use]
    pub fn stats(&self) -> WorldStats {
        WorldStats {
            loaded_chunks: self.chunks.len(),
            generating_chunks: self.pool.in_flight_count(),
            corrupt_chunks: self.corrupt.len(),
            failed_chunks: self.retries.values().filter(|retry| retry.failed).count(),
            pending_edit_chunks: self.store.pending_chunks().len(),
            generations_run: self.pool.generations_run(),
            ..self.stats
        }
    }

    /// Flushes edits and stops the generation workers. Idempotent.
    ///
    /// # Errors
    ///
    /// The flush error, after the workers have been stopped.
    pub fn shutdown(&mut self) -> WorldResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let result = self.flush();
        self.pool.shutdown();
        info!(loaded = self.chunks.len(), "World shut down");
        result.map(|_| ())
    }
}

impl BlockQuery for World {
    fn block_at(&self, x: i32, y: i32, z: i32) -> WorldResult<BlockId> {
        self.get_block(x, y, z)
    }

    fn is_solid(&self, x: i32, y: i32, z: i32) -> bool {
        Self::is_solid(self, x, y, z)
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Edits lost on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        World::new(WorldConfig::test()).unwrap()
    }

    #[test]
    fn test_world_to_chunk() {
        assert_eq!(World::world_to_chunk(0.0, 0.0), ChunkCoord::new(0, 0));
        assert_eq!(World::world_to_chunk(15.9, 16.0), ChunkCoord::new(0, 1));
        assert_eq!(World::world_to_chunk(-0.1, -16.0), ChunkCoord::new(-1, -1));
        assert_eq!(World::world_to_chunk(-16.5, 31.0), ChunkCoord::new(-2, 1));
    }

    #[test]
    fn test_update_loads_square() {
        let mut world = world();
        let committed = world.update(8.0, 8.0);
        assert_eq!(committed, 25, "Radius 2 covers a 5x5 square");
        assert_eq!(world.chunk_state(ChunkCoord::new(2, -2)), ChunkState::Loaded);
        assert_eq!(world.chunk_state(ChunkCoord::new(3, 0)), ChunkState::Unloaded);
        assert_eq!(world.update(8.0, 8.0), 0);
    }

    #[test]
    fn test_max_chunks_per_update() {
        let config = WorldConfig { max_chunks_per_update: 4, ..WorldConfig::test() };
        let mut world = World::new(config).unwrap();
        assert_eq!(world.update(8.0, 8.0), 4);
        assert_eq!(world.chunk_state(ChunkCoord::new(0, 0)), ChunkState::Loaded, "Nearest first");
        assert_eq!(world.update(8.0, 8.0), 4);
    }

    #[test]
    fn test_radius_capped() {
        assert_eq!(World::capped_radius(u32::MAX), MAX_RADIUS);
        assert_eq!(World::capped_radius(3), 3);

        let config = WorldConfig { max_chunks_per_update: 4, ..WorldConfig::test() };
        let mut world = World::new(config).unwrap();
        assert_eq!(world.update_with_radius(8.0, 8.0, u32::MAX), 4);
        assert_eq!(world.chunk_state(ChunkCoord::new(0, 0)), ChunkState::Loaded);
    }

    #[test]
    fn test_dirty_state_and_flush() {
        let mut world = world();
        world.update(8.0, 8.0);
        let coord = ChunkCoord::new(0, 0);

        world.set_block(1, 100, 1, BlockId::PLANKS).unwrap();
        assert_eq!(world.chunk_state(coord), ChunkState::Dirty);
        assert_eq!(world.stats().pending_edit_chunks, 1);

        assert_eq!(world.flush().unwrap(), 1);
        assert_eq!(world.chunk_state(coord), ChunkState::Loaded);
        assert_eq!(world.stats().pending_edit_chunks, 0);
    }

    #[test]
    fn test_entity_rules() {
        let mut world = world();
        world.update(8.0, 8.0);

        world.set_block(2, 100, 2, BlockId::CHEST).unwrap();
        assert!(matches!(world.get_block_entity(2, 100, 2).unwrap(), Some(BlockEntity::Chest { .. })));

        let sign = BlockEntity::empty(terracraft_procedural::BlockEntityKind::Sign);
        let err = world.set_block_with(3, 100, 3, Block::new(BlockId::STONE), Some(sign.clone())).unwrap_err();
        assert!(matches!(err, WorldError::BlockEntityMismatch { .. }));
        assert_eq!(world.set_block_entity(2, 100, 2, sign).unwrap_err(), WorldError::BlockEntityMismatch {
            block: BlockId::CHEST,
            entity: terracraft_procedural::BlockEntityKind::Sign,
        });

        let before = world.get_block(3, 100, 3).unwrap();
        assert_eq!(world.set_block(3, 100, 3, BlockId(999)).unwrap_err(), WorldError::UnknownBlock(BlockId(999)));
        assert_eq!(world.get_block(3, 100, 3).unwrap(), before, "Rejected edits leave the chunk unchanged");

        // Breaking the chest removes its entity
        world.set_block(2, 100, 2, BlockId::AIR).unwrap();
        assert!(world.get_block_entity(2, 100, 2).unwrap().is_none());
    }

    #[test]
    fn test_dirty_subchunks_reported_once() {
        let mut world = world();
        world.load_chunk(ChunkCoord::new(0, 0)).unwrap();
        let first = world.take_dirty_subchunks();
        assert_eq!(first.len(), 128 / 16, "New chunks report every subchunk");

        world.set_block(0, 33, 0, BlockId::STONE).unwrap();
        assert_eq!(world.take_dirty_subchunks(), vec![DirtySubchunk { coord: ChunkCoord::new(0, 0), index: 2 }]);
        assert!(world.take_dirty_subchunks().is_empty());
    }

    #[test]
    fn test_block_query() {
        let mut world = world();
        world.load_chunk(ChunkCoord::new(0, 0)).unwrap();
        world.set_block(0, 127, 0, BlockId::AIR).unwrap();
        let query: &dyn BlockQuery = &world;
        assert_eq!(query.block_at(0, 0, 0).unwrap(), BlockId::BEDROCK);
        assert!(query.is_solid(0, 0, 0));
        assert!(!query.is_solid(0, 127, 0));
        assert!(!query.is_solid(100, 0, 100), "Unloaded chunks are not solid");
        assert!(!query.is_solid(0, -1, 0));
    }

    #[test]
    fn test_shutdown_idempotent() {
        let mut world = world();
        world.update(0.0, 0.0);
        world.set_block(0, 90, 0, BlockId::STONE).unwrap();
        world.shutdown().unwrap();
        world.shutdown().unwrap();
        assert!(world.data_store().pending_chunks().is_empty());
    }
}
