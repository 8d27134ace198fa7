//! # World Lifecycle Tests
//!
//! Load/unload around the player, edit replay, generation deduplication
//! and failure handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use terracraft_procedural::ChunkGenerator;
use terracraft_world::{
    BlockId, Chunk, ChunkCoord, ChunkSource, ChunkState, ChunkStore, DataStore, Edit, LocalPos, MemoryStore,
    World, WorldConfig, WorldError, WorldResult,
};

fn test_world() -> World {
    World::new(WorldConfig::test()).unwrap()
}

/// Test: y = -1 and y = height fail, y = 0 and y = height - 1 succeed.
#[test]
fn test_vertical_bounds() {
    let mut world = test_world();
    world.load_chunk(ChunkCoord::new(0, 0)).unwrap();

    assert_eq!(world.get_block(3, -1, 3), Err(WorldError::OutOfBounds { x: 3, y: -1, z: 3 }));
    assert_eq!(world.get_block(3, 128, 3), Err(WorldError::OutOfBounds { x: 3, y: 128, z: 3 }));
    assert_eq!(world.get_block(3, 0, 3).unwrap(), BlockId::BEDROCK);
    assert!(world.get_block(3, 127, 3).is_ok());

    assert!(world.set_block(3, 128, 3, BlockId::STONE).is_err());
    world.set_block(3, 127, 3, BlockId::STONE).unwrap();
}

/// Test: seed 42, STONE at (3,70,3) survives unload and reload; the block
/// below keeps its generated value.
#[test]
fn test_edit_survives_reload() {
    let coord = ChunkCoord::new(0, 0);
    let generated = ChunkGenerator::with_seed(42).unwrap().generate(coord).unwrap();

    let mut world = test_world();
    world.load_chunk(coord).unwrap();
    assert_eq!(world.chunk(coord).unwrap().height_map(), generated.height_map());

    world.set_block(3, 70, 3, BlockId::STONE).unwrap();
    assert_eq!(world.chunk_state(coord), ChunkState::Dirty);

    assert!(world.unload_chunk(coord).unwrap());
    assert_eq!(world.chunk_state(coord), ChunkState::Unloaded);
    assert_eq!(world.get_block(3, 70, 3), Err(WorldError::ChunkNotLoaded(coord)));

    world.load_chunk(coord).unwrap();
    assert_eq!(world.chunk_state(coord), ChunkState::Loaded);
    assert_eq!(world.get_block(3, 70, 3).unwrap(), BlockId::STONE);
    assert_eq!(world.get_block(3, 69, 3).unwrap(), generated.get_block(3, 69, 3).unwrap());
}

/// Test: reload equals fresh generation with the edits re-applied in order.
#[test]
fn test_reload_is_generation_plus_edits() {
    let coord = ChunkCoord::new(-1, 2);
    let (ox, oz) = (coord.world_x(), coord.world_z());
    let edits = [
        (0, 80, 0, BlockId::PLANKS),
        (5, 3, 9, BlockId::AIR),
        (0, 80, 0, BlockId::SAND),
        (15, 127, 15, BlockId::COBBLESTONE),
    ];

    let mut world = test_world();
    world.load_chunk(coord).unwrap();
    for (x, y, z, id) in edits {
        world.set_block(ox + x, y, oz + z, id).unwrap();
    }
    world.unload_chunk(coord).unwrap();
    world.load_chunk(coord).unwrap();

    let mut expected = ChunkGenerator::with_seed(42).unwrap().generate(coord).unwrap();
    for (x, y, z, id) in edits {
        expected.set_block(x, y, z, id).unwrap();
    }
    assert_eq!(world.chunk(coord).unwrap().blocks(), expected.blocks());
    assert_eq!(world.chunk(coord).unwrap().height_map(), expected.height_map());
}

/// Test: chunks at exactly the load radius are not unloaded in the cycle
/// they were loaded, and the hysteresis band keeps them while the player
/// moves one chunk away.
#[test]
fn test_hysteresis() {
    let mut world = test_world();
    world.update(8.0, 8.0);

    for x in -2..=2 {
        for z in -2..=2 {
            assert_eq!(world.chunk_state(ChunkCoord::new(x, z)), ChunkState::Loaded, "({x}, {z})");
        }
    }

    // One chunk east: (-2, 0) is now at distance 3 = unload radius
    world.update(24.0, 8.0);
    assert_eq!(world.chunk_state(ChunkCoord::new(-2, 0)), ChunkState::Loaded);
    assert_eq!(world.chunk_state(ChunkCoord::new(3, 0)), ChunkState::Loaded);

    // Two chunks east: distance 4 > 3
    world.update(40.0, 8.0);
    assert_eq!(world.chunk_state(ChunkCoord::new(-2, 0)), ChunkState::Unloaded);
    assert_eq!(world.chunk_state(ChunkCoord::new(-1, 0)), ChunkState::Loaded);
    assert!(world.stats().chunks_unloaded >= 5);
}

/// Test: a radius larger than the unload radius does not evict what it
/// just loaded.
#[test]
fn test_large_radius_keeps_new_chunks() {
    let mut world = test_world();
    let committed = world.update_with_radius(8.0, 8.0, 4);
    assert_eq!(committed, 64, "Capped by max_chunks_per_update");
    world.update_with_radius(8.0, 8.0, 4);
    world.update_with_radius(8.0, 8.0, 4);

    assert_eq!(world.chunk_state(ChunkCoord::new(4, 4)), ChunkState::Loaded);
    assert_eq!(world.stats().loaded_chunks, 81);
    assert_eq!(world.stats().chunks_unloaded, 0);
}

/// Test: two requests for the same coordinate produce one generation.
#[test]
fn test_request_dedup_inline() {
    let mut world = test_world();
    let coord = ChunkCoord::new(7, 7);

    assert!(world.request_chunk(coord));
    assert!(!world.request_chunk(coord));
    assert_eq!(world.chunk_state(coord), ChunkState::Generating);

    assert_eq!(world.flush_generation_queue(), 1);
    assert_eq!(world.stats().generations_run, 1);
    assert_eq!(world.chunk_state(coord), ChunkState::Loaded);
    assert!(!world.request_chunk(coord), "Resident chunks are not regenerated");
}

/// Test: deduplication holds with worker threads.
#[test]
fn test_request_dedup_workers() {
    let config = WorldConfig { generation_workers: 2, ..WorldConfig::test() };
    let mut world = World::new(config).unwrap();
    let coord = ChunkCoord::new(-4, 1);

    assert!(world.request_chunk(coord));
    assert!(!world.request_chunk(coord));
    world.load_chunk(coord).unwrap();
    assert!(!world.request_chunk(coord));

    // (-4, 1) lies beyond the unload radius of the player and is evicted
    world.update(8.0, 8.0);
    world.flush_generation_queue();
    assert_eq!(world.chunk_state(coord), ChunkState::Unloaded);
    assert_eq!(world.stats().loaded_chunks, 25);
    assert_eq!(world.stats().generations_run, 26);

    // Worker output equals inline output
    let inline = ChunkGenerator::with_seed(42).unwrap().generate(ChunkCoord::new(1, 1)).unwrap();
    assert_eq!(world.chunk(ChunkCoord::new(1, 1)).unwrap().blocks(), inline.blocks());
    world.shutdown().unwrap();
}

/// Test: finished generations for chunks out of range are thrown away.
#[test]
fn test_unwanted_results_discarded() {
    let config = WorldConfig { generation_workers: 1, ..WorldConfig::test() };
    let mut world = World::new(config).unwrap();
    world.update(8.0, 8.0);
    world.flush_generation_queue();

    let far = ChunkCoord::new(40, 40);
    assert!(world.request_chunk(far));
    world.flush_generation_queue();
    assert_eq!(world.chunk_state(far), ChunkState::Unloaded);
    assert_eq!(world.stats().chunks_discarded, 1);
}

/// Test: queries against unloaded chunks fail until loaded.
#[test]
fn test_chunk_not_loaded() {
    let mut world = test_world();
    let coord = ChunkCoord::new(62, 62);

    assert_eq!(world.get_block(1000, 64, 1000), Err(WorldError::ChunkNotLoaded(coord)));
    assert_eq!(world.set_block(1000, 64, 1000, BlockId::STONE), Err(WorldError::ChunkNotLoaded(coord)));
    assert!(!world.is_solid(1000, 0, 1000));

    world.load_chunk(coord).unwrap();
    world.set_block(1000, 64, 1000, BlockId::STONE).unwrap();
    assert_eq!(world.get_block(1000, 64, 1000).unwrap(), BlockId::STONE);
}

/// Test: a record that fails verification holds the chunk as corrupt.
#[test]
fn test_corrupt_record() {
    let backing = MemoryStore::new();
    let coord = ChunkCoord::new(0, 0);
    backing.write(42, coord, b"TCED garbage").unwrap();

    let mut world = World::with_store(WorldConfig::test(), Box::new(backing)).unwrap();
    assert_eq!(world.update(8.0, 8.0), 24);
    assert_eq!(world.chunk_state(coord), ChunkState::Corrupt);
    assert_eq!(world.stats().corrupt_chunks, 1);

    assert!(matches!(world.get_block(1, 64, 1), Err(WorldError::CorruptChunk { .. })));
    assert!(matches!(world.set_block(1, 64, 1, BlockId::STONE), Err(WorldError::CorruptChunk { .. })));
    assert!(matches!(world.load_chunk(coord), Err(WorldError::CorruptChunk { .. })));
    assert_eq!(world.get_block(17, 0, 1).unwrap(), BlockId::BEDROCK, "Neighbours are unaffected");
}

/// Test: a persisted block id missing from the registry is corruption,
/// not air.
#[test]
fn test_unregistered_persisted_block() {
    let backing = MemoryStore::new();
    let coord = ChunkCoord::new(1, 1);
    let store = DataStore::new(42, Box::new(backing.clone()));
    store
        .record_edit(coord, Edit::new(LocalPos::new(0, 70, 0, 128).unwrap(), BlockId(500).into()))
        .unwrap();
    store.flush().unwrap();

    let mut world = World::with_store(WorldConfig::test(), Box::new(backing)).unwrap();
    let err = world.load_chunk(coord).unwrap_err();
    assert!(matches!(err, WorldError::CorruptChunk { coord: c, .. } if c == coord));
    assert_eq!(world.chunk_state(coord), ChunkState::Corrupt);
}

struct FailingSource {
    inner: ChunkGenerator,
    bad: ChunkCoord,
    panics: bool,
    bad_calls: AtomicUsize,
}

impl FailingSource {
    fn new(bad: ChunkCoord, panics: bool) -> Arc<Self> {
        Arc::new(Self { inner: ChunkGenerator::with_seed(42).unwrap(), bad, panics, bad_calls: AtomicUsize::new(0) })
    }

    fn bad_calls(&self) -> usize {
        self.bad_calls.load(Ordering::SeqCst)
    }
}

impl ChunkSource for FailingSource {
    fn generate(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
        if coord != self.bad {
            return self.inner.generate(coord);
        }
        self.bad_calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("generator bug");
        }
        Err(WorldError::GenerationFailure { coord, reason: "injected".into() })
    }
}

/// Test: failures retry with growing backoff, then park as Failed.
#[test]
fn test_retry_backoff_then_failed() {
    let bad = ChunkCoord::new(0, 0);
    let source = FailingSource::new(bad, false);
    let config = WorldConfig { load_radius: 0, unload_radius: 1, max_generation_attempts: 3, ..WorldConfig::test() };
    let mut world = World::with_source(config, Box::new(MemoryStore::new()), source.clone()).unwrap();

    // Attempts on cycles 1, 2 and 4
    world.update(8.0, 8.0);
    assert_eq!(source.bad_calls(), 1);
    world.update(8.0, 8.0);
    assert_eq!(source.bad_calls(), 2);
    world.update(8.0, 8.0);
    assert_eq!(source.bad_calls(), 2, "Backing off");
    assert_eq!(world.chunk_state(bad), ChunkState::Unloaded);
    world.update(8.0, 8.0);
    assert_eq!(source.bad_calls(), 3);
    assert_eq!(world.chunk_state(bad), ChunkState::Failed);

    for _ in 0..40 {
        world.update(8.0, 8.0);
    }
    assert_eq!(source.bad_calls(), 3, "Failed chunks are not retried");
    assert_eq!(world.stats().failed_chunks, 1);

    world.retry_failed();
    world.update(8.0, 8.0);
    assert_eq!(source.bad_calls(), 4);
}

/// Test: a panicking generator never takes the update loop down.
#[test]
fn test_generator_panic_is_contained() {
    let bad = ChunkCoord::new(1, 0);
    let source = FailingSource::new(bad, true);
    let mut world = World::with_source(WorldConfig::test(), Box::new(MemoryStore::new()), source.clone()).unwrap();

    assert_eq!(world.update(8.0, 8.0), 24);
    assert_eq!(source.bad_calls(), 1);
    assert_ne!(world.chunk_state(bad), ChunkState::Loaded);
    assert!(matches!(world.load_chunk(bad), Err(WorldError::GenerationFailure { .. })));
}

/// Test: ensure_loaded_around loads synchronously and reports the count.
#[test]
fn test_ensure_loaded_around() {
    let config = WorldConfig { generation_workers: 2, ..WorldConfig::test() };
    let mut world = World::new(config).unwrap();

    assert_eq!(world.ensure_loaded_around(-8.0, -8.0, 1).unwrap(), 9);
    assert_eq!(world.ensure_loaded_around(-8.0, -8.0, 1).unwrap(), 0);
    assert!(world.is_solid(-8, 0, -8));
}
