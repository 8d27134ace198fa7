//! # Feature Placement
//!
//! Ore veins and trees, placed after base terrain.
//!
//! ## Cross-chunk features
//!
//! A tree planted near a chunk edge spills into its neighbour. Each chunk
//! in the 3x3 halo around the target is an *origin*: it decides its own
//! features from a private `ChaCha8Rng` seeded by `(seed, origin)`. When a
//! chunk is generated, all nine origins replay their features in a fixed
//! global order and only the blocks that land inside the target are
//! written. The same feature is therefore drawn identically whichever of
//! its chunks is generated first, and no neighbour ever has to be resident.
//!
//! Random draws never depend on block contents, only on pure column
//! samples, so the stream of an origin is the same for every target.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::biome::TreeKind;
use crate::block::BlockId;
use crate::chunk::{Chunk, ChunkCoord, LocalPos, CHUNK_SIZE};
use crate::error::{WorldError, WorldResult};
use crate::noise::WorldSeed;
use crate::terrain::{ColumnSample, TerrainGenerator};

/// Read-only view of the columns around a chunk being decorated.
///
/// Answers from pure terrain samples, never from generated chunks.
pub struct Halo<'a> {
    terrain: &'a TerrainGenerator,
    center: ChunkCoord,
}

impl<'a> Halo<'a> {
    /// Halo of `center`.
    #[must_use]
    pub const fn new(terrain: &'a TerrainGenerator, center: ChunkCoord) -> Self {
        Self { terrain, center }
    }

    /// The chunk being decorated.
    #[must_use]
    pub const fn center(&self) -> ChunkCoord {
        self.center
    }

    /// True if the world column lies in the 3x3 chunk neighbourhood.
    #[must_use]
    pub const fn contains(&self, wx: i32, wz: i32) -> bool {
        ChunkCoord::from_block_pos(wx, wz).chebyshev_distance(self.center) <= 1
    }

    /// Column sample inside the halo.
    ///
    /// # Errors
    ///
    /// `GenerationFailure` if the column is outside the halo, which means a
    /// feature reached further than one chunk.
    pub fn column(&self, wx: i32, wz: i32) -> WorldResult<ColumnSample> {
        if !self.contains(wx, wz) {
            return Err(WorldError::GenerationFailure {
                coord: self.center,
                reason: format!("column ({wx}, {wz}) outside feature halo"),
            });
        }
        Ok(self.terrain.sample_column(wx, wz))
    }
}

/// What a feature block may overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Replace {
    Stone,
    Air,
    AirOrLeaves,
}

/// One ore vein configuration.
#[derive(Clone, Copy, Debug)]
struct OreVein {
    block: BlockId,
    attempts: u32,
    min_y: i32,
    max_y: i32,
    size: u32,
}

const ORES: [OreVein; 3] = [
    OreVein { block: BlockId::COAL_ORE, attempts: 18, min_y: 5, max_y: 96, size: 8 },
    OreVein { block: BlockId::IRON_ORE, attempts: 10, min_y: 5, max_y: 54, size: 6 },
    OreVein { block: BlockId::GOLD_ORE, attempts: 3, min_y: 5, max_y: 30, size: 5 },
];

const ORE_SALT: u64 = 0x04E5_0000;
const TREE_SALT: u64 = 0x07EE_0000;

/// Places ore veins and trees into generated terrain.
pub struct FeatureGenerator {
    seed: WorldSeed,
}

impl FeatureGenerator {
    /// Creates a feature generator.
    #[must_use]
    pub const fn new(seed: WorldSeed) -> Self {
        Self { seed }
    }

    /// Decorates `chunk` with every feature of its halo. Ores first, then trees.
    ///
    /// # Errors
    ///
    /// `GenerationFailure` if the halo does not belong to the chunk or a
    /// feature samples outside the halo.
    pub fn apply(&self, chunk: &mut Chunk, halo: &Halo<'_>) -> WorldResult<()> {
        if halo.center() != chunk.coord() {
            return Err(WorldError::GenerationFailure {
                coord: chunk.coord(),
                reason: format!("halo centred on {}", halo.center()),
            });
        }

        let origins = chunk.coord().halo();
        for origin in origins {
            self.place_ores(chunk, halo, origin)?;
        }
        for origin in origins {
            self.place_trees(chunk, halo, origin)?;
        }
        Ok(())
    }

    fn rng(&self, origin: ChunkCoord, salt: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed.for_chunk(origin, salt))
    }

    /// Biome sample at the middle of an origin chunk.
    fn origin_sample(halo: &Halo<'_>, origin: ChunkCoord) -> WorldResult<ColumnSample> {
        let mid = CHUNK_SIZE as i32 / 2;
        halo.column(origin.world_x() + mid, origin.world_z() + mid)
    }

    fn place_ores(&self, chunk: &mut Chunk, halo: &Halo<'_>, origin: ChunkCoord) -> WorldResult<()> {
        let biome = Self::origin_sample(halo, origin)?.biome;
        let multiplier = halo.terrain.biomes().params(biome).ore_multiplier;
        let height = chunk.height() as i32;
        let mut rng = self.rng(origin, ORE_SALT);

        for ore in ORES {
            let attempts = (f64::from(ore.attempts) * multiplier).round() as u32;
            let max_y = ore.max_y.min(height - 1);
            if max_y <= ore.min_y {
                continue;
            }
            for _ in 0..attempts {
                let mut x = origin.world_x() + rng.gen_range(0..CHUNK_SIZE as i32);
                let mut y = rng.gen_range(ore.min_y..max_y);
                let mut z = origin.world_z() + rng.gen_range(0..CHUNK_SIZE as i32);

                for _ in 0..ore.size {
                    place(chunk, x, y, z, ore.block, Replace::Stone);
                    x += rng.gen_range(-1..=1);
                    y += rng.gen_range(-1..=1);
                    z += rng.gen_range(-1..=1);
                }
            }
        }
        Ok(())
    }

    fn place_trees(&self, chunk: &mut Chunk, halo: &Halo<'_>, origin: ChunkCoord) -> WorldResult<()> {
        let params = *halo.terrain.biomes().params(Self::origin_sample(halo, origin)?.biome);
        if params.tree_kind == TreeKind::None {
            return Ok(());
        }

        let sea_level = halo.terrain.sea_level();
        let height = chunk.height() as i32;
        let mut rng = self.rng(origin, TREE_SALT);

        for _ in 0..params.tree_density {
            let wx = origin.world_x() + rng.gen_range(0..CHUNK_SIZE as i32);
            let wz = origin.world_z() + rng.gen_range(0..CHUNK_SIZE as i32);
            let size = match params.tree_kind {
                TreeKind::Oak => rng.gen_range(4..=6),
                TreeKind::Spruce => rng.gen_range(6..=8),
                TreeKind::Cactus => rng.gen_range(1..=3),
                TreeKind::None => 0,
            };

            let ground = halo.column(wx, wz)?;
            if ground.height < sea_level || !rooted(params.tree_kind, ground.surface) {
                continue;
            }
            let base = ground.height + 1;
            if base + size + 2 >= height {
                continue;
            }

            match params.tree_kind {
                TreeKind::Oak => oak(chunk, wx, base, wz, size),
                TreeKind::Spruce => spruce(chunk, wx, base, wz, size),
                TreeKind::Cactus => {
                    for y in base..base + size {
                        place(chunk, wx, y, wz, BlockId::CACTUS, Replace::Air);
                    }
                }
                TreeKind::None => {}
            }
        }
        Ok(())
    }
}

/// Ground a tree species can grow on.
const fn rooted(kind: TreeKind, ground: BlockId) -> bool {
    match kind {
        TreeKind::Oak => ground.0 == BlockId::GRASS.0,
        TreeKind::Spruce => ground.0 == BlockId::GRASS.0 || ground.0 == BlockId::SNOW.0,
        TreeKind::Cactus => ground.0 == BlockId::SAND.0,
        TreeKind::None => false,
    }
}

fn oak(chunk: &mut Chunk, wx: i32, base: i32, wz: i32, trunk: i32) {
    for y in base..base + trunk {
        place(chunk, wx, y, wz, BlockId::WOOD, Replace::AirOrLeaves);
    }
    let top = base + trunk;
    for (y, radius) in [(top - 3, 2), (top - 2, 2), (top - 1, 1), (top, 1)] {
        canopy_layer(chunk, wx, y, wz, radius, BlockId::LEAVES);
    }
}

fn spruce(chunk: &mut Chunk, wx: i32, base: i32, wz: i32, trunk: i32) {
    for y in base..base + trunk {
        place(chunk, wx, y, wz, BlockId::SPRUCE_WOOD, Replace::AirOrLeaves);
    }
    let top = base + trunk;
    for y in base + 2..=top {
        let radius = ((top - y + 1) / 2).min(2);
        canopy_layer(chunk, wx, y, wz, radius, BlockId::SPRUCE_LEAVES);
    }
}

/// Round layer of leaves; corners are cut on radius 2.
fn canopy_layer(chunk: &mut Chunk, wx: i32, y: i32, wz: i32, radius: i32, leaves: BlockId) {
    for dz in -radius..=radius {
        for dx in -radius..=radius {
            if radius > 1 && dx * dx + dz * dz > radius * radius + 1 {
                continue;
            }
            place(chunk, wx + dx, y, wz + dz, leaves, Replace::Air);
        }
    }
}

/// Writes one feature block if it falls inside `chunk` and the target
/// position accepts it.
fn place(chunk: &mut Chunk, wx: i32, y: i32, wz: i32, id: BlockId, replace: Replace) {
    let Ok((coord, pos)) = LocalPos::from_world(wx, y, wz, chunk.height()) else {
        return;
    };
    if coord != chunk.coord() || y < 1 {
        return;
    }
    let current = chunk.block_at(pos);
    let allowed = match replace {
        Replace::Stone => current == BlockId::STONE,
        Replace::Air => current.is_air(),
        Replace::AirOrLeaves => {
            current.is_air() || current == BlockId::LEAVES || current == BlockId::SPRUCE_LEAVES
        }
    };
    if allowed {
        chunk.set_generated(pos, id);
    }
}
