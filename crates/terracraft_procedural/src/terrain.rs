//! # Terrain Generation
//!
//! Base terrain only: strata, water and biomes. Trees and ores are added
//! afterwards by [`crate::features::FeatureGenerator`].
//!
//! Every column is a pure function of `(seed, x, z)`. Biome height
//! parameters are blended over a fixed 3x3 grid around the column, so a
//! chunk never needs its neighbours to be generated.

use std::sync::Arc;

use crate::biome::{Biome, BiomeClassifier, BiomeRegistry};
use crate::block::{BlockId, BlockRegistry};
use crate::chunk::{validate_height, Chunk, ChunkCoord, LocalPos, CHUNK_SIZE};
use crate::error::{WorldError, WorldResult};
use crate::noise::{SimplexNoise, WorldSeed};

/// Result of sampling one world column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColumnSample {
    /// Y of the top terrain block.
    pub height: i32,
    /// Biome at the column.
    pub biome: Biome,
    /// Top terrain block.
    pub surface: BlockId,
}

/// Deterministic noise-based column generator.
pub struct TerrainGenerator {
    seed: WorldSeed,
    world_height: usize,
    sea_level: i32,
    blocks: Arc<BlockRegistry>,
    biomes: Arc<BiomeRegistry>,
    classifier: BiomeClassifier,
    detail_noise: SimplexNoise,
}

impl TerrainGenerator {
    /// Default world height.
    pub const DEFAULT_HEIGHT: usize = 128;
    /// Default sea level.
    pub const DEFAULT_SEA_LEVEL: i32 = 62;

    /// Distance in blocks between biome blending samples.
    const BLEND_STRIDE: i32 = 4;
    /// Weights of the 3x3 blending grid (centre-heavy, sum 16).
    const BLEND_WEIGHTS: [[f64; 3]; 3] = [[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]];
    /// Scale of the per-block detail noise.
    const DETAIL_SCALE: f64 = 0.012;
    /// Blocks of height per unit of continental elevation.
    const ELEVATION_AMPLITUDE: f64 = 10.0;

    /// Creates a terrain generator.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an unsupported world height, a sea level
    /// outside the world, or biomes referring to unregistered blocks.
    pub fn new(
        seed: WorldSeed,
        world_height: usize,
        sea_level: i32,
        blocks: Arc<BlockRegistry>,
        biomes: Arc<BiomeRegistry>,
    ) -> WorldResult<Self> {
        validate_height(world_height)?;
        if sea_level < 1 || sea_level as usize >= world_height - 1 {
            return Err(WorldError::InvalidConfig(format!(
                "sea level {sea_level} outside world of height {world_height}"
            )));
        }
        for id in [BlockId::STONE, BlockId::BEDROCK, BlockId::WATER, BlockId::ICE] {
            blocks.require(id)?;
        }
        biomes.validate(&blocks)?;

        Ok(Self {
            seed,
            world_height,
            sea_level,
            blocks,
            biomes,
            classifier: BiomeClassifier::new(seed),
            detail_noise: SimplexNoise::new(seed.derive(100)),
        })
    }

    /// Generates base terrain for a chunk with built-in registries and
    /// default dimensions.
    ///
    /// # Errors
    ///
    /// Propagates construction errors (none with the defaults).
    pub fn generate_column_with_seed(seed: u64, coord: ChunkCoord) -> WorldResult<Chunk> {
        Self::new(
            WorldSeed::new(seed),
            Self::DEFAULT_HEIGHT,
            Self::DEFAULT_SEA_LEVEL,
            Arc::new(BlockRegistry::builtin()),
            Arc::new(BiomeRegistry::builtin()),
        )?
        .generate_column(coord)
    }

    /// World seed.
    #[must_use]
    pub const fn seed(&self) -> WorldSeed {
        self.seed
    }

    /// World height in blocks.
    #[must_use]
    pub const fn world_height(&self) -> usize {
        self.world_height
    }

    /// Y of the water surface.
    #[must_use]
    pub const fn sea_level(&self) -> i32 {
        self.sea_level
    }

    /// Block registry the generator was validated against.
    #[must_use]
    pub fn blocks(&self) -> &Arc<BlockRegistry> {
        &self.blocks
    }

    /// Biome parameters.
    #[must_use]
    pub fn biomes(&self) -> &Arc<BiomeRegistry> {
        &self.biomes
    }

    /// Samples one world column. Pure: no chunk state is read.
    #[must_use]
    pub fn sample_column(&self, wx: i32, wz: i32) -> ColumnSample {
        let fx = f64::from(wx);
        let fz = f64::from(wz);
        let climate = self.classifier.climate(fx, fz);
        let biome = BiomeClassifier::classify_from_climate(climate);

        let mut base = 0.0;
        let mut variation = 0.0;
        let mut roughness = 0.0;
        let mut total = 0.0;
        for (row, dz) in (-1..=1).enumerate() {
            for (col, dx) in (-1..=1).enumerate() {
                let weight = Self::BLEND_WEIGHTS[row][col];
                let sample_biome = if dx == 0 && dz == 0 {
                    biome
                } else {
                    self.classifier.classify(
                        f64::from(wx + dx * Self::BLEND_STRIDE),
                        f64::from(wz + dz * Self::BLEND_STRIDE),
                    )
                };
                let params = self.biomes.params(sample_biome);
                base += params.base_height * weight;
                variation += params.height_variation * weight;
                roughness += params.roughness * weight;
                total += weight;
            }
        }
        base /= total;
        variation /= total;
        roughness /= total;

        let detail = self.detail_noise.octaved(fx * Self::DETAIL_SCALE, fz * Self::DETAIL_SCALE, 4, roughness, 2.0);
        let raw = f64::from(self.sea_level)
            + base
            + climate.elevation * Self::ELEVATION_AMPLITUDE
            + variation * detail;

        // Clamped to [1, world_height - 1) so bedrock and one air layer always exist
        let height = (raw.round() as i32).clamp(1, self.world_height as i32 - 2);

        let params = self.biomes.params(biome);
        let surface = if height < self.sea_level {
            params.underwater_surface
        } else {
            params.surface
        };

        ColumnSample { height, biome, surface }
    }

    /// Generates the base terrain of a chunk (no features).
    ///
    /// # Errors
    ///
    /// Only if the chunk cannot be allocated at the configured height.
    pub fn generate_column(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
        let mut chunk = Chunk::new(coord, self.world_height)?;

        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let sample = self.sample_column(coord.world_x() + lx as i32, coord.world_z() + lz as i32);
                self.fill_column(&mut chunk, lx, lz, sample)?;
            }
        }

        Ok(chunk)
    }

    /// Fills one column bottom to top: bedrock, stone, subsurface,
    /// surface, then water up to sea level.
    fn fill_column(&self, chunk: &mut Chunk, lx: usize, lz: usize, sample: ColumnSample) -> WorldResult<()> {
        let params = self.biomes.params(sample.biome);
        let subsurface_top = sample.height;
        let stone_top = sample.height - i32::from(params.subsurface_depth);
        let water_top = self.sea_level.max(sample.height);

        for y in 0..=water_top {
            let id = if y == 0 {
                BlockId::BEDROCK
            } else if y < stone_top {
                BlockId::STONE
            } else if y < subsurface_top {
                params.subsurface
            } else if y == sample.height {
                sample.surface
            } else if y == self.sea_level && sample.biome.is_frozen() {
                BlockId::ICE
            } else {
                BlockId::WATER
            };
            let pos = LocalPos::new(lx as i32, y, lz as i32, self.world_height)?;
            chunk.set_generated(pos, id);
        }

        chunk.set_biome(lx, lz, sample.biome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(seed: u64) -> TerrainGenerator {
        TerrainGenerator::new(
            WorldSeed::new(seed),
            128,
            62,
            Arc::new(BlockRegistry::builtin()),
            Arc::new(BiomeRegistry::builtin()),
        )
        .unwrap()
    }

    #[test]
    fn test_column_determinism() {
        let a = generator(42).generate_column(ChunkCoord::new(5, 10)).unwrap();
        let b = generator(42).generate_column(ChunkCoord::new(5, 10)).unwrap();
        assert_eq!(a.blocks(), b.blocks());
        assert_eq!(a.height_map(), b.height_map());
    }

    #[test]
    fn test_order_independence() {
        let gen = generator(7);
        let first = gen.generate_column(ChunkCoord::new(1, 1)).unwrap();
        for x in -3..3 {
            let _ = gen.generate_column(ChunkCoord::new(x, -x)).unwrap();
        }
        let again = gen.generate_column(ChunkCoord::new(1, 1)).unwrap();
        assert_eq!(first.blocks(), again.blocks());
    }

    #[test]
    fn test_strata() {
        let gen = generator(42);
        let chunk = gen.generate_column(ChunkCoord::new(0, 0)).unwrap();

        for lz in 0..16 {
            for lx in 0..16 {
                assert_eq!(chunk.get_block(lx, 0, lz).unwrap(), BlockId::BEDROCK);
                let sample = gen.sample_column(lx, lz);
                assert_eq!(chunk.get_block(lx, sample.height, lz).unwrap(), sample.surface);
                assert!(chunk.get_block(lx, 127, lz).unwrap().is_air(), "Top layer is always air");
                if sample.height < 62 {
                    let top = chunk.get_block(lx, 62, lz).unwrap();
                    assert!(top == BlockId::WATER || top == BlockId::ICE);
                }
            }
        }
    }

    #[test]
    fn test_heights_clamped() {
        let gen = generator(99);
        for i in -200..200 {
            let sample = gen.sample_column(i * 37, i * -53);
            assert!((1..127).contains(&sample.height), "Height {} out of range", sample.height);
        }
    }

    #[test]
    fn test_blending_is_continuous() {
        let gen = generator(42);
        let mut worst = 0;
        for x in -500..500 {
            let a = gen.sample_column(x, 100).height;
            let b = gen.sample_column(x + 1, 100).height;
            worst = worst.max((a - b).abs());
        }
        assert!(worst <= 20, "Adjacent columns differ by {worst} blocks");
    }

    #[test]
    fn test_invalid_parameters() {
        let blocks = Arc::new(BlockRegistry::builtin());
        let biomes = Arc::new(BiomeRegistry::builtin());
        let seed = WorldSeed::new(1);
        assert!(TerrainGenerator::new(seed, 100, 62, blocks.clone(), biomes.clone()).is_err());
        assert!(TerrainGenerator::new(seed, 128, 200, blocks.clone(), biomes.clone()).is_err());
        assert!(TerrainGenerator::new(seed, 128, 0, blocks, biomes).is_err());
    }

    #[test]
    fn test_generate_with_seed_matches_instance() {
        let coord = ChunkCoord::new(-2, 3);
        let a = TerrainGenerator::generate_column_with_seed(42, coord).unwrap();
        let b = generator(42).generate_column(coord).unwrap();
        assert_eq!(a, b);
    }
}
