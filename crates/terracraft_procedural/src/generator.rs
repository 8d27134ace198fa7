//! Complete chunk generation: terrain, then features.

use std::sync::Arc;

use tracing::debug;

use crate::biome::BiomeRegistry;
use crate::block::BlockRegistry;
use crate::chunk::{Chunk, ChunkCoord};
use crate::error::WorldResult;
use crate::features::{FeatureGenerator, Halo};
use crate::noise::WorldSeed;
use crate::terrain::TerrainGenerator;

/// Chunk generator using procedural noise.
///
/// `generate` is a pure function of `(seed, coord)`: it can run on any
/// thread, in any order, and always yields the same chunk.
pub struct ChunkGenerator {
    terrain: TerrainGenerator,
    features: FeatureGenerator,
}

impl ChunkGenerator {
    /// Creates a new chunk generator.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the dimensions or registries are unusable.
    pub fn new(
        seed: WorldSeed,
        world_height: usize,
        sea_level: i32,
        blocks: Arc<BlockRegistry>,
        biomes: Arc<BiomeRegistry>,
    ) -> WorldResult<Self> {
        Ok(Self {
            terrain: TerrainGenerator::new(seed, world_height, sea_level, blocks, biomes)?,
            features: FeatureGenerator::new(seed),
        })
    }

    /// Generator with built-in registries and default dimensions.
    ///
    /// # Errors
    ///
    /// None in practice; the defaults are valid.
    pub fn with_seed(seed: u64) -> WorldResult<Self> {
        Self::new(
            WorldSeed::new(seed),
            TerrainGenerator::DEFAULT_HEIGHT,
            TerrainGenerator::DEFAULT_SEA_LEVEL,
            Arc::new(BlockRegistry::builtin()),
            Arc::new(BiomeRegistry::builtin()),
        )
    }

    /// Generates a chunk at the given coordinates.
    ///
    /// # Errors
    ///
    /// `GenerationFailure` if feature placement breaks its halo contract.
    pub fn generate(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
        let mut chunk = self.terrain.generate_column(coord)?;
        self.features.apply(&mut chunk, &Halo::new(&self.terrain, coord))?;
        chunk.mark_all_dirty();
        debug!(chunk = %coord, "Generated chunk");
        Ok(chunk)
    }

    /// Underlying terrain generator.
    #[must_use]
    pub const fn terrain(&self) -> &TerrainGenerator {
        &self.terrain
    }

    /// World seed.
    #[must_use]
    pub const fn seed(&self) -> WorldSeed {
        self.terrain.seed()
    }

    /// World height in blocks.
    #[must_use]
    pub const fn world_height(&self) -> usize {
        self.terrain.world_height()
    }

    /// Block registry.
    #[must_use]
    pub fn blocks(&self) -> &Arc<BlockRegistry> {
        self.terrain.blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;

    #[test]
    fn test_chunk_generation_determinism() {
        let gen1 = ChunkGenerator::with_seed(42).unwrap();
        let gen2 = ChunkGenerator::with_seed(42).unwrap();

        let coord = ChunkCoord::new(5, 10);
        assert_eq!(gen1.generate(coord).unwrap(), gen2.generate(coord).unwrap());
    }

    #[test]
    fn test_chunk_has_terrain() {
        let gen = ChunkGenerator::with_seed(42).unwrap();
        let chunk = gen.generate(ChunkCoord::new(0, 0)).unwrap();

        assert_eq!(chunk.get_block(0, 0, 0).unwrap(), BlockId::BEDROCK);
        let solid = chunk.blocks().iter().filter(|b| !b.is_air()).count();
        assert!(solid > 16 * 16 * 10, "Chunk should have solid blocks, got {solid}");
        assert!(!chunk.is_edited(), "Generated chunks carry no edits");
        assert_eq!(chunk.dirty_subchunks().count(), chunk.subchunk_count());
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = ChunkGenerator::with_seed(1).unwrap().generate(ChunkCoord::new(0, 0)).unwrap();
        let b = ChunkGenerator::with_seed(2).unwrap().generate(ChunkCoord::new(0, 0)).unwrap();
        assert_ne!(a.blocks(), b.blocks());
    }
}
