//! # TERRACRAFT Procedural Generation
//!
//! Deterministic world generation for infinite, reproducible worlds.
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: Same seed always produces the same world
//! 2. **Chunked**: World is generated in fixed-size 16x16 columns
//! 3. **Independent**: Any chunk can be generated without its neighbours
//! 4. **Pure**: No file I/O and no global state; the world crate owns both
//!
//! ## Core Components
//!
//! - `SimplexNoise`: 2D noise generation
//! - `BlockRegistry` / `BiomeRegistry`: Static property tables
//! - `TerrainGenerator`: Strata, water and biomes per column
//! - `FeatureGenerator`: Ore veins and trees with a 1-chunk halo
//! - `ChunkGenerator`: Terrain + features
//! - `Chunk`: Block storage with subchunk dirty tracking
//!
//! ## Example
//!
//! ```rust,ignore
//! use terracraft_procedural::{BlockId, ChunkCoord, ChunkGenerator};
//!
//! let generator = ChunkGenerator::with_seed(42)?;
//! let chunk = generator.generate(ChunkCoord::new(0, 0))?;
//!
//! assert_eq!(chunk.get_block(0, 0, 0)?, BlockId::BEDROCK);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod biome;
pub mod block;
pub mod chunk;
pub mod error;
pub mod features;
pub mod generator;
pub mod noise;
pub mod terrain;

pub use biome::{Biome, BiomeClassifier, BiomeParams, BiomeRegistry, Climate, TreeKind};
pub use block::{
    Block, BlockEntity, BlockEntityKind, BlockId, BlockProperties, BlockRegistry, BlockState, DropEntry, Facing,
    ItemStack, TextureLayers, CHEST_SLOTS, MAX_SIGN_LINE_BYTES, SIGN_LINES,
};
pub use chunk::{Chunk, ChunkCoord, LocalPos, CHUNK_SIZE, MAX_WORLD_HEIGHT, SUBCHUNK_HEIGHT};
pub use error::{WorldError, WorldResult};
pub use features::{FeatureGenerator, Halo};
pub use generator::ChunkGenerator;
pub use noise::{SimplexNoise, WorldSeed};
pub use terrain::{ColumnSample, TerrainGenerator};
