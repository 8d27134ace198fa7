//! # TERRACRAFT World
//!
//! Stateful runtime around the pure generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          World                            │
//! │  update(x, z) ─▶ evict ─▶ request ─▶ commit ─▶ autosave   │
//! └───────┬───────────────────────┬──────────────────────────┘
//!         │                       │
//!   GenerationPool           DataStore ──▶ ChunkStore
//!   (worker threads)         (edit logs)   (files / memory)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use terracraft_world::{World, WorldConfig};
//!
//! let mut world = World::new(WorldConfig::test())?;
//! world.update(8.0, 8.0);
//! world.set_block(3, 70, 3, BlockId::STONE)?;
//! world.flush()?;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod datastore;
pub mod generation;
mod record;
pub mod world;

pub use config::WorldConfig;
pub use datastore::{ChunkStore, DataStore, Edit, FileStore, MemoryStore};
pub use generation::{ChunkSource, GenerationPool, GenerationResult};
pub use world::{BlockQuery, ChunkState, DirtySubchunk, World, WorldStats};

pub use terracraft_procedural::{
    Block, BlockEntity, BlockEntityKind, BlockId, BlockState, Chunk, ChunkCoord, LocalPos, WorldError, WorldResult,
};
