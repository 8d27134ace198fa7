//! # World Error Types
//!
//! All errors that can occur while generating, querying or persisting
//! the voxel world. Shared by every Terracraft crate so the UI and
//! physics collaborators only ever have to interpret one type.

use thiserror::Error;

use crate::block::{BlockEntityKind, BlockId};
use crate::chunk::ChunkCoord;

/// Errors that can occur in the world system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// Coordinate outside chunk or world extents (caller error, never retried).
    #[error("coordinate out of bounds: ({x}, {y}, {z})")]
    OutOfBounds {
        /// X coordinate as supplied by the caller.
        x: i32,
        /// Y coordinate as supplied by the caller.
        y: i32,
        /// Z coordinate as supplied by the caller.
        z: i32,
    },

    /// Query against a chunk that is not resident.
    #[error("chunk {0} is not loaded")]
    ChunkNotLoaded(ChunkCoord),

    /// Terrain or feature generation failed for a chunk.
    #[error("generation failed for chunk {coord}: {reason}")]
    GenerationFailure {
        /// The chunk being generated.
        coord: ChunkCoord,
        /// What went wrong.
        reason: String,
    },

    /// Reading or writing persisted edits failed.
    #[error("persistence failure: {reason}")]
    PersistenceFailure {
        /// What went wrong.
        reason: String,
    },

    /// Persisted or generated data violates a chunk invariant.
    #[error("chunk {coord} is corrupt: {reason}")]
    CorruptChunk {
        /// The affected chunk.
        coord: ChunkCoord,
        /// What invariant was violated.
        reason: String,
    },

    /// Block id not present in the block registry.
    #[error("unknown block id: {0}")]
    UnknownBlock(BlockId),

    /// Block entity payload does not belong to the block it is attached to.
    #[error("block {block} cannot hold a {entity:?} entity")]
    BlockEntityMismatch {
        /// The block at the position.
        block: BlockId,
        /// The entity kind that was supplied.
        entity: BlockEntityKind,
    },

    /// Block entity payload that cannot be stored.
    #[error("invalid {entity:?} entity: {reason}")]
    InvalidBlockEntity {
        /// Kind of the rejected payload.
        entity: BlockEntityKind,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid configuration or registry file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
