//! # Chunk System
//!
//! World data is organized into fixed-size columns for:
//! - Memory efficiency (only nearby chunks are resident)
//! - Independent generation (any chunk can be built from the seed alone)
//! - Incremental meshing (one dirty bit per 16-block subchunk)
//!
//! ## Chunk Format
//!
//! Chunks are 16 x 16 x `height` blocks, stored as a flat `Vec<BlockId>`
//! in `[y][z][x]` order so a subchunk is one contiguous slice. States and
//! block entities are sparse: most positions carry neither.

use std::collections::HashMap;
use std::fmt;

use crate::biome::Biome;
use crate::block::{Block, BlockEntity, BlockId, BlockState};
use crate::error::{WorldError, WorldResult};

/// Chunk width/depth in blocks.
pub const CHUNK_SIZE: usize = 16;

/// Height of one subchunk (the unit of mesh invalidation).
pub const SUBCHUNK_HEIGHT: usize = 16;

/// Largest supported world height (64 subchunks, one bit each).
pub const MAX_WORLD_HEIGHT: usize = 1024;

/// Blocks in one horizontal layer.
const LAYER: usize = CHUNK_SIZE * CHUNK_SIZE;

/// Chunk coordinate (identifies a chunk in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    /// X coordinate (in chunks, not blocks).
    pub x: i32,
    /// Z coordinate (in chunks, not blocks).
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Converts world block coordinates to chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn from_block_pos(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(CHUNK_SIZE as i32),
            z: block_z.div_euclid(CHUNK_SIZE as i32),
        }
    }

    /// Returns the world X coordinate of the chunk's origin (corner).
    #[inline]
    #[must_use]
    pub const fn world_x(self) -> i32 {
        self.x * CHUNK_SIZE as i32
    }

    /// Returns the world Z coordinate of the chunk's origin.
    #[inline]
    #[must_use]
    pub const fn world_z(self) -> i32 {
        self.z * CHUNK_SIZE as i32
    }

    /// Chebyshev (chessboard) distance in chunks.
    #[inline]
    #[must_use]
    pub const fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dz = self.z.abs_diff(other.z);
        if dx > dz {
            dx
        } else {
            dz
        }
    }

    /// Returns the coordinate offset by `(dx, dz)` chunks.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }

    /// The 3x3 neighbourhood centred on this chunk, sorted by `(x, z)`.
    #[must_use]
    pub fn halo(self) -> [Self; 9] {
        let mut out = [self; 9];
        let mut i = 0;
        for dx in -1..=1 {
            for dz in -1..=1 {
                out[i] = self.offset(dx, dz);
                i += 1;
            }
        }
        out
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// A validated position inside a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalPos {
    x: u8,
    y: u16,
    z: u8,
}

impl LocalPos {
    /// Validates local coordinates against a chunk height.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if x/z fall outside `[0, 16)` or y outside `[0, height)`.
    pub fn new(x: i32, y: i32, z: i32, height: usize) -> WorldResult<Self> {
        let size = CHUNK_SIZE as i32;
        if !(0..size).contains(&x) || !(0..size).contains(&z) || y < 0 || y as usize >= height {
            return Err(WorldError::OutOfBounds { x, y, z });
        }
        Ok(Self { x: x as u8, y: y as u16, z: z as u8 })
    }

    /// Splits a world block position into its chunk and local position.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` (with the world coordinates) if y is outside the world.
    pub fn from_world(wx: i32, y: i32, wz: i32, height: usize) -> WorldResult<(ChunkCoord, Self)> {
        let coord = ChunkCoord::from_block_pos(wx, wz);
        let size = CHUNK_SIZE as i32;
        Self::new(wx.rem_euclid(size), y, wz.rem_euclid(size), height)
            .map(|pos| (coord, pos))
            .map_err(|_| WorldError::OutOfBounds { x: wx, y, z: wz })
    }

    /// Local x, `0..16`.
    #[inline]
    #[must_use]
    pub const fn x(self) -> u8 {
        self.x
    }

    /// Height above the chunk floor.
    #[inline]
    #[must_use]
    pub const fn y(self) -> u16 {
        self.y
    }

    /// Local z, `0..16`.
    #[inline]
    #[must_use]
    pub const fn z(self) -> u8 {
        self.z
    }

    fn out_of_bounds(self) -> WorldError {
        WorldError::OutOfBounds { x: i32::from(self.x), y: i32::from(self.y), z: i32::from(self.z) }
    }

    /// Index of the subchunk containing this position.
    #[inline]
    #[must_use]
    pub const fn subchunk(self) -> usize {
        self.y as usize / SUBCHUNK_HEIGHT
    }

    #[inline]
    const fn index(self) -> usize {
        (self.y as usize * CHUNK_SIZE + self.z as usize) * CHUNK_SIZE + self.x as usize
    }

    #[inline]
    const fn column(self) -> usize {
        self.z as usize * CHUNK_SIZE + self.x as usize
    }
}

/// A 16 x 16 x `height` column of blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    coord: ChunkCoord,
    height: usize,
    /// Indexed as `(y * 16 + z) * 16 + x`.
    blocks: Vec<BlockId>,
    states: HashMap<LocalPos, BlockState>,
    entities: HashMap<LocalPos, BlockEntity>,
    /// Highest non-air y per column, indexed `[z][x]`.
    height_map: Vec<u16>,
    /// Biome per column, indexed `[z][x]`.
    biomes: Vec<Biome>,
    /// One bit per subchunk needing a mesh rebuild.
    dirty: u64,
    /// Holds player edits not yet persisted.
    edited: bool,
}

impl Chunk {
    /// Creates an all-air chunk. Every subchunk starts dirty.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `height` is not a multiple of 16 in `16..=1024`.
    pub fn new(coord: ChunkCoord, height: usize) -> WorldResult<Self> {
        validate_height(height)?;
        let mut chunk = Self {
            coord,
            height,
            blocks: vec![BlockId::AIR; LAYER * height],
            states: HashMap::new(),
            entities: HashMap::new(),
            height_map: vec![0; LAYER],
            biomes: vec![Biome::Plains; LAYER],
            dirty: 0,
            edited: false,
        };
        chunk.mark_all_dirty();
        Ok(chunk)
    }

    /// Chunk position in the world.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Height in blocks.
    #[inline]
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of 16-block subchunks.
    #[inline]
    #[must_use]
    pub const fn subchunk_count(&self) -> usize {
        self.height / SUBCHUNK_HEIGHT
    }

    /// Validates local coordinates for this chunk.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` for coordinates outside the chunk.
    #[inline]
    pub fn local(&self, x: i32, y: i32, z: i32) -> WorldResult<LocalPos> {
        LocalPos::new(x, y, z, self.height)
    }

    fn check(&self, pos: LocalPos) -> WorldResult<()> {
        let size = CHUNK_SIZE as u8;
        if pos.x >= size || pos.z >= size || usize::from(pos.y) >= self.height {
            return Err(pos.out_of_bounds());
        }
        Ok(())
    }

    fn column_index(x: usize, z: usize) -> WorldResult<usize> {
        if x >= CHUNK_SIZE || z >= CHUNK_SIZE {
            let clamp = |v: usize| i32::try_from(v).unwrap_or(i32::MAX);
            return Err(WorldError::OutOfBounds { x: clamp(x), y: 0, z: clamp(z) });
        }
        Ok(z * CHUNK_SIZE + x)
    }

    /// Gets a block at local coordinates.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` for coordinates outside the chunk.
    #[inline]
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> WorldResult<BlockId> {
        let pos = self.local(x, y, z)?;
        Ok(self.blocks[pos.index()])
    }

    /// Block at a validated position. Air if `pos` lies above this chunk.
    #[inline]
    #[must_use]
    pub fn block_at(&self, pos: LocalPos) -> BlockId {
        self.blocks.get(pos.index()).copied().unwrap_or(BlockId::AIR)
    }

    /// Sets a block, clearing any state and block entity at the position.
    ///
    /// Marks the containing subchunk dirty and the chunk edited.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` for coordinates outside the chunk.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> WorldResult<()> {
        self.set_block_with(x, y, z, Block::new(id), None)
    }

    /// Sets a block together with its state and block entity.
    ///
    /// The chunk does not consult the registry; callers that need the
    /// entity kind checked go through the world.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` for coordinates outside the chunk.
    pub fn set_block_with(
        &mut self,
        x: i32,
        y: i32,
        z: i32,
        block: Block,
        entity: Option<BlockEntity>,
    ) -> WorldResult<()> {
        let pos = self.local(x, y, z)?;
        self.write(pos, block, entity);
        self.edited = true;
        Ok(())
    }

    /// Applies persisted data without flagging the chunk as edited.
    ///
    /// Used when replaying stored edits over freshly generated terrain.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if `pos` lies outside this chunk.
    pub fn restore(&mut self, pos: LocalPos, block: Block, entity: Option<BlockEntity>) -> WorldResult<()> {
        self.check(pos)?;
        self.write(pos, block, entity);
        Ok(())
    }

    /// Generation-time write: no state, no edit flag, no dirty bit.
    #[inline]
    pub(crate) fn set_generated(&mut self, pos: LocalPos, id: BlockId) {
        self.blocks[pos.index()] = id;
        self.raise_height(pos, id);
    }

    /// Records the biome a column was generated with.
    pub(crate) fn set_biome(&mut self, x: usize, z: usize, biome: Biome) {
        self.biomes[z * CHUNK_SIZE + x] = biome;
    }

    fn write(&mut self, pos: LocalPos, block: Block, entity: Option<BlockEntity>) {
        let index = pos.index();
        let previous = self.blocks[index];
        self.blocks[index] = block.id;

        if block.state.is_default() {
            self.states.remove(&pos);
        } else {
            self.states.insert(pos, block.state);
        }

        match entity {
            Some(entity) => {
                self.entities.insert(pos, entity);
            }
            None => {
                self.entities.remove(&pos);
            }
        }

        if block.id.is_air() && !previous.is_air() {
            self.lower_height(pos);
        } else {
            self.raise_height(pos, block.id);
        }

        self.dirty |= 1 << pos.subchunk();
    }

    #[inline]
    fn raise_height(&mut self, pos: LocalPos, id: BlockId) {
        let column = pos.column();
        if !id.is_air() && pos.y > self.height_map[column] {
            self.height_map[column] = pos.y;
        }
    }

    fn lower_height(&mut self, pos: LocalPos) {
        let column = pos.column();
        if pos.y != self.height_map[column] {
            return;
        }
        let top = (0..pos.y)
            .rev()
            .find(|&y| !self.blocks[usize::from(y) * LAYER + column].is_air())
            .unwrap_or(0);
        self.height_map[column] = top;
    }

    /// State at a position ([`BlockState::DEFAULT`] if none stored).
    #[inline]
    #[must_use]
    pub fn get_state(&self, pos: LocalPos) -> BlockState {
        self.states.get(&pos).copied().unwrap_or_default()
    }

    /// Block id and state at a position.
    #[must_use]
    pub fn full_block(&self, pos: LocalPos) -> Block {
        Block::with_state(self.block_at(pos), self.get_state(pos))
    }

    /// Block entity at a position.
    #[inline]
    #[must_use]
    pub fn get_block_entity(&self, pos: LocalPos) -> Option<&BlockEntity> {
        self.entities.get(&pos)
    }

    /// Mutable block entity at a position. Flags the chunk edited.
    pub fn block_entity_mut(&mut self, pos: LocalPos) -> Option<&mut BlockEntity> {
        let entity = self.entities.get_mut(&pos)?;
        self.edited = true;
        Some(entity)
    }

    /// Replaces the block entity at a position, keeping the block.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if `pos` lies outside this chunk.
    pub fn set_block_entity(&mut self, pos: LocalPos, entity: BlockEntity) -> WorldResult<()> {
        self.check(pos)?;
        self.entities.insert(pos, entity);
        self.edited = true;
        Ok(())
    }

    /// Iterates over stored non-default states.
    pub fn states(&self) -> impl Iterator<Item = (LocalPos, BlockState)> + '_ {
        self.states.iter().map(|(pos, state)| (*pos, *state))
    }

    /// Iterates over stored block entities.
    pub fn block_entities(&self) -> impl Iterator<Item = (LocalPos, &BlockEntity)> {
        self.entities.iter().map(|(pos, entity)| (*pos, entity))
    }

    /// Highest non-air y in a column.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if x or z is 16 or more.
    #[inline]
    pub fn height_at(&self, x: usize, z: usize) -> WorldResult<u16> {
        Self::column_index(x, z).map(|i| self.height_map[i])
    }

    /// Biome of a column.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if x or z is 16 or more.
    #[inline]
    pub fn biome_at(&self, x: usize, z: usize) -> WorldResult<Biome> {
        Self::column_index(x, z).map(|i| self.biomes[i])
    }

    /// Height map, indexed `[z][x]`.
    #[must_use]
    pub fn height_map(&self) -> &[u16] {
        &self.height_map
    }

    /// Mesh-buildable block array, `[y][z][x]`.
    #[inline]
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Blocks of one subchunk (16 contiguous layers).
    #[must_use]
    pub fn subchunk(&self, index: usize) -> Option<&[BlockId]> {
        let start = index * SUBCHUNK_HEIGHT * LAYER;
        self.blocks.get(start..start + SUBCHUNK_HEIGHT * LAYER)
    }

    /// Raw little-endian bytes of the block array.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }

    /// Indices of subchunks needing a mesh rebuild, ascending.
    pub fn dirty_subchunks(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.subchunk_count()).filter(move |i| self.dirty & (1 << i) != 0)
    }

    /// Returns and clears the dirty subchunk indices.
    pub fn take_dirty_subchunks(&mut self) -> Vec<usize> {
        let dirty: Vec<usize> = self.dirty_subchunks().collect();
        self.dirty = 0;
        dirty
    }

    /// Flags every subchunk for a mesh rebuild.
    pub fn mark_all_dirty(&mut self) {
        let count = self.subchunk_count();
        self.dirty = if count >= 64 { u64::MAX } else { (1u64 << count) - 1 };
    }

    /// True if the chunk holds edits that are not yet persisted.
    #[inline]
    #[must_use]
    pub const fn is_edited(&self) -> bool {
        self.edited
    }

    /// Clears the edited flag after persistence.
    pub fn clear_edited(&mut self) {
        self.edited = false;
    }
}

/// Checks a world height.
///
/// # Errors
///
/// `InvalidConfig` unless `height` is a multiple of 16 in `16..=1024`.
pub fn validate_height(height: usize) -> WorldResult<()> {
    if height == 0 || height % SUBCHUNK_HEIGHT != 0 || height > MAX_WORLD_HEIGHT {
        return Err(WorldError::InvalidConfig(format!(
            "world height {height} must be a multiple of {SUBCHUNK_HEIGHT} between {SUBCHUNK_HEIGHT} and {MAX_WORLD_HEIGHT}"
        )));
    }
    Ok(())
}
