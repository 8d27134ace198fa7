//! # Blocks
//!
//! Block identifiers, packed per-position state, block entities and the
//! registry that maps every id to its static properties.
//!
//! The registry is built once at startup (built-ins plus optional TOML
//! overrides) and shared immutably behind an `Arc` afterwards.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::Deserialize;

use crate::error::{WorldError, WorldResult};

/// Block type identifier. `0` is air, the universal empty sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct BlockId(pub u16);

impl BlockId {
    /// Air (empty).
    pub const AIR: Self = Self(0);
    /// Stone.
    pub const STONE: Self = Self(1);
    /// Dirt.
    pub const DIRT: Self = Self(2);
    /// Grass-covered dirt.
    pub const GRASS: Self = Self(3);
    /// Sand.
    pub const SAND: Self = Self(4);
    /// Gravel.
    pub const GRAVEL: Self = Self(5);
    /// Still water.
    pub const WATER: Self = Self(6);
    /// Unbreakable floor.
    pub const BEDROCK: Self = Self(7);
    /// Oak log.
    pub const WOOD: Self = Self(8);
    /// Oak leaves.
    pub const LEAVES: Self = Self(9);
    /// Snow block.
    pub const SNOW: Self = Self(10);
    /// Coal ore.
    pub const COAL_ORE: Self = Self(11);
    /// Iron ore.
    pub const IRON_ORE: Self = Self(12);
    /// Gold ore.
    pub const GOLD_ORE: Self = Self(13);
    /// Wooden planks.
    pub const PLANKS: Self = Self(14);
    /// Cobblestone.
    pub const COBBLESTONE: Self = Self(15);
    /// Furnace (holds a furnace entity).
    pub const FURNACE: Self = Self(16);
    /// Chest (holds a chest entity).
    pub const CHEST: Self = Self(17);
    /// Sandstone.
    pub const SANDSTONE: Self = Self(18);
    /// Cactus.
    pub const CACTUS: Self = Self(19);
    /// Spruce log.
    pub const SPRUCE_WOOD: Self = Self(20);
    /// Spruce needles.
    pub const SPRUCE_LEAVES: Self = Self(21);
    /// Ice.
    pub const ICE: Self = Self(22);
    /// Standing sign (holds a sign entity).
    pub const SIGN: Self = Self(23);

    /// Returns true if this is air.
    #[inline]
    #[must_use]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }

    /// Raw numeric id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Horizontal or vertical orientation stored in the low bits of a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Facing {
    /// -Z
    North = 0,
    /// +Z
    South = 1,
    /// +X
    East = 2,
    /// -X
    West = 3,
    /// +Y
    Up = 4,
    /// -Y
    Down = 5,
}

impl Facing {
    const fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0 => Some(Self::North),
            1 => Some(Self::South),
            2 => Some(Self::East),
            3 => Some(Self::West),
            4 => Some(Self::Up),
            5 => Some(Self::Down),
            _ => None,
        }
    }
}

/// Packed per-position block state.
///
/// Bits 0..3 hold the [`Facing`], bits 3..7 the growth stage (0-15).
/// The remaining bits are reserved and preserved verbatim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockState(u16);

impl BlockState {
    /// Default state. Never stored in a chunk's sparse state map.
    pub const DEFAULT: Self = Self(0);

    const FACING_MASK: u16 = 0b111;
    const GROWTH_SHIFT: u16 = 3;
    const GROWTH_MASK: u16 = 0b1111 << Self::GROWTH_SHIFT;

    /// Maximum growth stage.
    pub const MAX_GROWTH: u8 = 15;

    /// Wraps a raw packed value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw packed value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns true for the default state.
    #[inline]
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    /// Orientation, or `None` if the facing bits hold an unused value.
    #[must_use]
    pub const fn facing(self) -> Option<Facing> {
        Facing::from_bits(self.0 & Self::FACING_MASK)
    }

    /// Returns a copy with the given orientation.
    #[must_use]
    pub const fn with_facing(self, facing: Facing) -> Self {
        Self((self.0 & !Self::FACING_MASK) | facing as u16)
    }

    /// Growth stage (0-15).
    #[must_use]
    pub const fn growth_stage(self) -> u8 {
        ((self.0 & Self::GROWTH_MASK) >> Self::GROWTH_SHIFT) as u8
    }

    /// Returns a copy with the given growth stage, saturating at [`Self::MAX_GROWTH`].
    #[must_use]
    pub const fn with_growth_stage(self, stage: u8) -> Self {
        let stage = if stage > Self::MAX_GROWTH { Self::MAX_GROWTH } else { stage };
        Self((self.0 & !Self::GROWTH_MASK) | ((stage as u16) << Self::GROWTH_SHIFT))
    }
}

/// A block id with its per-position state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Block {
    /// Block type.
    pub id: BlockId,
    /// Packed state.
    pub state: BlockState,
}

impl Block {
    /// Air with default state.
    pub const AIR: Self = Self::new(BlockId::AIR);

    /// Block with default state.
    #[inline]
    #[must_use]
    pub const fn new(id: BlockId) -> Self {
        Self { id, state: BlockState::DEFAULT }
    }

    /// Block with an explicit state.
    #[inline]
    #[must_use]
    pub const fn with_state(id: BlockId, state: BlockState) -> Self {
        Self { id, state }
    }
}

impl From<BlockId> for Block {
    fn from(id: BlockId) -> Self {
        Self::new(id)
    }
}

/// A stack of items, as held in containers and produced by drops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemStack {
    /// Item type (items share the block id space).
    pub item: BlockId,
    /// Number of items, at least 1.
    pub count: u8,
}

impl ItemStack {
    /// Creates a stack.
    #[must_use]
    pub const fn new(item: BlockId, count: u8) -> Self {
        Self { item, count }
    }
}

/// Which block entity a block type carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockEntityKind {
    /// Smelting state.
    Furnace,
    /// Item storage.
    Chest,
    /// Four lines of text.
    Sign,
}

/// Number of slots in a chest.
pub const CHEST_SLOTS: usize = 27;

/// Lines of text on a sign.
pub const SIGN_LINES: usize = 4;

/// Longest sign line, in UTF-8 bytes.
pub const MAX_SIGN_LINE_BYTES: usize = u16::MAX as usize;

/// Extra per-position data for blocks that need more than a state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockEntity {
    /// Furnace contents and progress.
    Furnace {
        /// Item being smelted.
        input: Option<ItemStack>,
        /// Fuel item.
        fuel: Option<ItemStack>,
        /// Smelted output.
        output: Option<ItemStack>,
        /// Remaining burn time of the current fuel item.
        burn_ticks: u16,
        /// Progress of the current smelt.
        cook_progress: u16,
    },
    /// Chest contents, always [`CHEST_SLOTS`] long.
    Chest {
        /// Slot contents.
        slots: Vec<Option<ItemStack>>,
    },
    /// Sign text.
    Sign {
        /// Text lines.
        lines: [String; SIGN_LINES],
    },
}

impl BlockEntity {
    /// Empty entity of the given kind.
    #[must_use]
    pub fn empty(kind: BlockEntityKind) -> Self {
        match kind {
            BlockEntityKind::Furnace => Self::Furnace {
                input: None,
                fuel: None,
                output: None,
                burn_ticks: 0,
                cook_progress: 0,
            },
            BlockEntityKind::Chest => Self::Chest { slots: vec![None; CHEST_SLOTS] },
            BlockEntityKind::Sign => Self::Sign { lines: Default::default() },
        }
    }

    /// The kind tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> BlockEntityKind {
        match self {
            Self::Furnace { .. } => BlockEntityKind::Furnace,
            Self::Chest { .. } => BlockEntityKind::Chest,
            Self::Sign { .. } => BlockEntityKind::Sign,
        }
    }

    /// Checks the payload against the shape every stored entity must have.
    ///
    /// # Errors
    ///
    /// `InvalidBlockEntity` for a chest without exactly [`CHEST_SLOTS`]
    /// slots, an item stack of zero items, or a sign line longer than
    /// [`MAX_SIGN_LINE_BYTES`].
    pub fn validate(&self) -> WorldResult<()> {
        let invalid = |reason: String| Err(WorldError::InvalidBlockEntity { entity: self.kind(), reason });
        let empty_stack = |stack: &Option<ItemStack>| stack.map_or(false, |stack| stack.count == 0);

        match self {
            Self::Furnace { input, fuel, output, .. } => {
                if [input, fuel, output].into_iter().any(empty_stack) {
                    return invalid("empty item stack".into());
                }
            }
            Self::Chest { slots } => {
                if slots.len() != CHEST_SLOTS {
                    return invalid(format!("{} slots, expected {CHEST_SLOTS}", slots.len()));
                }
                if let Some(slot) = slots.iter().position(empty_stack) {
                    return invalid(format!("empty item stack in slot {slot}"));
                }
            }
            Self::Sign { lines } => {
                if let Some((i, line)) = lines.iter().enumerate().find(|(_, line)| line.len() > MAX_SIGN_LINE_BYTES) {
                    return invalid(format!("line {i} is {} bytes, limit {MAX_SIGN_LINE_BYTES}", line.len()));
                }
            }
        }
        Ok(())
    }
}

/// Texture indices for the faces of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TextureLayers {
    /// +Y face.
    pub top: u16,
    /// Horizontal faces.
    pub side: u16,
    /// -Y face.
    pub bottom: u16,
}

impl TextureLayers {
    /// Same texture on every face.
    #[must_use]
    pub const fn uniform(index: u16) -> Self {
        Self { top: index, side: index, bottom: index }
    }
}

/// Chance value meaning "always".
pub const ALWAYS: u16 = 10_000;

const fn always() -> u16 {
    ALWAYS
}

/// One entry in a drop table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct DropEntry {
    /// Dropped item.
    pub item: BlockId,
    /// Minimum count.
    pub min: u8,
    /// Maximum count (inclusive).
    pub max: u8,
    /// Chance in basis points (10 000 = always).
    #[serde(rename = "chance", default = "always")]
    pub chance_bp: u16,
}

/// Static properties of a block type.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BlockProperties {
    /// Block id.
    pub id: BlockId,
    /// Unique lowercase name.
    pub name: String,
    /// Collides with entities.
    #[serde(default = "default_true")]
    pub solid: bool,
    /// Light and neighbouring faces show through.
    #[serde(default)]
    pub transparent: bool,
    /// Seconds to break by hand. Negative means unbreakable.
    #[serde(default = "default_hardness")]
    pub hardness: f32,
    /// Texture per face.
    #[serde(default)]
    pub textures: TextureLayers,
    /// Items produced when broken.
    #[serde(default)]
    pub drops: Vec<DropEntry>,
    /// Block entity carried by this block, if any.
    #[serde(default)]
    pub entity: Option<BlockEntityKind>,
}

const fn default_true() -> bool {
    true
}

const fn default_hardness() -> f32 {
    1.0
}

impl BlockProperties {
    fn simple(id: BlockId, name: &str, hardness: f32, texture: u16) -> Self {
        Self {
            id,
            name: name.to_owned(),
            solid: true,
            transparent: false,
            hardness,
            textures: TextureLayers::uniform(texture),
            drops: vec![DropEntry { item: id, min: 1, max: 1, chance_bp: ALWAYS }],
            entity: None,
        }
    }

    fn drops(mut self, drops: Vec<DropEntry>) -> Self {
        self.drops = drops;
        self
    }

    fn see_through(mut self) -> Self {
        self.transparent = true;
        self
    }

    fn non_solid(mut self) -> Self {
        self.solid = false;
        self
    }

    fn textures(mut self, top: u16, side: u16, bottom: u16) -> Self {
        self.textures = TextureLayers { top, side, bottom };
        self
    }

    fn entity(mut self, kind: BlockEntityKind) -> Self {
        self.entity = Some(kind);
        self
    }

    /// Evaluates the drop table against a caller-supplied roll.
    ///
    /// The same roll always yields the same drops, so the caller owns
    /// randomness (and can replay it).
    #[must_use]
    pub fn roll_drops(&self, roll: u32) -> Vec<ItemStack> {
        self.drops
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let r = mix32(roll ^ (index as u32).wrapping_mul(0x9E37_79B9));
                if (r % u32::from(ALWAYS)) >= u32::from(entry.chance_bp) {
                    return None;
                }
                let span = u32::from(entry.max.saturating_sub(entry.min)) + 1;
                let count = entry.min + ((r >> 16) % span) as u8;
                (count > 0).then_some(ItemStack::new(entry.item, count))
            })
            .collect()
    }
}

/// 32-bit avalanche so adjacent rolls do not produce correlated drops.
const fn mix32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7FEB_352D);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846C_A68B);
    x ^ (x >> 16)
}

#[derive(Deserialize)]
struct BlockFile {
    #[serde(default)]
    block: Vec<BlockProperties>,
}

/// Lookup table from [`BlockId`] to [`BlockProperties`].
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    /// Indexed by raw id.
    entries: Vec<Option<BlockProperties>>,
}

impl BlockRegistry {
    /// Registry containing every built-in block.
    #[must_use]
    pub fn builtin() -> Self {
        use BlockEntityKind as K;
        use BlockProperties as P;

        let drop = |item: BlockId, min: u8, max: u8, chance_bp: u16| DropEntry { item, min, max, chance_bp };

        let blocks = vec![
            P::simple(BlockId::AIR, "air", 0.0, 0).non_solid().see_through().drops(Vec::new()),
            P::simple(BlockId::STONE, "stone", 1.5, 1).drops(vec![drop(BlockId::COBBLESTONE, 1, 1, ALWAYS)]),
            P::simple(BlockId::DIRT, "dirt", 0.5, 2),
            P::simple(BlockId::GRASS, "grass", 0.6, 2)
                .textures(3, 4, 2)
                .drops(vec![drop(BlockId::DIRT, 1, 1, ALWAYS)]),
            P::simple(BlockId::SAND, "sand", 0.5, 5),
            P::simple(BlockId::GRAVEL, "gravel", 0.6, 6),
            P::simple(BlockId::WATER, "water", -1.0, 7).non_solid().see_through().drops(Vec::new()),
            P::simple(BlockId::BEDROCK, "bedrock", -1.0, 8).drops(Vec::new()),
            P::simple(BlockId::WOOD, "oak_log", 2.0, 10).textures(9, 10, 9),
            P::simple(BlockId::LEAVES, "oak_leaves", 0.2, 11)
                .see_through()
                .drops(vec![drop(BlockId::LEAVES, 1, 1, 500)]),
            P::simple(BlockId::SNOW, "snow", 0.2, 12),
            P::simple(BlockId::COAL_ORE, "coal_ore", 3.0, 13),
            P::simple(BlockId::IRON_ORE, "iron_ore", 3.0, 14),
            P::simple(BlockId::GOLD_ORE, "gold_ore", 3.0, 15),
            P::simple(BlockId::PLANKS, "planks", 2.0, 16),
            P::simple(BlockId::COBBLESTONE, "cobblestone", 2.0, 17),
            P::simple(BlockId::FURNACE, "furnace", 3.5, 18).textures(17, 18, 17).entity(K::Furnace),
            P::simple(BlockId::CHEST, "chest", 2.5, 19).see_through().entity(K::Chest),
            P::simple(BlockId::SANDSTONE, "sandstone", 0.8, 20).textures(20, 21, 22),
            P::simple(BlockId::CACTUS, "cactus", 0.4, 24).textures(23, 24, 25).see_through(),
            P::simple(BlockId::SPRUCE_WOOD, "spruce_log", 2.0, 27).textures(26, 27, 26),
            P::simple(BlockId::SPRUCE_LEAVES, "spruce_leaves", 0.2, 28)
                .see_through()
                .drops(vec![drop(BlockId::SPRUCE_LEAVES, 1, 1, 500)]),
            P::simple(BlockId::ICE, "ice", 0.5, 29).see_through().drops(Vec::new()),
            P::simple(BlockId::SIGN, "sign", 1.0, 16).non_solid().see_through().entity(K::Sign),
        ];

        let mut registry = Self { entries: Vec::new() };
        for block in blocks {
            registry.insert(block);
        }
        registry
    }

    /// Built-ins plus the `[[block]]` entries of a TOML document.
    ///
    /// An entry whose id already exists replaces the built-in.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML, an attempt to redefine air, a
    /// duplicate name, a bad drop entry or a drop of an unknown item.
    pub fn from_toml_str(source: &str) -> WorldResult<Self> {
        let file: BlockFile =
            toml::from_str(source).map_err(|e| WorldError::InvalidConfig(format!("block registry: {e}")))?;

        let mut registry = Self::builtin();
        for block in file.block {
            if block.id.is_air() {
                return Err(WorldError::InvalidConfig("block id 0 is reserved for air".into()));
            }
            if let Some(existing) = registry.by_name(&block.name) {
                if existing.id != block.id {
                    return Err(WorldError::InvalidConfig(format!(
                        "block name '{}' used by {} and {}",
                        block.name, existing.id, block.id
                    )));
                }
            }
            registry.insert(block);
        }

        registry.validate()?;
        Ok(registry)
    }

    fn insert(&mut self, properties: BlockProperties) {
        let index = usize::from(properties.id.0);
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(properties);
    }

    fn validate(&self) -> WorldResult<()> {
        for block in self.iter() {
            for entry in &block.drops {
                if entry.min > entry.max || entry.chance_bp > ALWAYS {
                    return Err(WorldError::InvalidConfig(format!("bad drop entry on block '{}'", block.name)));
                }
                if !self.contains(entry.item) {
                    return Err(WorldError::InvalidConfig(format!(
                        "block '{}' drops unknown item {}",
                        block.name, entry.item
                    )));
                }
            }
        }
        Ok(())
    }

    /// Properties of a block, if registered.
    #[inline]
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&BlockProperties> {
        self.entries.get(usize::from(id.0)).and_then(Option::as_ref)
    }

    /// Properties of a block.
    ///
    /// # Errors
    ///
    /// `UnknownBlock` if the id is not registered.
    pub fn require(&self, id: BlockId) -> WorldResult<&BlockProperties> {
        self.get(id).ok_or(WorldError::UnknownBlock(id))
    }

    /// True if the id is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    /// Solidity of a block. Unknown ids are not solid.
    #[inline]
    #[must_use]
    pub fn is_solid(&self, id: BlockId) -> bool {
        self.get(id).is_some_and(|p| p.solid)
    }

    /// Looks a block up by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&BlockProperties> {
        self.iter().find(|p| p.name == name)
    }

    /// Iterates over registered blocks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &BlockProperties> {
        self.entries.iter().filter_map(Option::as_ref)
    }

    /// Number of registered blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
