//! # Biome Classification
//!
//! Determines terrain type from noise values, and holds the per-biome
//! terrain parameters the generators read.
//!
//! Uses a climate model based on:
//! - Temperature (noise, cooled by elevation)
//! - Humidity (from a separate noise channel)
//! - Elevation (continental noise with a ridged mountain component)

use serde::Deserialize;

use crate::block::{BlockId, BlockRegistry};
use crate::error::{WorldError, WorldResult};
use crate::noise::{SimplexNoise, WorldSeed};

/// Biome types in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Biome {
    /// Open water
    Ocean = 0,
    /// Coastline
    Beach = 1,
    /// Grassland
    Plains = 2,
    /// Oak forest
    Forest = 3,
    /// Arid sand with cacti
    Desert = 4,
    /// Cold spruce forest
    Taiga = 5,
    /// High rocky terrain
    Mountains = 6,
    /// Frozen flatland
    SnowyTundra = 7,
    /// Wetland
    Swamp = 8,
}

impl Biome {
    /// Every biome, in discriminant order.
    pub const ALL: [Self; 9] = [
        Self::Ocean,
        Self::Beach,
        Self::Plains,
        Self::Forest,
        Self::Desert,
        Self::Taiga,
        Self::Mountains,
        Self::SnowyTundra,
        Self::Swamp,
    ];

    /// Converts from u8. Unknown values map to `Plains`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ocean,
            1 => Self::Beach,
            3 => Self::Forest,
            4 => Self::Desert,
            5 => Self::Taiga,
            6 => Self::Mountains,
            7 => Self::SnowyTundra,
            8 => Self::Swamp,
            _ => Self::Plains,
        }
    }

    /// Returns true for biomes whose water surface freezes.
    #[must_use]
    pub const fn is_frozen(self) -> bool {
        matches!(self, Self::SnowyTundra)
    }
}

/// Tree species a biome grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// No trees.
    None,
    /// Oak: 4-6 trunk, round canopy.
    Oak,
    /// Spruce: 6-8 trunk, conical canopy.
    Spruce,
    /// Cactus: 1-3 tall, on sand.
    Cactus,
}

/// Terrain parameters of a biome.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiomeParams {
    /// Surface offset from sea level, in blocks.
    pub base_height: f64,
    /// Amplitude of the detail noise, in blocks.
    pub height_variation: f64,
    /// Octave persistence of the detail noise (0..1, higher = rougher).
    pub roughness: f64,
    /// Top block above sea level.
    pub surface: BlockId,
    /// Blocks under the surface.
    pub subsurface: BlockId,
    /// Layers of subsurface block before stone.
    pub subsurface_depth: u8,
    /// Top block when the column is below sea level.
    pub underwater_surface: BlockId,
    /// Tree attempts per chunk.
    pub tree_density: u8,
    /// Tree species.
    pub tree_kind: TreeKind,
    /// Scale applied to ore vein attempts.
    pub ore_multiplier: f64,
}

impl BiomeParams {
    #[allow(clippy::too_many_arguments)]
    const fn new(
        base_height: f64,
        height_variation: f64,
        roughness: f64,
        surface: BlockId,
        subsurface: BlockId,
        subsurface_depth: u8,
        underwater_surface: BlockId,
        tree_density: u8,
        tree_kind: TreeKind,
        ore_multiplier: f64,
    ) -> Self {
        Self {
            base_height,
            height_variation,
            roughness,
            surface,
            subsurface,
            subsurface_depth,
            underwater_surface,
            tree_density,
            tree_kind,
            ore_multiplier,
        }
    }
}

/// Partial parameters read from TOML, merged over the built-ins.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BiomeOverride {
    biome: Biome,
    base_height: Option<f64>,
    height_variation: Option<f64>,
    roughness: Option<f64>,
    surface: Option<BlockId>,
    subsurface: Option<BlockId>,
    subsurface_depth: Option<u8>,
    underwater_surface: Option<BlockId>,
    tree_density: Option<u8>,
    tree_kind: Option<TreeKind>,
    ore_multiplier: Option<f64>,
}

impl BiomeOverride {
    fn apply(self, params: &mut BiomeParams) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field { params.$field = value; })*
            };
        }
        merge!(
            base_height,
            height_variation,
            roughness,
            surface,
            subsurface,
            subsurface_depth,
            underwater_surface,
            tree_density,
            tree_kind,
            ore_multiplier
        );
    }
}

#[derive(Deserialize)]
struct BiomeFile {
    #[serde(default)]
    biome: Vec<BiomeOverride>,
}

/// Lookup table from [`Biome`] to [`BiomeParams`].
#[derive(Clone, Debug, PartialEq)]
pub struct BiomeRegistry {
    params: [BiomeParams; 9],
}

impl BiomeRegistry {
    /// Registry with the built-in parameters.
    #[must_use]
    pub fn builtin() -> Self {
        use BlockId as B;
        use TreeKind as T;

        Self {
            params: [
                BiomeParams::new(-16.0, 6.0, 0.40, B::SAND, B::SAND, 3, B::GRAVEL, 0, T::None, 1.0),
                BiomeParams::new(0.0, 2.0, 0.30, B::SAND, B::SAND, 4, B::SAND, 0, T::None, 1.0),
                BiomeParams::new(4.0, 4.0, 0.45, B::GRASS, B::DIRT, 3, B::DIRT, 1, T::Oak, 1.0),
                BiomeParams::new(6.0, 8.0, 0.50, B::GRASS, B::DIRT, 3, B::DIRT, 8, T::Oak, 1.0),
                BiomeParams::new(5.0, 5.0, 0.40, B::SAND, B::SANDSTONE, 4, B::SAND, 2, T::Cactus, 0.8),
                BiomeParams::new(8.0, 10.0, 0.50, B::GRASS, B::DIRT, 3, B::DIRT, 6, T::Spruce, 1.0),
                BiomeParams::new(20.0, 30.0, 0.60, B::STONE, B::STONE, 1, B::GRAVEL, 0, T::None, 1.5),
                BiomeParams::new(5.0, 4.0, 0.40, B::SNOW, B::DIRT, 3, B::DIRT, 1, T::Spruce, 1.0),
                BiomeParams::new(1.0, 2.0, 0.35, B::GRASS, B::DIRT, 3, B::DIRT, 3, T::Oak, 1.0),
            ],
        }
    }

    /// Built-ins merged with `[[biome]]` entries of a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML or out-of-range parameters.
    pub fn from_toml_str(source: &str) -> WorldResult<Self> {
        let file: BiomeFile =
            toml::from_str(source).map_err(|e| WorldError::InvalidConfig(format!("biome registry: {e}")))?;

        let mut registry = Self::builtin();
        for entry in file.biome {
            let slot = &mut registry.params[entry.biome as usize];
            entry.apply(slot);
        }

        for biome in Biome::ALL {
            let params = registry.params(biome);
            if params.height_variation < 0.0
                || !(0.0..=1.0).contains(&params.roughness)
                || params.ore_multiplier < 0.0
            {
                return Err(WorldError::InvalidConfig(format!("biome {biome:?} has out-of-range parameters")));
            }
        }
        Ok(registry)
    }

    /// Parameters of a biome.
    #[inline]
    #[must_use]
    pub fn params(&self, biome: Biome) -> &BiomeParams {
        &self.params[biome as usize]
    }

    /// Checks that every block the biomes place is registered.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first biome with an unknown block.
    pub fn validate(&self, blocks: &BlockRegistry) -> WorldResult<()> {
        for biome in Biome::ALL {
            let params = self.params(biome);
            for id in [params.surface, params.subsurface, params.underwater_surface] {
                if !blocks.contains(id) {
                    return Err(WorldError::InvalidConfig(format!("biome {biome:?} uses unknown block {id}")));
                }
            }
        }
        Ok(())
    }
}

impl Default for BiomeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Climate values at one column, each roughly in [-1, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Climate {
    /// Continental elevation.
    pub elevation: f64,
    /// Temperature after elevation cooling.
    pub temperature: f64,
    /// Humidity.
    pub humidity: f64,
}

/// Biome classifier that determines biome from world coordinates.
///
/// Uses multiple noise channels to simulate climate.
pub struct BiomeClassifier {
    temperature_noise: SimplexNoise,
    humidity_noise: SimplexNoise,
    elevation_noise: SimplexNoise,
}

impl BiomeClassifier {
    /// Scale for temperature noise (larger = more gradual changes).
    const TEMPERATURE_SCALE: f64 = 0.002;
    /// Scale for humidity noise.
    const HUMIDITY_SCALE: f64 = 0.003;
    /// Scale for elevation noise.
    const ELEVATION_SCALE: f64 = 0.0025;

    /// Creates a new biome classifier from a world seed.
    #[must_use]
    pub fn new(seed: WorldSeed) -> Self {
        Self {
            temperature_noise: SimplexNoise::new(seed.derive(1)),
            humidity_noise: SimplexNoise::new(seed.derive(2)),
            elevation_noise: SimplexNoise::new(seed.derive(3)),
        }
    }

    /// Classifies the biome at world coordinates.
    #[must_use]
    pub fn classify(&self, x: f64, z: f64) -> Biome {
        Self::classify_from_climate(self.climate(x, z))
    }

    /// Samples all climate channels at world coordinates.
    #[must_use]
    pub fn climate(&self, x: f64, z: f64) -> Climate {
        let elevation = self.elevation(x, z);
        Climate {
            elevation,
            temperature: self.temperature(x, z, elevation),
            humidity: self.humidity_noise.octaved(x * Self::HUMIDITY_SCALE, z * Self::HUMIDITY_SCALE, 4, 0.5, 2.0),
        }
    }

    /// Gets the continental elevation at world coordinates.
    ///
    /// - < -0.25: Ocean
    /// - < -0.15: Beach
    /// - > 0.55: Mountains
    #[must_use]
    pub fn elevation(&self, x: f64, z: f64) -> f64 {
        let base = self.elevation_noise.octaved(x * Self::ELEVATION_SCALE, z * Self::ELEVATION_SCALE, 4, 0.5, 2.0);

        // Ridges only add height where the base is already high
        let ridged = self.elevation_noise.ridged(
            x * Self::ELEVATION_SCALE * 1.5,
            z * Self::ELEVATION_SCALE * 1.5,
            3,
            0.5,
            2.0,
        );

        (base * 0.8 + ridged * 0.4 * base.max(0.0)).clamp(-1.0, 1.0)
    }

    fn temperature(&self, x: f64, z: f64, elevation: f64) -> f64 {
        let base = self.temperature_noise.sample(x * Self::TEMPERATURE_SCALE, z * Self::TEMPERATURE_SCALE);
        (base - elevation.max(0.0) * 0.5).clamp(-1.0, 1.0)
    }

    /// Classifies biome from climate values.
    #[must_use]
    pub fn classify_from_climate(climate: Climate) -> Biome {
        let Climate { elevation, temperature, humidity } = climate;

        if elevation < -0.25 {
            return Biome::Ocean;
        }
        if elevation < -0.15 {
            return Biome::Beach;
        }
        if elevation > 0.55 {
            return Biome::Mountains;
        }

        match (temperature, humidity) {
            (t, _) if t < -0.45 => Biome::SnowyTundra,
            (t, _) if t < -0.15 => Biome::Taiga,
            (t, h) if t > 0.4 && h < -0.1 => Biome::Desert,
            (_, h) if h > 0.45 && elevation < 0.05 => Biome::Swamp,
            (_, h) if h > 0.1 => Biome::Forest,
            _ => Biome::Plains,
        }
    }
}
