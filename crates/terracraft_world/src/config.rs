//! # World Configuration
//!
//! All tunables are loaded from an external TOML file at startup:
//!
//! ```toml
//! seed = 42
//! world_height = 128
//! sea_level = 62
//! load_radius = 6
//! unload_radius = 8
//! save_path = "saves"
//! ```
//!
//! Missing keys take the production defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use terracraft_procedural::chunk::validate_height;
use terracraft_procedural::{BiomeRegistry, BlockRegistry, WorldError, WorldResult, WorldSeed};

/// Largest accepted load/unload radius, in chunks.
pub const MAX_RADIUS: u32 = 32;

/// Configuration for the world.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// World seed.
    pub seed: u64,
    /// World height in blocks (multiple of 16).
    pub world_height: usize,
    /// Y of the water surface.
    pub sea_level: i32,
    /// Chunks within this Chebyshev distance of the player are loaded.
    pub load_radius: u32,
    /// Chunks beyond this Chebyshev distance are unloaded.
    pub unload_radius: u32,
    /// Maximum chunk requests issued per update.
    pub max_chunks_per_update: usize,
    /// Generation worker threads. 0 generates on the caller thread.
    pub generation_workers: usize,
    /// Directory for persisted edits. `None` keeps edits in memory.
    pub save_path: Option<PathBuf>,
    /// Updates between automatic flushes. 0 disables autosave.
    pub autosave_interval: u32,
    /// Generation attempts before a chunk is parked as failed.
    pub max_generation_attempts: u32,
    /// Upper bound on blocking waits for generation.
    pub generation_timeout_ms: u64,
    /// Optional TOML file with `[[block]]` overrides.
    pub blocks_file: Option<PathBuf>,
    /// Optional TOML file with `[[biome]]` overrides.
    pub biomes_file: Option<PathBuf>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl WorldConfig {
    /// Production configuration.
    #[must_use]
    pub fn production() -> Self {
        Self {
            seed: WorldSeed::default().value(),
            world_height: 128,
            sea_level: 62,
            load_radius: 6,
            unload_radius: 8,
            max_chunks_per_update: 8,
            generation_workers: 2,
            save_path: None,
            autosave_interval: 600,
            max_generation_attempts: 8,
            generation_timeout_ms: 5000,
            blocks_file: None,
            biomes_file: None,
        }
    }

    /// Small, synchronous configuration for tests.
    #[must_use]
    pub fn test() -> Self {
        Self {
            seed: 42,
            load_radius: 2,
            unload_radius: 3,
            max_chunks_per_update: 64,
            generation_workers: 0,
            autosave_interval: 0,
            generation_timeout_ms: 10_000,
            ..Self::production()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML, unknown keys or invalid values.
    pub fn from_toml_str(source: &str) -> WorldResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| WorldError::InvalidConfig(format!("world config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> WorldResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| WorldError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first invalid field.
    pub fn validate(&self) -> WorldResult<()> {
        validate_height(self.world_height)?;

        let invalid = |reason: String| Err(WorldError::InvalidConfig(reason));

        if self.sea_level < 1 || self.sea_level as usize >= self.world_height - 1 {
            return invalid(format!("sea_level {} outside world of height {}", self.sea_level, self.world_height));
        }
        if self.load_radius > MAX_RADIUS {
            return invalid(format!("load_radius {} exceeds {MAX_RADIUS}", self.load_radius));
        }
        if self.unload_radius < self.load_radius {
            return invalid(format!(
                "unload_radius {} must be at least load_radius {}",
                self.unload_radius, self.load_radius
            ));
        }
        if self.unload_radius > MAX_RADIUS + 2 {
            return invalid(format!("unload_radius {} exceeds {}", self.unload_radius, MAX_RADIUS + 2));
        }
        if self.max_chunks_per_update == 0 {
            return invalid("max_chunks_per_update must be at least 1".into());
        }
        if self.max_generation_attempts == 0 {
            return invalid("max_generation_attempts must be at least 1".into());
        }
        if self.generation_timeout_ms == 0 {
            return invalid("generation_timeout_ms must be positive".into());
        }
        Ok(())
    }

    /// The seed as a [`WorldSeed`].
    #[must_use]
    pub const fn world_seed(&self) -> WorldSeed {
        WorldSeed::new(self.seed)
    }

    /// Blocking-wait bound for generation.
    #[must_use]
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    /// Builds the block and biome registries, applying override files.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if an override file is unreadable or invalid, or a
    /// biome refers to an unknown block.
    pub fn load_registries(&self) -> WorldResult<(Arc<BlockRegistry>, Arc<BiomeRegistry>)> {
        let blocks = match &self.blocks_file {
            Some(path) => BlockRegistry::from_toml_str(&read(path)?)?,
            None => BlockRegistry::builtin(),
        };
        let biomes = match &self.biomes_file {
            Some(path) => BiomeRegistry::from_toml_str(&read(path)?)?,
            None => BiomeRegistry::builtin(),
        };
        biomes.validate(&blocks)?;
        Ok((Arc::new(blocks), Arc::new(biomes)))
    }
}

fn read(path: &Path) -> WorldResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| WorldError::InvalidConfig(format!("cannot read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        WorldConfig::production().validate().unwrap();
        WorldConfig::test().validate().unwrap();
        assert_eq!(WorldConfig::test().generation_workers, 0);
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = WorldConfig::from_toml_str("seed = 7\nload_radius = 3\n").unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.load_radius, 3);
        assert_eq!(config.world_height, 128);
        assert_eq!(config.sea_level, 62);
        assert_eq!(config.unload_radius, 8);
        assert_eq!(config.max_generation_attempts, 8);
        assert_eq!(config.generation_timeout_ms, 5000);
    }

    #[test]
    fn test_hysteresis_enforced() {
        let err = WorldConfig::from_toml_str("load_radius = 6\nunload_radius = 5\n").unwrap_err();
        assert!(matches!(err, WorldError::InvalidConfig(_)));
        WorldConfig::from_toml_str("load_radius = 6\nunload_radius = 6\n").unwrap();
    }

    #[test]
    fn test_invalid_values() {
        for source in [
            "world_height = 100",
            "world_height = 0",
            "sea_level = 500",
            "sea_level = 0",
            "load_radius = 40\nunload_radius = 40",
            "max_chunks_per_update = 0",
            "max_generation_attempts = 0",
            "generation_timeout_ms = 0",
            "unknown_key = 1",
            "seed = \"forty-two\"",
        ] {
            assert!(WorldConfig::from_toml_str(source).is_err(), "Accepted: {source}");
        }
    }

    #[test]
    fn test_paths_parse() {
        let config = WorldConfig::from_toml_str("save_path = \"/tmp/terracraft\"\n").unwrap();
        assert_eq!(config.save_path, Some(PathBuf::from("/tmp/terracraft")));
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("terracraft_definitely_missing.toml");
        assert!(matches!(WorldConfig::from_file(&path), Err(WorldError::InvalidConfig(_))));
    }

    #[test]
    fn test_registry_override_files() {
        let dir = std::env::temp_dir().join(format!(
            "terracraft_cfg_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let blocks = dir.join("blocks.toml");
        let biomes = dir.join("biomes.toml");
        std::fs::write(&blocks, "[[block]]\nid = 40\nname = \"marble\"\n").unwrap();
        std::fs::write(&biomes, "[[biome]]\nbiome = \"plains\"\nsurface = 40\n").unwrap();

        let config = WorldConfig {
            blocks_file: Some(blocks),
            biomes_file: Some(biomes.clone()),
            ..WorldConfig::test()
        };
        let (block_registry, biome_registry) = config.load_registries().unwrap();
        assert!(block_registry.by_name("marble").is_some());
        assert_eq!(biome_registry.params(terracraft_procedural::Biome::Plains).surface.raw(), 40);

        // Biome refers to a block the default registry lacks
        let config = WorldConfig { biomes_file: Some(biomes), ..WorldConfig::test() };
        assert!(config.load_registries().is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
