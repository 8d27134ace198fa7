//! # TERRACRAFT Headless Driver
//!
//! Walks a player along a spiral through a generated world, placing and
//! breaking blocks on the way, then flushes the edits.
//!
//! ```bash
//! # Production defaults, edits kept in memory
//! terracraft
//!
//! # Custom seed, radii and save directory
//! RUST_LOG=debug terracraft world.toml
//! ```

use std::path::Path;
use std::process::ExitCode;

use terracraft_procedural::{BlockId, ChunkCoord, CHUNK_SIZE};
use terracraft_world::{World, WorldConfig, WorldResult};
use tracing::{error, info, warn};

/// Spiral steps walked by the scripted player.
const WALK_STEPS: u32 = 48;

/// Blocks between spiral steps.
const STEP_LENGTH: f64 = 12.0;

fn load_config() -> WorldResult<WorldConfig> {
    match std::env::args().nth(1) {
        Some(path) => WorldConfig::from_file(Path::new(&path)),
        None => Ok(WorldConfig::production()),
    }
}

/// Player position after `step` steps of an outward spiral.
fn spiral(step: u32) -> (f64, f64) {
    let t = f64::from(step) * 0.35;
    let radius = STEP_LENGTH * t;
    (radius * t.cos(), radius * t.sin())
}

/// Surface y of the column under a world position, if its chunk is loaded.
fn surface_y(world: &World, x: i32, z: i32) -> Option<i32> {
    let coord = ChunkCoord::from_block_pos(x, z);
    let size = CHUNK_SIZE as i32;
    let chunk = world.chunk(coord)?;
    let top = chunk.height_at(x.rem_euclid(size) as usize, z.rem_euclid(size) as usize).ok()?;
    Some(i32::from(top))
}

/// Builds a small marker on the surface and mines the block under it.
fn build_marker(world: &mut World, x: i32, z: i32, step: u32) -> WorldResult<()> {
    let Some(top) = surface_y(world, x, z) else {
        return Ok(());
    };
    let height = world.config().world_height as i32;
    if top + 3 >= height {
        return Ok(());
    }

    let mined = world.get_block(x, top, z)?;
    if let Some(props) = world.blocks().get(mined) {
        let drops = props.roll_drops(step.wrapping_mul(0x9E37_79B9));
        info!(block = %props.name, drops = drops.len(), x, y = top, z, "Mined block");
    }
    world.set_block(x, top, z, BlockId::AIR)?;
    world.set_block(x, top, z, BlockId::COBBLESTONE)?;
    world.set_block(x, top + 1, z, BlockId::PLANKS)?;

    let marker = if step % 4 == 0 { BlockId::CHEST } else { BlockId::FURNACE };
    world.set_block(x, top + 2, z, marker)
}

fn run(config: WorldConfig) -> WorldResult<()> {
    let mut world = World::new(config)?;

    for step in 0..WALK_STEPS {
        let (x, z) = spiral(step);
        let committed = world.update(x, z);

        // Stand on loaded ground before touching blocks
        if let Err(e) = world.ensure_loaded_around(x, z, 0) {
            warn!(error = %e, "Player chunk unavailable");
            continue;
        }
        let (bx, bz) = (x.floor() as i32, z.floor() as i32);
        if let Err(e) = build_marker(&mut world, bx, bz, step) {
            warn!(error = %e, x = bx, z = bz, "Could not build marker");
        }

        let dirty = world.take_dirty_subchunks();
        info!(step, committed, dirty_subchunks = dirty.len(), chunk = %World::world_to_chunk(x, z), "Player moved");
    }

    world.flush_generation_queue();
    let stats = world.stats();
    info!(
        loaded = stats.loaded_chunks,
        generated = stats.generations_run,
        unloaded = stats.chunks_unloaded,
        discarded = stats.chunks_discarded,
        edits = stats.edits_recorded,
        failed = stats.failed_chunks,
        corrupt = stats.corrupt_chunks,
        "Walk finished"
    );

    let written = world.flush()?;
    info!(records = written, "Edits flushed");
    world.shutdown()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(seed = config.seed, save_path = ?config.save_path, "Starting Terracraft");

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Terracraft stopped");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spiral_moves_outward() {
        let (x0, z0) = spiral(0);
        assert!(x0.abs() < f64::EPSILON && z0.abs() < f64::EPSILON);
        let near = spiral(5);
        let far = spiral(40);
        assert!(far.0.hypot(far.1) > near.0.hypot(near.1));
    }

    #[test]
    fn test_marker_on_surface() {
        let mut world = World::new(WorldConfig::test()).unwrap();
        world.update(8.0, 8.0);
        let top = surface_y(&world, 8, 8).unwrap();
        build_marker(&mut world, 8, 8, 0).unwrap();
        assert_eq!(world.get_block(8, top, 8).unwrap(), BlockId::COBBLESTONE);
        assert_eq!(world.get_block(8, top + 2, 8).unwrap(), BlockId::CHEST);
        assert_eq!(surface_y(&world, 8, 8), Some(top + 2));
    }
}
