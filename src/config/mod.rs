//! Configuration loading, defaults and migration.

mod engine_config;
mod migration;

pub use engine_config::{EngineConfig, PolicyConfig};
pub use migration::Migrate;

use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Default data directory for the engine.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("ordergate"))
        .ok_or_else(|| anyhow!("Could not determine data directory"))
}
