//! CLI command implementations.

pub mod check;
pub mod explain;
pub mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use pgreflect_core::ReflectionConfig;

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<ReflectionConfig> {
    ReflectionConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}
