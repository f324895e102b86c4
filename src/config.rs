//! Configuration management for svcman.
//!
//! This module defines the structure of the optional `svcman.toml` file and
//! provides functionality to load and parse it. Every key is optional;
//! command-line flags take precedence over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::probe::ProbeBackend;
use crate::registry::Dialect;

/// Default name of the configuration file in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "svcman.toml";
/// Default name of the service definition file.
pub const DEFAULT_SERVICES_FILE: &str = "services.txt";

/// Top-level configuration structure corresponding to `svcman.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Path to the service definition file, relative to the config file.
    pub services: Option<PathBuf>,
    /// Maximum number of output lines kept in memory per service.
    pub max_lines: Option<usize>,
    /// Status polling interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Explicit shell binary; skips probing when set.
    pub shell: Option<PathBuf>,
    /// Replaces the built-in list of shell install locations.
    pub shell_candidates: Option<Vec<PathBuf>>,
    /// Process table backend used for liveness checks.
    pub probe: Option<ProbeBackend>,
    /// Interpretation of `_name` entries in the definition file.
    pub dialect: Option<Dialect>,
}

/// Loads and parses the configuration from a file path.
///
/// Relative paths inside the file are resolved against its directory.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let mut config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    if let Some(base) = path.parent() {
        config.services = config.services.map(|services| base.join(services));
    }
    Ok(config)
}

/// Returns `svcman.toml` in the working directory if it exists.
pub fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}
