//! Centralized path resolution for strata
//!
//! # Environment Variables
//!
//! - `STRATA_CONFIG_DIR` - Override config directory
//! - `STRATA_STATE_DIR` - Override state directory (baselines live here)
//! - `STRATA_MANIFEST` - Override the manifest file location
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `STRATA_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/strata` (if set)
//! 3. `~/.config/strata`
//!
//! For state_dir():
//! 1. `STRATA_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/strata` (if set)
//! 3. `~/.local/state/strata`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "STRATA_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STRATA_STATE_DIR";

/// Environment variable for manifest file override
pub const ENV_MANIFEST: &str = "STRATA_MANIFEST";

const APP_DIR: &str = "strata";

/// Get the strata config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = resolve(
        std::env::var(ENV_CONFIG_DIR).ok(),
        std::env::var("XDG_CONFIG_HOME").ok(),
        &home.join(".config"),
    );
    log::debug!("Using config dir: {}", path.display());
    Ok(path)
}

/// Get the strata state directory path
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = resolve(
        std::env::var(ENV_STATE_DIR).ok(),
        std::env::var("XDG_STATE_HOME").ok(),
        &home.join(".local").join("state"),
    );
    log::debug!("Using state dir: {}", path.display());
    Ok(path)
}

/// Path to `config.toml`
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Path to the manifest, `STRATA_MANIFEST` first, then `<config>/manifest.toml`
pub fn manifest_file() -> Result<PathBuf> {
    if let Ok(file) = std::env::var(ENV_MANIFEST) {
        let path = expand(&file);
        log::debug!("Using manifest from {}: {}", ENV_MANIFEST, path.display());
        return Ok(path);
    }
    Ok(config_dir()?.join("manifest.toml"))
}

/// Directory holding one baseline file per subsystem
pub fn baseline_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("baseline"))
}

/// Pick a directory: explicit override, then the XDG base, then the fallback base.
fn resolve(override_dir: Option<String>, xdg_base: Option<String>, fallback_base: &Path) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return expand(&dir);
    }
    if let Some(base) = xdg_base.filter(|d| !d.is_empty()) {
        return PathBuf::from(base).join(APP_DIR);
    }
    fallback_base.join(APP_DIR)
}

/// Expand ~ and environment variables in a path string.
///
/// ```
/// let home_path = strata::paths::expand("~/Applications");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
