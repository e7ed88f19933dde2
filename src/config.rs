//! `config.toml`: engine tuning, retry policy, disabled subsystems and
//! backend locations. Every field has a default, so a missing file is fine.

use anyhow::{Context, Result};
use reconcile::{EngineOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub retry: RetrySettings,
    pub subsystems: SubsystemsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads per pass
    pub jobs: usize,
    /// Deadline for every backend call
    pub timeout_secs: u64,
    /// Fail the whole pass when any subsystem fails
    pub all_or_nothing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout_secs: 120,
            all_or_nothing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubsystemsConfig {
    /// Subsystem ids left out of the registry
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub appimage_dir: String,
    pub shim_dir: String,
    pub upstream_manifest: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            appimage_dir: "~/Applications".to_string(),
            shim_dir: "~/.local/bin".to_string(),
            upstream_manifest: "/usr/share/strata/upstream.json".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn appimage_dir(&self) -> PathBuf {
        paths::expand(&self.appimage_dir)
    }

    pub fn shim_dir(&self) -> PathBuf {
        paths::expand(&self.shim_dir)
    }
}

/// Overrides from the command line, applied on top of the file
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub all_or_nothing: bool,
}

impl Config {
    /// Load `config.toml` from the config directory
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.subsystems.disabled.iter().any(|d| d == id)
    }

    pub fn engine_options(&self, overrides: Overrides) -> EngineOptions {
        EngineOptions {
            jobs: overrides.jobs.unwrap_or(self.engine.jobs).max(1),
            timeout: Duration::from_secs(overrides.timeout_secs.unwrap_or(self.engine.timeout_secs)),
            all_or_nothing: overrides.all_or_nothing || self.engine.all_or_nothing,
            retry: RetryConfig::from(&self.retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse(
            r#"
[engine]
timeout_secs = 30

[subsystems]
disabled = ["homebrew", "toolbox"]

[paths]
appimage_dir = "/opt/apps"
"#,
        )
        .unwrap();

        assert_eq!(config.engine.timeout_secs, 30);
        assert_eq!(config.engine.jobs, 4);
        assert!(config.is_disabled("homebrew"));
        assert!(!config.is_disabled("flatpak"));
        assert_eq!(config.paths.appimage_dir(), PathBuf::from("/opt/apps"));
        assert_eq!(config.paths.shim_dir, "~/.local/bin");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine]\njobs = \"many\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let config = Config::parse("[engine]\njobs = 2\ntimeout_secs = 60\n").unwrap();
        let options = config.engine_options(Overrides {
            jobs: Some(8),
            timeout_secs: None,
            all_or_nothing: true,
        });
        assert_eq!(options.jobs, 8);
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert!(options.all_or_nothing);
    }

    #[test]
    fn test_retry_conversion() {
        let config = Config::parse("[retry]\nmax_attempts = 0\nbase_delay_ms = 50\n").unwrap();
        let retry = config.engine_options(Overrides::default()).retry;
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.base_delay, Duration::from_millis(50));
        assert_eq!(retry.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_jobs_clamped() {
        let config = Config::default();
        let options = config.engine_options(Overrides {
            jobs: Some(0),
            ..Overrides::default()
        });
        assert_eq!(options.jobs, 1);
    }
}
