//! Configuration for spawnbox
//!
//! One explicit value passed to the image provider and the lifecycle
//! controller. There is deliberately no process-wide singleton: tests
//! construct their own instance (usually via [`AppConfig::with_root`])
//! so parallel runs never share directories.
//!
//! Located at `~/.config/spawnbox/config.toml`.

mod error;

pub use error::*;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level spawnbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub directories: DirectoriesConfig,
    pub runtime: RuntimeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directories: DirectoriesConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Filesystem layout for images and caches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    /// Where downloaded/unpacked images are physically stored
    pub archive: PathBuf,
    /// Where activated (ready-to-boot) images are linked
    pub images: PathBuf,
    /// Cache shared with running containers via a bind mount
    pub cache: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            archive: PathBuf::from("/var/lib/spawnbox/archive"),
            images: PathBuf::from("/var/lib/spawnbox/images"),
            cache: PathBuf::from("/var/cache/spawnbox"),
        }
    }
}

impl DirectoriesConfig {
    /// Download staging area inside the cache directory
    pub fn downloads(&self) -> PathBuf {
        self.cache.join("downloads")
    }
}

/// Boot/readiness timings
///
/// Polling is the only readiness mechanism the external status tool
/// offers, so the interval and timeout are configuration rather than
/// constants; tests shrink them to keep the suite fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum time to wait for a container to report readiness
    pub boot_timeout_ms: u64,
    /// Delay between readiness polls
    pub poll_interval_ms: u64,
    /// Window after launch during which an immediate boot failure is
    /// still surfaced synchronously to the caller
    pub grace_window_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            boot_timeout_ms: 15_000,
            poll_interval_ms: 100,
            grace_window_ms: 250,
        }
    }
}

impl RuntimeConfig {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(config)
    }

    /// Derive every directory from a single root
    ///
    /// Test sessions pass a fresh temporary root so concurrent runs
    /// never touch each other's archive, image, or cache trees.
    pub fn with_root(root: &Path) -> Self {
        Self {
            directories: DirectoriesConfig {
                archive: root.join("archive"),
                images: root.join("images"),
                cache: root.join("cache"),
            },
            runtime: RuntimeConfig::default(),
        }
    }

    /// Default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "spawnbox").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = AppConfig::load_from(Path::new("/nonexistent/spawnbox.toml")).unwrap();
        assert_eq!(config.runtime.poll_interval_ms, 100);
        assert_eq!(config.directories.cache, PathBuf::from("/var/cache/spawnbox"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[runtime]\nboot_timeout_ms = 500\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.runtime.boot_timeout_ms, 500);
        assert_eq!(config.runtime.grace_window_ms, 250);
    }

    #[test]
    fn with_root_isolates_directories() {
        let config = AppConfig::with_root(Path::new("/tmp/sbx-test"));
        assert_eq!(config.directories.archive, PathBuf::from("/tmp/sbx-test/archive"));
        assert_eq!(
            config.directories.downloads(),
            PathBuf::from("/tmp/sbx-test/cache/downloads")
        );
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "runtime = not-a-table").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
    }
}
