//! Cache configuration types and defaults
//!
//! This module contains the configuration structure for the cache engine.
//! Everything the engine needs from its environment (storage folder, the
//! disk-caching switch, quota and timing knobs) is passed in through
//! [`CacheConfig`] at construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{cache, files};
use crate::errors::{CacheError, CacheResult};

/// Configuration for the cache engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared storage folder; the cache lives in its `dlcache` subdirectory
    /// (OS-specific if None)
    pub cache_root: Option<PathBuf>,
    /// Disk caching switch; when off, `save` is a no-op
    pub enabled: bool,
    /// Disk usage quota in bytes
    pub max_disk_usage: u64,
    /// Longest delay between maintenance cycles
    #[serde(with = "humantime_serde")]
    pub max_maintenance_interval: Duration,
    /// Delay before the first maintenance cycle
    #[serde(with = "humantime_serde")]
    pub initial_maintenance_delay: Duration,
    /// Entries expiring within this window are left out of exported snapshots
    #[serde(with = "humantime_serde")]
    pub export_grace: Duration,
    /// Delete unreferenced files during startup reconciliation
    pub orphan_cleanup: bool,
    /// Only unreferenced files older than this are deleted
    #[serde(with = "humantime_serde")]
    pub orphan_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None, // Will use OS-specific cache directory
            enabled: true,
            max_disk_usage: cache::MAX_DISK_USAGE,
            max_maintenance_interval: cache::MAX_MAINTENANCE_INTERVAL,
            initial_maintenance_delay: cache::INITIAL_MAINTENANCE_DELAY,
            export_grace: cache::EXPORT_GRACE,
            orphan_cleanup: false,
            orphan_grace: cache::ORPHAN_GRACE,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with custom storage root
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
            ..Default::default()
        }
    }

    /// Enable or disable disk caching
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the disk usage quota in bytes
    pub fn with_max_disk_usage(mut self, max_disk_usage: u64) -> Self {
        self.max_disk_usage = max_disk_usage;
        self
    }

    /// Set the longest delay between maintenance cycles
    pub fn with_max_maintenance_interval(mut self, interval: Duration) -> Self {
        self.max_maintenance_interval = interval;
        self
    }

    /// Set the delay before the first maintenance cycle
    pub fn with_initial_maintenance_delay(mut self, delay: Duration) -> Self {
        self.initial_maintenance_delay = delay;
        self
    }

    /// Set the export grace window
    pub fn with_export_grace(mut self, grace: Duration) -> Self {
        self.export_grace = grace;
        self
    }

    /// Enable or disable orphan cleanup, with the minimum orphan age
    pub fn with_orphan_cleanup(mut self, enabled: bool, grace: Duration) -> Self {
        self.orphan_cleanup = enabled;
        self.orphan_grace = grace;
        self
    }

    /// Resolve the cache directory (`<root>/dlcache`)
    ///
    /// Without an explicit root, uses the OS cache directory:
    /// - macOS: ~/Library/Caches/download-cache
    /// - Linux: ~/.cache/download-cache
    /// - Windows: %LOCALAPPDATA%/download-cache
    pub fn cache_dir(&self) -> CacheResult<PathBuf> {
        let root = match &self.cache_root {
            Some(path) => path.clone(),
            None => dirs::cache_dir()
                .ok_or_else(|| CacheError::DirectoryNotAccessible {
                    path: PathBuf::from("system cache directory"),
                })?
                .join(files::APP_DIR_NAME),
        };
        Ok(root.join(files::CACHE_DIR_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_root, None);
        assert!(config.enabled);
        assert_eq!(config.max_disk_usage, 512 * 1024 * 1024);
        assert_eq!(config.max_maintenance_interval, Duration::from_secs(60));
        assert_eq!(config.initial_maintenance_delay, Duration::from_secs(15));
        assert_eq!(config.export_grace, Duration::from_secs(10));
        assert!(!config.orphan_cleanup);
    }

    #[test]
    fn test_config_builder() {
        let cache_root = PathBuf::from("/tmp/test");
        let config = CacheConfig::with_cache_root(cache_root.clone())
            .with_enabled(false)
            .with_max_disk_usage(1024)
            .with_max_maintenance_interval(Duration::from_secs(5))
            .with_initial_maintenance_delay(Duration::from_millis(10))
            .with_export_grace(Duration::ZERO)
            .with_orphan_cleanup(true, Duration::from_secs(1));

        assert_eq!(config.cache_root, Some(cache_root));
        assert!(!config.enabled);
        assert_eq!(config.max_disk_usage, 1024);
        assert_eq!(config.max_maintenance_interval, Duration::from_secs(5));
        assert_eq!(config.initial_maintenance_delay, Duration::from_millis(10));
        assert_eq!(config.export_grace, Duration::ZERO);
        assert!(config.orphan_cleanup);
        assert_eq!(config.orphan_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_cache_dir_is_under_root() {
        let config = CacheConfig::with_cache_root(PathBuf::from("/tmp/storage"));
        assert_eq!(
            config.cache_dir().unwrap(),
            PathBuf::from("/tmp/storage/dlcache")
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            max_disk_usage = 1048576
            max_maintenance_interval = "30s"
            "#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_disk_usage, 1024 * 1024);
        assert_eq!(config.max_maintenance_interval, Duration::from_secs(30));
        assert_eq!(config.export_grace, Duration::from_secs(10));
    }
}
