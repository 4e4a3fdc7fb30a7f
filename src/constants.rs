//! Application constants for the download cache
//!
//! This module centralizes all constants used throughout the crate,
//! organized by functional domain.

use std::time::Duration;

/// On-disk layout of the cache folder
pub mod files {
    /// Name of the cache directory under the shared storage root
    pub const CACHE_DIR_NAME: &str = "dlcache";

    /// Name of the JSON index file inside the cache directory
    pub const INDEX_FILE_NAME: &str = "index.json";

    /// Prefix of every backing file name
    pub const BACKING_FILE_PREFIX: &str = "dcc-";

    /// Extension of every backing file
    pub const BACKING_FILE_EXTENSION: &str = "bin";

    /// Suffix for temporary files during atomic index writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Upper bound on a backing file path length, in characters
    pub const MAX_PATH_LENGTH: usize = 260;

    /// Name of the application directory under the OS cache/config dirs
    pub const APP_DIR_NAME: &str = "download-cache";

    /// Config file name inside the user config directory
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Project-local config file
    pub const LOCAL_CONFIG_FILE: &str = "./download-cache.toml";
}

/// Cache policy defaults
pub mod cache {
    use super::Duration;

    /// Disk usage quota (512 MiB)
    pub const MAX_DISK_USAGE: u64 = 512 * 1024 * 1024;

    /// Longest time between two maintenance cycles
    pub const MAX_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

    /// Delay before the first maintenance cycle after start
    pub const INITIAL_MAINTENANCE_DELAY: Duration = Duration::from_secs(15);

    /// Entries expiring within this window are hidden from exported snapshots
    pub const EXPORT_GRACE: Duration = Duration::from_secs(10);

    /// Minimum age of an unreferenced file before startup cleanup may delete it
    pub const ORPHAN_GRACE: Duration = Duration::from_secs(300);
}

/// HTTP conventions consumed from the downloader
pub mod http {
    /// Response header carrying an absolute expiry timestamp (unix seconds)
    pub const CACHE_TTL_HEADER: &str = "x-cache-ttl";

    /// Content encoding header, stripped from decompressed bodies
    pub const CONTENT_ENCODING: &str = "content-encoding";

    /// Content length header
    pub const CONTENT_LENGTH: &str = "content-length";

    /// Lowest status code accepted for caching
    pub const MIN_CACHEABLE_STATUS: u16 = 200;

    /// Highest status code accepted for caching
    pub const MAX_CACHEABLE_STATUS: u16 = 399;
}

/// Reader defaults
pub mod reader {
    /// Size of each read from a backing file
    pub const READ_BUFFER_SIZE: usize = 64 * 1024;
}
