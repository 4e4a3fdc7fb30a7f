//! Download Cache Library
//!
//! A disk-backed cache for response bodies streamed over the network. Bodies
//! are persisted while they arrive, can be read back before the transfer
//! finishes, and are expired by TTL and evicted under a disk quota.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(files::CACHE_DIR_NAME, "dlcache");
        assert_eq!(files::INDEX_FILE_NAME, "index.json");
        assert_eq!(cache::MAX_DISK_USAGE, 512 * 1024 * 1024);
    }

    #[test]
    fn test_error_types() {
        let cache_error = errors::CacheError::EntryNotFound {
            url: "https://example.com/a".to_string(),
        };
        let app_error = AppError::Cache(cache_error);

        assert_eq!(app_error.category(), "cache");
        assert!(!app_error.is_recoverable());
    }
}
