//! Core application logic for the download cache
//!
//! The cache engine lives in [`cache`]; its most used types are re-exported
//! here.

pub mod cache;

// Re-export main public API
pub use cache::{
    CacheConfig, CacheIndex, CacheStats, ChunkedWriter, DownloadSession, FileReader,
    MaintenanceTask, ReadOptions, SaveOutcome,
};
