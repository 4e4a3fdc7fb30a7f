//! Prelude module for the download cache library
//!
//! Re-exports the items a downloader integration typically needs with a
//! single `use download_cache::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use download_cache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let index = CacheIndex::open(CacheConfig::default()).await?;
//!     let maintenance = index.spawn_maintenance();
//!
//!     // Hand `index` to the downloader...
//!
//!     maintenance.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, CacheError, CacheResult, Result};

// Cache engine
pub use crate::app::cache::{
    ByteRange, CacheConfig, CacheIndex, CacheStats, ChunkedWriter, DownloadSession, EntryKind,
    EntrySnapshot, FileReader, Finalized, Headers, IndexSnapshot, MaintenanceTask, ReadOptions,
    SaveOutcome, SessionOptions, WriterEvent,
};

// Configuration
pub use crate::config::AppConfig;
