//! Disk cache for streamed response bodies
//!
//! Bodies are written to disk as they arrive and can be read back while the
//! transfer is still running. A JSON index in the cache directory lists the
//! finalized entries and is shared by every process using the directory.
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`session`] - The downloader-facing trait and header helpers
//! - [`writer`] - Chunked append-only writer with single-flight flushing
//! - [`reader`] - Read-while-write file reader
//! - [`entry`] - Entry lifecycle types and exported views
//! - [`index_file`] - On-disk index format
//! - [`index`] - The cache index and entry lifecycle
//! - [`maintenance`] - Expiry and quota eviction loop
//! - [`path`] - Backing file naming
//! - [`stats`] - Cache statistics
//!
//! # Examples
//!
//! ```rust,no_run
//! use download_cache::app::cache::{CacheConfig, CacheIndex, ReadOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::with_cache_root("/tmp/media".into());
//! let index = CacheIndex::open(config).await?;
//! let maintenance = index.spawn_maintenance();
//!
//! // A downloader feeds the index through `index.save(...)`; consumers read
//! // entries back whether or not the transfer has finished.
//! if index.get("https://example.com/seg1.ts").await.is_some() {
//!     let mut reader = index
//!         .create_read_stream("https://example.com/seg1.ts", ReadOptions::default())
//!         .await?;
//!     let body = reader.read_to_end().await?;
//!     println!("{} bytes", body.len());
//! }
//!
//! maintenance.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod index;
pub mod index_file;
pub mod maintenance;
pub mod path;
pub mod reader;
pub mod session;
pub mod stats;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

pub use config::CacheConfig;
pub use entry::{unix_now, EntryKind, EntrySnapshot, ExportedEntry, IndexSnapshot};
pub use index::{CacheIndex, DiscardReason, Finalized, SaveOutcome, StartReport};
pub use maintenance::{
    plan_eviction, EvictionCandidate, EvictionPlan, EvictionReason, MaintenanceReport,
    MaintenanceTask,
};
pub use path::PathGenerator;
pub use reader::{FileReader, ReadOptions};
pub use session::{ByteRange, DownloadSession, Headers, SessionId, SessionOptions};
pub use stats::{format_bytes, CacheStats};
pub use writer::{Chunk, ChunkedWriter, WriterEvent};
