//! Error types for the download cache
//!
//! Errors are split by component. Cache operations that are best-effort by
//! nature (deletes, orphan cleanup, flush retries) log instead of returning
//! these, so a `CacheError` reaching a caller always means the requested
//! operation did not happen.

use std::path::PathBuf;
use thiserror::Error;

/// Cache engine errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Index file could not be parsed
    #[error("Cache index corrupted: {reason}")]
    IndexCorrupted { reason: String },

    /// File I/O error on a specific path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Index serialization failed
    #[error("Index serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// Writer no longer accepts input
    #[error("Writer for {path} is closed")]
    WriterClosed { path: PathBuf },

    /// Writer was failed by its producer
    #[error("Writer failed: {reason}")]
    WriterFailed { reason: String },

    /// No entry exists for the given URL
    #[error("No cache entry for {url}")]
    EntryNotFound { url: String },
}

impl CacheError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Cache(CacheError::Io { .. }) | AppError::Io(_) => true,

            AppError::Cache(CacheError::IndexCorrupted { .. })
            | AppError::Cache(CacheError::WriterClosed { .. })
            | AppError::Config(_) => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Cache(_) => "cache",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
