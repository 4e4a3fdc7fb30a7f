//! Cache entry types
//!
//! One [`CacheEntry`] exists per cached URL. It is either still being saved
//! (holding the active [`ChunkedWriter`]) or finalized into a backing file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::index_file::{IndexRecord, RecordKind};
use super::session::{Headers, SessionId};
use super::writer::ChunkedWriter;

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Lifecycle state of an entry
#[derive(Debug, Clone)]
pub enum EntryState {
    /// Body is still arriving; only lives in memory
    Saving(ChunkedWriter),
    /// Body is complete and immutable on disk
    File(PathBuf),
}

/// One cache record keyed by source URL
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Creation time (unix seconds)
    pub time: i64,
    /// Absolute expiry time (unix seconds)
    pub ttl: i64,
    /// Response status code, if known
    pub status: Option<u16>,
    /// Declared or final body length
    pub size: Option<u64>,
    /// Stored response headers
    pub headers: Headers,
    /// Session that created this entry
    pub uid: SessionId,
    pub state: EntryState,
}

impl CacheEntry {
    /// Rebuild a finalized entry from its index record
    pub fn from_record(record: IndexRecord) -> Self {
        Self {
            time: record.time,
            ttl: record.ttl,
            status: Some(record.status),
            size: Some(record.size),
            headers: record.headers,
            uid: record.uid,
            state: EntryState::File(record.data),
        }
    }

    /// Index record for this entry; `None` while saving
    pub fn to_record(&self) -> Option<IndexRecord> {
        match &self.state {
            EntryState::File(path) => Some(IndexRecord {
                kind: RecordKind::File,
                time: self.time,
                ttl: self.ttl,
                status: self.status.unwrap_or_default(),
                size: self.size.unwrap_or_default(),
                headers: self.headers.clone(),
                data: path.clone(),
                uid: self.uid,
            }),
            EntryState::Saving(_) => None,
        }
    }

    /// Check if the entry is still being saved
    pub fn is_saving(&self) -> bool {
        matches!(self.state, EntryState::Saving(_))
    }

    /// Path of the backing file, finalized or not
    pub fn data_path(&self) -> &Path {
        match &self.state {
            EntryState::Saving(writer) => writer.path(),
            EntryState::File(path) => path,
        }
    }

    /// Check whether the entry has expired at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.ttl
    }

    /// Summary view of this entry
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            kind: if self.is_saving() {
                EntryKind::Saving
            } else {
                EntryKind::File
            },
            time: self.time,
            ttl: self.ttl,
            status: self.status,
            size: self.size,
            headers: self.headers.clone(),
            data: self.data_path().to_path_buf(),
        }
    }
}

/// Entry state without the writer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Saving,
    File,
}

/// Copy of an entry's metadata, safe to hand to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub kind: EntryKind,
    pub time: i64,
    pub ttl: i64,
    pub status: Option<u16>,
    pub size: Option<u64>,
    pub headers: Headers,
    pub data: PathBuf,
}

/// Exported view of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub time: i64,
    pub ttl: i64,
    pub size: Option<u64>,
}

/// Exported view of the index, sent with every update
pub type IndexSnapshot = BTreeMap<String, ExportedEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(ttl: i64) -> CacheEntry {
        CacheEntry {
            time: 100,
            ttl,
            status: Some(200),
            size: Some(45),
            headers: Headers::new(),
            uid: 7,
            state: EntryState::File(PathBuf::from("/c/dcc-a.bin")),
        }
    }

    #[test]
    fn test_record_conversion_preserves_fields() {
        let entry = file_entry(500);
        let record = entry.to_record().unwrap();
        assert_eq!(record.kind, RecordKind::File);
        assert_eq!(record.size, 45);
        assert_eq!(record.status, 200);
        assert_eq!(record.uid, 7);

        let restored = CacheEntry::from_record(record);
        assert_eq!(restored.ttl, 500);
        assert_eq!(restored.data_path(), Path::new("/c/dcc-a.bin"));
        assert!(!restored.is_saving());
    }

    #[test]
    fn test_saving_entries_have_no_record() {
        let mut entry = file_entry(500);
        entry.state = EntryState::Saving(ChunkedWriter::new(PathBuf::from("/c/dcc-b.bin")));
        assert!(entry.to_record().is_none());
        assert_eq!(entry.snapshot().kind, EntryKind::Saving);
        assert_eq!(entry.data_path(), Path::new("/c/dcc-b.bin"));
    }

    #[test]
    fn test_expiry() {
        let entry = file_entry(500);
        assert!(!entry.is_expired(500));
        assert!(entry.is_expired(501));
    }
}
