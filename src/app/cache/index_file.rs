//! On-disk index file
//!
//! The index is a JSON object mapping each URL to the record of its
//! finalized entry. Entries still being saved never appear in it. The file
//! may be shared by several processes, so reads tolerate anything (missing,
//! unreadable or malformed means empty) and writes go through a temporary
//! sibling plus rename so a reader never sees a half-written index.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::constants::files;
use crate::errors::{CacheError, CacheResult};

use super::session::{Headers, SessionId};

/// Record type tag; only finalized entries are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    File,
}

/// One persisted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub time: i64,
    pub ttl: i64,
    pub status: u16,
    pub size: u64,
    #[serde(default)]
    pub headers: Headers,
    pub data: PathBuf,
    pub uid: SessionId,
}

/// Read the index file
///
/// A missing file is an empty index. A file that cannot be read or parsed is
/// logged and also treated as empty.
pub async fn read_index(path: &Path) -> HashMap<String, IndexRecord> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!("Failed to read cache index {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    match parse_index(&content) {
        Ok(records) => records,
        Err(e) => {
            warn!("Ignoring cache index {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Parse index file content
///
/// Records that do not match the expected shape are skipped individually so
/// one bad record does not hide the rest.
pub fn parse_index(content: &[u8]) -> CacheResult<HashMap<String, IndexRecord>> {
    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_slice(content).map_err(|e| CacheError::IndexCorrupted {
            reason: e.to_string(),
        })?;

    let mut records = HashMap::with_capacity(raw.len());
    for (url, value) in raw {
        match serde_json::from_value::<IndexRecord>(value) {
            Ok(record) => {
                records.insert(url, record);
            }
            Err(e) => debug!("Skipping index record for {}: {}", url, e),
        }
    }
    Ok(records)
}

/// Write the index file atomically
///
/// `temp_tag` makes the temporary name unique per writer so concurrent
/// processes never rename each other's half-written files.
pub async fn write_index(
    path: &Path,
    records: &BTreeMap<String, IndexRecord>,
    temp_tag: &str,
) -> CacheResult<()> {
    let content = serde_json::to_vec(records)?;
    let temp_path = temp_path_for(path, temp_tag);

    fs::write(&temp_path, &content)
        .await
        .map_err(|e| CacheError::io(&temp_path, e))?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(CacheError::io(path, e));
    }

    debug!("Saved cache index with {} entries", records.len());
    Ok(())
}

fn temp_path_for(path: &Path, temp_tag: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}{}", temp_tag, files::TEMP_FILE_SUFFIX));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(ttl: i64, data: &str) -> IndexRecord {
        IndexRecord {
            kind: RecordKind::File,
            time: 1_000,
            ttl,
            status: 200,
            size: 45,
            headers: Headers::from([("content-type".to_string(), "video/mp4".to_string())]),
            data: PathBuf::from(data),
            uid: 42,
        }
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(record(2_000, "/c/dcc-a.bin")).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["ttl"], 2_000);
        assert_eq!(json["data"], "/c/dcc-a.bin");
        assert_eq!(json["uid"], 42);
        assert_eq!(json["headers"]["content-type"], "video/mp4");
    }

    #[test]
    fn test_parse_skips_bad_records() {
        let content = br#"{
            "https://a/1": {"type":"file","time":1,"ttl":2,"status":200,"size":3,"headers":{},"data":"/c/1.bin","uid":1},
            "https://a/2": {"type":"saving","time":1},
            "https://a/3": 17
        }"#;
        let records = parse_index(content).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("https://a/1"));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_index(b"[1, 2, 3]"),
            Err(CacheError::IndexCorrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");

        let mut records = BTreeMap::new();
        records.insert("https://a/1".to_string(), record(2_000, "/c/1.bin"));
        records.insert("https://a/2".to_string(), record(3_000, "/c/2.bin"));
        write_index(&path, &records, "test").await.unwrap();

        let loaded = read_index(&path).await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["https://a/2"].ttl, 3_000);

        // No temporary file left behind
        let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("index.json")]);
    }

    #[tokio::test]
    async fn test_missing_or_garbage_index_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        assert!(read_index(&path).await.is_empty());

        fs::write(&path, b"{not json").await.unwrap();
        assert!(read_index(&path).await.is_empty());
    }
}
