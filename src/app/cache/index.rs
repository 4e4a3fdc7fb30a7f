//! Cache index: entry lifecycle and persistence
//!
//! [`CacheIndex`] owns the map of entries keyed by URL. The downloader feeds
//! it through [`CacheIndex::save`]; the first call for a URL opens a
//! `Saving` entry with its own [`ChunkedWriter`], and the final call
//! validates the transfer once the writer finishes and either promotes the
//! entry to a `File` or discards it.
//!
//! The index file is shared with any other process using the same folder.
//! Peers converge by merging on reload, keeping whichever version of an
//! entry has the later expiry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::fs;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::{files, http};
use crate::errors::{CacheError, CacheResult};

use super::config::CacheConfig;
use super::entry::{
    unix_now, CacheEntry, EntrySnapshot, EntryState, ExportedEntry, IndexSnapshot,
};
use super::index_file::{self, IndexRecord};
use super::path::PathGenerator;
use super::reader::{FileReader, ReadOptions};
use super::session::{
    declared_expiry, declared_length, storable_headers, DownloadSession, SessionId,
    TransferSummary,
};
use super::stats::CacheStats;
use super::writer::{remove_file_best_effort, ChunkedWriter};

/// Result of one `save` call
#[derive(Debug)]
pub enum SaveOutcome {
    /// Disk caching is switched off
    Disabled,
    /// The request covers only part of the resource
    PartialRequest,
    /// The URL is owned by another session or already finalized, or this
    /// session's entry was cancelled mid-transfer
    Rejected,
    /// The chunk was handed to the entry's writer
    Accepted,
    /// The transfer ended; the handle resolves once the entry is settled
    Finalizing(JoinHandle<Finalized>),
}

/// How a finished transfer was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// Entry is now a `File` of `size` bytes
    Promoted { size: u64 },
    /// Entry was dropped
    Discarded(DiscardReason),
    /// Entry was removed or replaced before the writer finished
    Superseded,
}

/// Why a finished transfer was not cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// The writer recorded an error
    WriterError(String),
    /// Neither the response nor the downloader declared a length
    SizeUnknown,
    /// Fewer bytes arrived than were declared
    SizeMismatch { expected: u64, received: u64 },
    /// The response status is outside the cacheable range
    BadStatus { status: u16 },
    /// The transfer recorded errors and received nothing
    NoData,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::WriterError(e) => write!(f, "writer error: {}", e),
            DiscardReason::SizeUnknown => write!(f, "unknown body size"),
            DiscardReason::SizeMismatch { expected, received } => write!(
                f,
                "bad file size, expected {} bytes, received {}",
                expected, received
            ),
            DiscardReason::BadStatus { status } => write!(f, "bad status {}", status),
            DiscardReason::NoData => write!(f, "transfer failed without data"),
        }
    }
}

/// What startup reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    /// Entries loaded from the index file
    pub loaded: usize,
    /// Entries dropped because their backing file is gone
    pub missing_removed: usize,
    /// Unreferenced files deleted
    pub orphans_removed: usize,
    /// The directory had files but no index and was emptied
    pub truncated: bool,
}

#[derive(Debug)]
pub(super) struct IndexShared {
    pub(super) config: CacheConfig,
    pub(super) cache_dir: PathBuf,
    pub(super) index_file: PathBuf,
    pub(super) instance_id: u32,
    pub(super) entries: RwLock<HashMap<String, CacheEntry>>,
    pub(super) maintenance_lock: Mutex<()>,
    /// Sessions whose body can no longer be cached from the start
    cancelled: Mutex<HashSet<(String, SessionId)>>,
    updates: watch::Sender<IndexSnapshot>,
    started: AtomicBool,
    temp_counter: AtomicU64,
}

/// Disk cache index shared by downloaders, readers and maintenance
///
/// Cloning yields another handle to the same index.
#[derive(Debug, Clone)]
pub struct CacheIndex {
    pub(super) shared: Arc<IndexShared>,
}

impl CacheIndex {
    /// Create an index for the configured folder
    ///
    /// No filesystem work happens until [`CacheIndex::start`].
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if no cache directory can be determined
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let cache_dir = config.cache_dir()?;
        let index_file = PathGenerator::index_file_path(&cache_dir);
        let (updates, _) = watch::channel(IndexSnapshot::new());

        Ok(Self {
            shared: Arc::new(IndexShared {
                config,
                cache_dir,
                index_file,
                instance_id: fastrand::u32(..),
                entries: RwLock::new(HashMap::new()),
                maintenance_lock: Mutex::new(()),
                cancelled: Mutex::new(HashSet::new()),
                updates,
                started: AtomicBool::new(false),
                temp_counter: AtomicU64::new(0),
            }),
        })
    }

    /// Create and start an index
    pub async fn open(config: CacheConfig) -> CacheResult<Self> {
        let index = Self::new(config)?;
        index.start().await?;
        Ok(index)
    }

    /// Cache directory holding the index and backing files
    pub fn cache_dir(&self) -> &Path {
        &self.shared.cache_dir
    }

    /// Path of the index file
    pub fn index_file(&self) -> &Path {
        &self.shared.index_file
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Random identifier of this index instance
    pub fn instance_id(&self) -> u32 {
        self.shared.instance_id
    }

    /// Backing file path for a URL
    pub fn file_path_for(&self, url: &str) -> PathBuf {
        PathGenerator::backing_file_path(&self.shared.cache_dir, url)
    }

    /// Watch exported snapshots, refreshed on every structural change
    pub fn subscribe(&self) -> watch::Receiver<IndexSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Reconcile the index with the cache directory
    ///
    /// Loads the index file, drops entries whose backing file is gone and,
    /// when orphan cleanup is enabled, deletes unreferenced files older than
    /// the orphan grace period. A directory that has files but no index is
    /// not trusted and is emptied. Runs once; later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache directory cannot be created
    pub async fn start(&self) -> CacheResult<StartReport> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Ok(StartReport::default());
        }

        let cache_dir = &self.shared.cache_dir;
        fs::create_dir_all(cache_dir).await.map_err(|e| {
            error!("Failed to create cache directory: {}", e);
            CacheError::DirectoryNotAccessible {
                path: cache_dir.clone(),
            }
        })?;

        let listing = list_files(cache_dir).await;
        let mut report = StartReport::default();

        if listing.iter().any(|p| p == &self.shared.index_file) {
            report.loaded = self.reload().await;

            let on_disk: HashSet<&Path> = listing.iter().map(PathBuf::as_path).collect();

            let referenced: HashSet<PathBuf> = {
                let mut entries = self.shared.entries.write().await;
                let before = entries.len();
                entries.retain(|url, entry| match &entry.state {
                    EntryState::File(path) => {
                        let present = on_disk.contains(path.as_path());
                        if !present {
                            debug!("Dropping {}: backing file missing", url);
                        }
                        present
                    }
                    EntryState::Saving(_) => true,
                });
                report.missing_removed = before - entries.len();

                entries
                    .values()
                    .map(|e| e.data_path().to_path_buf())
                    .collect()
            };

            if self.shared.config.orphan_cleanup {
                report.orphans_removed = self.remove_orphans(&listing, &referenced).await;
            }
            if report.missing_removed > 0 {
                self.persist_or_log().await;
            }
        } else if !listing.is_empty() {
            warn!(
                "Cache directory {} has {} files but no index, truncating",
                cache_dir.display(),
                listing.len()
            );
            self.truncate().await;
            report.truncated = true;
        }

        info!(
            "Cache index started at {}: {} loaded, {} missing, {} orphans removed",
            cache_dir.display(),
            report.loaded,
            report.missing_removed,
            report.orphans_removed
        );
        self.publish_update().await;
        Ok(report)
    }

    async fn remove_orphans(&self, listing: &[PathBuf], referenced: &HashSet<PathBuf>) -> usize {
        let grace = self.shared.config.orphan_grace;
        let mut removed = 0;
        for path in listing {
            if path == &self.shared.index_file {
                continue;
            }
            if !is_cache_artifact(path) || referenced.contains(path) {
                continue;
            }
            if !is_older_than(path, grace).await {
                continue;
            }
            debug!("Removing orphaned file {}", path.display());
            remove_file_best_effort(path).await;
            removed += 1;
        }
        removed
    }

    /// Merge the index file into memory
    ///
    /// For each URL the version with the greater TTL wins. Entries still
    /// being saved here are never replaced. Returns how many entries were
    /// taken from the file.
    pub async fn reload(&self) -> usize {
        let records = index_file::read_index(&self.shared.index_file).await;
        let mut entries = self.shared.entries.write().await;
        let mut merged = 0;
        for (url, record) in records {
            let keep_ours = entries
                .get(&url)
                .is_some_and(|ours| ours.is_saving() || ours.ttl >= record.ttl);
            if !keep_ours {
                entries.insert(url, CacheEntry::from_record(record));
                merged += 1;
            }
        }
        debug!(
            "Cache index {} reloaded, {} entries merged",
            self.shared.instance_id, merged
        );
        merged
    }

    /// Feed one downloader step into the cache
    ///
    /// Called for every received chunk and once more with `ended = true`.
    /// Caching is best-effort: nothing here fails the transfer. A session
    /// that was turned away or cancelled stays rejected until it ends, so an
    /// entry never starts partway through a body.
    pub async fn save(
        &self,
        session: &dyn DownloadSession,
        chunk: Option<Bytes>,
        ended: bool,
    ) -> SaveOutcome {
        if !self.shared.config.enabled {
            return SaveOutcome::Disabled;
        }
        if let Some(range) = session.requesting_range() {
            if range.is_partial(session.total_content_length()) {
                debug!(
                    "Not caching partial request for {}",
                    session.current_url()
                );
                return SaveOutcome::PartialRequest;
            }
        }

        let url = session.current_url().to_string();
        let uid = session.options().uid;
        let now = unix_now();
        let mut created = false;

        let outcome = {
            let mut entries = self.shared.entries.write().await;
            let mut cancelled = self.shared.cancelled.lock().await;
            let key = (url.clone(), uid);
            if cancelled.contains(&key) {
                if ended {
                    cancelled.remove(&key);
                }
                return SaveOutcome::Rejected;
            }

            let vacant = match entries.get(&url) {
                None => true,
                Some(entry) => !entry.is_saving() && entry.is_expired(now),
            };
            if vacant {
                if let Some(CacheEntry {
                    state: EntryState::File(path),
                    ..
                }) = entries.remove(&url)
                {
                    debug!("Replacing expired entry for {}", url);
                    remove_file_best_effort(&path).await;
                }
                let entry = self.new_saving_entry(session, &url, now);
                debug!("Caching {} (session {}, ttl {})", url, uid, entry.ttl);
                entries.insert(url.clone(), entry);
                created = true;
            }

            match entries.get(&url) {
                Some(CacheEntry {
                    uid: owner,
                    state: EntryState::Saving(writer),
                    ..
                }) if *owner == uid => {
                    let writer = writer.clone();
                    if let Some(chunk) = chunk {
                        if let Err(e) = writer.push(chunk) {
                            debug!("Chunk for {} dropped: {}", url, e);
                        }
                    }
                    if ended {
                        writer.end();
                        let summary = TransferSummary::capture(session);
                        let index = self.clone();
                        SaveOutcome::Finalizing(tokio::spawn(async move {
                            index.finalize(url, writer, summary).await
                        }))
                    } else {
                        SaveOutcome::Accepted
                    }
                }
                _ => {
                    // Later chunks of this body must not start a new entry
                    if !ended {
                        cancelled.insert(key);
                    }
                    SaveOutcome::Rejected
                }
            }
        };

        if created {
            self.publish_update().await;
        }
        outcome
    }

    fn new_saving_entry(&self, session: &dyn DownloadSession, url: &str, now: i64) -> CacheEntry {
        let options = session.options();
        let received = session.last_headers_received();

        let lifetime = i64::try_from(options.cache_ttl.as_secs()).unwrap_or(i64::MAX);
        let mut ttl = now.saturating_add(lifetime);
        if let Some(declared) = declared_expiry(received) {
            ttl = ttl.min(declared);
        }
        let headers = storable_headers(received);

        CacheEntry {
            time: now,
            ttl,
            status: session.last_status_code_received(),
            size: declared_length(&headers),
            headers,
            uid: options.uid,
            state: EntryState::Saving(ChunkedWriter::new(self.file_path_for(url))),
        }
    }

    /// Settle an entry once its writer finishes
    async fn finalize(
        &self,
        url: String,
        writer: ChunkedWriter,
        summary: TransferSummary,
    ) -> Finalized {
        writer.wait_finished().await;

        let mut entries = self.shared.entries.write().await;
        let owned = matches!(
            entries.get(&url),
            Some(CacheEntry { state: EntryState::Saving(current), .. }) if current.same_writer(&writer)
        );
        if !owned {
            drop(entries);
            writer.destroy();
            return Finalized::Superseded;
        }
        let Some(entry) = entries.get_mut(&url) else {
            return Finalized::Superseded;
        };

        if let Err(reason) = check_transfer(entry, &writer, &summary) {
            warn!("Discarding cache for {}: {}", url, reason);
            entries.remove(&url);
            writer.discard(reason.to_string()).await;
            drop(entries);
            self.publish_update().await;
            return Finalized::Discarded(reason);
        }

        let size = writer.size();
        entry.size = Some(size);
        entry.status = entry.status.or(Some(summary.status_code));
        entry
            .headers
            .insert(http::CONTENT_LENGTH.to_string(), size.to_string());
        entry.state = EntryState::File(writer.path().to_path_buf());
        writer.destroy();
        drop(entries);

        info!("Cached {} ({} bytes)", url, size);
        self.persist_or_log().await;
        self.publish_update().await;
        Finalized::Promoted { size }
    }

    /// Remove an entry
    ///
    /// Deletes the backing file of a finalized entry, or fails the writer of
    /// one still being saved. Returns whether an entry existed.
    pub async fn remove(&self, url: &str) -> bool {
        {
            let mut entries = self.shared.entries.write().await;
            let Some(entry) = entries.remove(url) else {
                return false;
            };
            match entry.state {
                EntryState::File(path) => remove_file_best_effort(&path).await,
                EntryState::Saving(writer) => {
                    self.shared
                        .cancelled
                        .lock()
                        .await
                        .insert((url.to_string(), entry.uid));
                    writer.fail("Removed").await;
                }
            }
        }
        debug!("Removed cache entry {}", url);
        self.persist_or_log().await;
        self.publish_update().await;
        true
    }

    /// Drop every entry and empty the cache directory
    pub async fn truncate(&self) {
        {
            let mut entries = self.shared.entries.write().await;
            let mut cancelled = self.shared.cancelled.lock().await;
            for (url, entry) in entries.drain() {
                if let EntryState::Saving(writer) = entry.state {
                    cancelled.insert((url, entry.uid));
                    writer.fail("Truncated").await;
                }
            }
            drop(cancelled);
            for path in list_files(&self.shared.cache_dir).await {
                remove_file_best_effort(&path).await;
            }
        }
        info!("Cache truncated: {}", self.shared.cache_dir.display());
        self.publish_update().await;
    }

    /// Look up an entry
    pub async fn get(&self, url: &str) -> Option<EntrySnapshot> {
        let entries = self.shared.entries.read().await;
        entries.get(url).map(CacheEntry::snapshot)
    }

    /// Open a reader on a cached or in-flight entry
    ///
    /// # Errors
    ///
    /// Returns `CacheError::EntryNotFound` if the URL has no entry
    pub async fn create_read_stream(
        &self,
        url: &str,
        options: ReadOptions,
    ) -> CacheResult<FileReader> {
        let entries = self.shared.entries.read().await;
        match entries.get(url).map(|e| &e.state) {
            Some(EntryState::Saving(writer)) => Ok(writer.create_read_stream(options)),
            Some(EntryState::File(path)) => Ok(FileReader::open(path, options)),
            None => Err(CacheError::EntryNotFound {
                url: url.to_string(),
            }),
        }
    }

    /// Exported snapshot at the current time
    pub async fn export(&self) -> IndexSnapshot {
        self.export_at(unix_now()).await
    }

    /// Exported snapshot at `now`
    ///
    /// Entries expiring within the export grace window are left out.
    pub async fn export_at(&self, now: i64) -> IndexSnapshot {
        let grace = i64::try_from(self.shared.config.export_grace.as_secs()).unwrap_or(i64::MAX);
        let entries = self.shared.entries.read().await;
        entries
            .iter()
            .filter(|(_, entry)| now <= entry.ttl.saturating_sub(grace))
            .map(|(url, entry)| {
                (
                    url.clone(),
                    ExportedEntry {
                        time: entry.time,
                        ttl: entry.ttl,
                        size: entry.size,
                    },
                )
            })
            .collect()
    }

    /// Number of entries, saving or finalized
    pub async fn len(&self) -> usize {
        self.shared.entries.read().await.len()
    }

    /// Check if the index has no entries
    pub async fn is_empty(&self) -> bool {
        self.shared.entries.read().await.is_empty()
    }

    /// Current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.shared.entries.read().await;
        let mut stats = CacheStats::new(
            self.shared.cache_dir.clone(),
            self.shared.config.max_disk_usage,
        );
        for entry in entries.values() {
            match &entry.state {
                EntryState::File(_) => stats.add_file(entry.size.unwrap_or_default()),
                EntryState::Saving(writer) => stats.add_saving(writer.size()),
            }
        }
        stats
    }

    /// Write finalized entries to the index file
    pub async fn persist(&self) -> CacheResult<()> {
        let records: BTreeMap<String, IndexRecord> = {
            let entries = self.shared.entries.read().await;
            entries
                .iter()
                .filter_map(|(url, entry)| entry.to_record().map(|r| (url.clone(), r)))
                .collect()
        };
        let tag = format!(
            "{:08x}-{}",
            self.shared.instance_id,
            self.shared.temp_counter.fetch_add(1, Ordering::Relaxed)
        );
        index_file::write_index(&self.shared.index_file, &records, &tag).await
    }

    pub(super) async fn persist_or_log(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to save cache index: {}", e);
        }
    }

    pub(super) async fn publish_update(&self) {
        let snapshot = self.export().await;
        self.shared.updates.send_replace(snapshot);
    }
}

/// Validate a finished transfer
fn check_transfer(
    entry: &CacheEntry,
    writer: &ChunkedWriter,
    summary: &TransferSummary,
) -> Result<(), DiscardReason> {
    if let Some(error) = writer.error() {
        return Err(DiscardReason::WriterError(error));
    }

    let received = writer.size();
    match entry.size.or(summary.total_content_length) {
        None => return Err(DiscardReason::SizeUnknown),
        Some(expected) if received < expected => {
            return Err(DiscardReason::SizeMismatch { expected, received })
        }
        Some(_) => {}
    }

    if !summary.has_cacheable_status() {
        return Err(DiscardReason::BadStatus {
            status: summary.status_code,
        });
    }
    if summary.failed_without_data() {
        return Err(DiscardReason::NoData);
    }
    Ok(())
}

/// List regular files directly inside a directory
async fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list cache directory {}: {}", dir.display(), e);
            return files;
        }
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                    files.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error while listing {}: {}", dir.display(), e);
                break;
            }
        }
    }
    files
}

/// Backing files and leftover temporary index files
fn is_cache_artifact(path: &Path) -> bool {
    PathGenerator::is_backing_file(path)
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(files::TEMP_FILE_SUFFIX))
}

async fn is_older_than(path: &Path, grace: Duration) -> bool {
    if grace.is_zero() {
        return true;
    }
    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= grace)
            .unwrap_or(false),
        Err(_) => false,
    }
}
