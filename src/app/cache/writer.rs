//! Append-only chunk writer with read-while-write support
//!
//! A [`ChunkedWriter`] accepts the body of one response chunk by chunk,
//! buffers each chunk in memory and flushes it to the backing file from a
//! background task. Readers can attach at any point through
//! [`ChunkedWriter::create_read_stream`] and follow the file as it grows.
//!
//! Flushing is single-flight: at most one flush task runs per writer. A
//! `push` or `end` that arrives while a flush is running only marks the state
//! dirty, and the running task makes another pass before going idle.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::errors::{CacheError, CacheResult};

use super::reader::{FileReader, ReadOptions};

/// One element of the writer's ordered chunk sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Held in memory, not yet on disk
    Buffered { offset: u64, data: Bytes },
    /// On disk; the bytes have been released
    Flushed { offset: u64, length: u64 },
}

impl Chunk {
    /// Byte offset of this chunk in the body
    pub fn offset(&self) -> u64 {
        match self {
            Chunk::Buffered { offset, .. } | Chunk::Flushed { offset, .. } => *offset,
        }
    }

    /// Length of this chunk in bytes
    pub fn len(&self) -> u64 {
        match self {
            Chunk::Buffered { data, .. } => data.len() as u64,
            Chunk::Flushed { length, .. } => *length,
        }
    }

    /// Check if this chunk carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if this chunk has reached the backing file
    pub fn is_flushed(&self) -> bool {
        matches!(self, Chunk::Flushed { .. })
    }
}

/// Notification delivered to writer observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    /// A chunk was pushed; `offset` is the body size before it
    Data { bytes: Bytes, offset: u64 },
    /// All input has been flushed (or the writer was failed)
    Finish,
    /// The writer was failed
    Error(String),
}

/// Snapshot of writer progress, published to readers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterProgress {
    /// Bytes pushed so far
    pub size: u64,
    /// Bytes safely on disk, readable from the backing file
    pub flushed: u64,
    /// No more bytes will reach the file
    pub finished: bool,
    /// Set when the writer was failed or discarded
    pub error: Option<String>,
}

/// Flush state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Idle,
    /// A flush task is running; `dirty` asks it for one more pass
    Flushing { dirty: bool },
}

#[derive(Debug)]
struct WriterState {
    chunks: Vec<Chunk>,
    /// Index of the first buffered chunk
    next_chunk: usize,
    size: u64,
    flushed: u64,
    created: bool,
    ended: bool,
    finished: bool,
    flush: FlushState,
    error: Option<String>,
    observers: Vec<mpsc::UnboundedSender<WriterEvent>>,
}

impl WriterState {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            next_chunk: 0,
            size: 0,
            flushed: 0,
            created: false,
            ended: false,
            finished: false,
            flush: FlushState::Idle,
            error: None,
            observers: Vec::new(),
        }
    }

    fn emit(&mut self, event: WriterEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn progress(&self) -> WriterProgress {
        WriterProgress {
            size: self.size,
            flushed: self.flushed,
            finished: self.finished,
            error: self.error.clone(),
        }
    }

    fn has_pending(&self) -> bool {
        self.next_chunk < self.chunks.len()
    }
}

#[derive(Debug)]
struct WriterShared {
    path: PathBuf,
    state: Mutex<WriterState>,
    progress: watch::Sender<WriterProgress>,
}

/// Cache saver for one entry, readable while it is being written
///
/// Cloning yields another handle to the same writer.
#[derive(Debug, Clone)]
pub struct ChunkedWriter {
    shared: Arc<WriterShared>,
}

impl ChunkedWriter {
    /// Create a writer for the given backing file
    ///
    /// Nothing touches the disk until the first flush.
    pub fn new(path: PathBuf) -> Self {
        let (progress, _) = watch::channel(WriterProgress::default());
        Self {
            shared: Arc::new(WriterShared {
                path,
                state: Mutex::new(WriterState::new()),
                progress,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, WriterState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &WriterState) {
        self.shared.progress.send_replace(state.progress());
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Bytes pushed so far
    pub fn size(&self) -> u64 {
        self.state().size
    }

    /// Bytes on disk so far
    pub fn flushed(&self) -> u64 {
        self.state().flushed
    }

    /// Backing file has been created by this writer
    pub fn is_created(&self) -> bool {
        self.state().created
    }

    /// Producer has signaled the end of input
    pub fn is_ended(&self) -> bool {
        self.state().ended
    }

    /// All input is on disk, or the writer was failed
    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    /// Error recorded by `fail`, `discard` or an unrecoverable flush
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Snapshot of the chunk sequence
    pub fn chunks(&self) -> Vec<Chunk> {
        self.state().chunks.clone()
    }

    /// Check whether two handles refer to the same writer
    pub fn same_writer(&self, other: &ChunkedWriter) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Register an observer for data, finish and error events
    ///
    /// An observer registered after the writer finished receives the
    /// terminal events immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<WriterEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        if state.finished {
            if let Some(error) = &state.error {
                let _ = tx.send(WriterEvent::Error(error.clone()));
            }
            let _ = tx.send(WriterEvent::Finish);
        } else {
            state.observers.push(tx);
        }
        rx
    }

    /// Watch progress snapshots
    pub(crate) fn progress(&self) -> watch::Receiver<WriterProgress> {
        self.shared.progress.subscribe()
    }

    /// Append a chunk
    ///
    /// Observers are notified before this returns; the bytes reach the disk
    /// later from a background flush. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::WriterClosed` after `end`, `fail` or `discard`.
    pub fn push(&self, data: Bytes) -> CacheResult<()> {
        {
            let mut state = self.state();
            if state.ended {
                return Err(CacheError::WriterClosed {
                    path: self.shared.path.clone(),
                });
            }
            let offset = state.size;
            state.size += data.len() as u64;
            state.emit(WriterEvent::Data {
                bytes: data.clone(),
                offset,
            });
            state.chunks.push(Chunk::Buffered { offset, data });
            self.publish(&state);
        }
        self.schedule_flush();
        Ok(())
    }

    /// Signal that no more input will arrive
    ///
    /// `finish` is emitted once the remaining chunks are flushed. Calling this
    /// more than once is harmless.
    pub fn end(&self) {
        {
            let mut state = self.state();
            if state.finished {
                return;
            }
            state.ended = true;
        }
        self.schedule_flush();
    }

    /// Wait until the writer has finished
    pub async fn wait_finished(&self) {
        let mut rx = self.progress();
        loop {
            if rx.borrow_and_update().finished {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Fail the writer: notify observers, stop writing and delete the
    /// partially written file
    pub async fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Failing writer for {}: {}", self.shared.path.display(), reason);
        {
            let mut state = self.state();
            state.emit(WriterEvent::Error(reason.clone()));
            state.error.get_or_insert(reason);
        }
        self.close(true).await;
    }

    /// Release a writer that will not be promoted, deleting its file
    ///
    /// Attached readers see `reason` as an error.
    pub async fn discard(&self, reason: impl Into<String>) {
        {
            let mut state = self.state();
            state.error.get_or_insert_with(|| reason.into());
        }
        self.close(true).await;
    }

    /// Release in-memory resources, keeping the backing file
    pub fn destroy(&self) {
        let mut state = self.state();
        state.ended = true;
        Self::finish_locked(&mut state);
        state.chunks.clear();
        state.next_chunk = 0;
        state.observers.clear();
        self.publish(&state);
    }

    async fn close(&self, delete_file: bool) {
        let created = {
            let created = self.state().created;
            self.destroy();
            created
        };
        if delete_file && created {
            remove_file_best_effort(&self.shared.path).await;
        }
    }

    /// Create a reader that follows this writer until it finishes
    pub fn create_read_stream(&self, options: ReadOptions) -> FileReader {
        FileReader::follow(self, options)
    }

    fn finish_locked(state: &mut WriterState) {
        if state.finished {
            return;
        }
        state.ended = true;
        state.finished = true;
        state.emit(WriterEvent::Finish);
    }

    fn schedule_flush(&self) {
        {
            let mut state = self.state();
            if state.finished {
                return;
            }
            match state.flush {
                FlushState::Flushing { .. } => {
                    state.flush = FlushState::Flushing { dirty: true };
                    return;
                }
                FlushState::Idle => state.flush = FlushState::Flushing { dirty: false },
            }
        }
        let writer = self.clone();
        tokio::spawn(async move { writer.run_flush().await });
    }

    async fn run_flush(&self) {
        loop {
            let written = self.flush_pass().await;

            let mut state = self.state();
            if state.finished {
                state.flush = FlushState::Idle;
                return;
            }
            let dirty = matches!(state.flush, FlushState::Flushing { dirty: true });
            if written > 0 || dirty {
                state.flush = FlushState::Flushing { dirty: false };
                continue;
            }

            state.flush = FlushState::Idle;
            if state.ended {
                if state.has_pending() {
                    let pending = state.size - state.flushed;
                    let reason = format!(
                        "{} bytes could not be written to {}",
                        pending,
                        self.shared.path.display()
                    );
                    warn!("{}", reason);
                    state.emit(WriterEvent::Error(reason.clone()));
                    state.error.get_or_insert(reason);
                }
                Self::finish_locked(&mut state);
                self.publish(&state);
            }
            return;
        }
    }

    /// Write buffered chunks in order, returning how many reached the disk
    async fn flush_pass(&self) -> usize {
        let (needs_create, flushed) = {
            let state = self.state();
            let create_empty = state.ended && !state.created;
            if state.finished || (!state.has_pending() && !create_empty) {
                return 0;
            }
            (!state.created, state.flushed)
        };

        let mut file = match self.open_backing_file(needs_create, flushed).await {
            Ok(file) => file,
            Err(e) => {
                debug!(
                    "Cannot open {} for flushing: {}",
                    self.shared.path.display(),
                    e
                );
                return 0;
            }
        };
        if needs_create {
            let finished = {
                let mut state = self.state();
                state.created = !state.finished;
                state.finished
            };
            if finished {
                drop(file);
                remove_file_best_effort(&self.shared.path).await;
                return 0;
            }
        }

        let mut written = 0;
        loop {
            let (index, data) = {
                let state = self.state();
                if state.finished {
                    break;
                }
                match state.chunks.get(state.next_chunk) {
                    Some(Chunk::Buffered { data, .. }) => (state.next_chunk, data.clone()),
                    _ => break,
                }
            };

            let result = match file.write_all(&data).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                debug!(
                    "Append to {} failed, will retry: {}",
                    self.shared.path.display(),
                    e
                );
                break;
            }

            let mut state = self.state();
            if state.finished {
                break;
            }
            if let Some(chunk) = state.chunks.get_mut(index) {
                *chunk = Chunk::Flushed {
                    offset: chunk.offset(),
                    length: data.len() as u64,
                };
            }
            state.next_chunk = index + 1;
            state.flushed += data.len() as u64;
            self.publish(&state);
            written += 1;
        }
        written
    }

    /// Open the backing file positioned at the end of the flushed bytes
    ///
    /// The file is cut back to `flushed` first, so a failed append never
    /// leaves a torn chunk in front of its retry.
    async fn open_backing_file(&self, create: bool, flushed: u64) -> std::io::Result<File> {
        if create {
            return OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.shared.path)
                .await;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.shared.path)
            .await?;
        file.set_len(flushed).await?;
        file.seek(SeekFrom::Start(flushed)).await?;
        Ok(file)
    }
}

/// Delete a file, ignoring a file that is already gone
pub(crate) async fn remove_file_best_effort(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
