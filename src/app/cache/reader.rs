//! Read-while-write access to backing files
//!
//! A [`FileReader`] streams a cache entry's bytes from its backing file. When
//! attached to a writer that has not finished, it runs in persistent (follow)
//! mode: reaching the end of the flushed bytes makes it wait for the writer
//! instead of ending. Once the writer finishes, persistence is switched off
//! and the reader ends after the remaining bytes.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

use crate::constants::reader;
use crate::errors::{CacheError, CacheResult};

use super::writer::{ChunkedWriter, WriterProgress};

/// Byte range to read; `end` is inclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub start: u64,
    pub end: Option<u64>,
}

impl ReadOptions {
    /// Read a range starting at `start`
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    fn limit(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_add(1))
    }
}

#[derive(Debug)]
enum Source {
    /// Bounded by what the writer has flushed
    Writer(watch::Receiver<WriterProgress>),
    /// A finished file, read to its end
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Open,
    Ended,
    Closed,
}

/// Streaming view of one backing file
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    options: ReadOptions,
    position: u64,
    file: Option<File>,
    source: Source,
    state: ReaderState,
}

impl FileReader {
    /// Attach to a writer, following it until it finishes
    pub fn follow(writer: &ChunkedWriter, options: ReadOptions) -> Self {
        Self {
            path: writer.path().to_path_buf(),
            options,
            position: options.start,
            file: None,
            source: Source::Writer(writer.progress()),
            state: ReaderState::Open,
        }
    }

    /// Read a finished file
    pub fn open(path: impl AsRef<Path>, options: ReadOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
            position: options.start,
            file: None,
            source: Source::Complete,
            state: ReaderState::Open,
        }
    }

    /// Path being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next byte to be returned
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Still waiting for a writer past the current end of file
    pub fn is_persistent(&self) -> bool {
        match &self.source {
            Source::Writer(rx) => !rx.borrow().finished,
            Source::Complete => false,
        }
    }

    /// Destroyed by `destroy`
    pub fn is_closed(&self) -> bool {
        self.state == ReaderState::Closed
    }

    /// Close the file and detach from the writer
    ///
    /// Safe to call any number of times, including before the first read.
    pub fn destroy(&mut self) {
        self.state = ReaderState::Closed;
        self.file = None;
        self.source = Source::Complete;
    }

    /// Read the next chunk
    ///
    /// Returns `None` at the end of the entry (or after `destroy`), and an
    /// error if the writer was failed or the file cannot be read.
    pub async fn next_chunk(&mut self) -> Option<CacheResult<Bytes>> {
        loop {
            if self.state != ReaderState::Open {
                return None;
            }
            let limit = self.options.limit();
            if limit.is_some_and(|limit| self.position >= limit) {
                self.state = ReaderState::Ended;
                return None;
            }

            let progress = match &mut self.source {
                Source::Writer(rx) => Some(rx.borrow_and_update().clone()),
                Source::Complete => None,
            };

            if let Some(reason) = progress.as_ref().and_then(|p| p.error.clone()) {
                self.state = ReaderState::Ended;
                return Some(Err(CacheError::WriterFailed { reason }));
            }

            let available = progress.as_ref().map(|p| p.flushed);
            let mut stalled = false;
            if available.map_or(true, |available| self.position < available) {
                let mut want = reader::READ_BUFFER_SIZE as u64;
                if let Some(available) = available {
                    want = want.min(available - self.position);
                }
                if let Some(limit) = limit {
                    want = want.min(limit - self.position);
                }

                match self.read_at_position(want as usize).await {
                    Ok(bytes) if !bytes.is_empty() => {
                        self.position += bytes.len() as u64;
                        return Some(Ok(bytes));
                    }
                    Ok(_) if available.is_none() => {
                        self.state = ReaderState::Ended;
                        return None;
                    }
                    Ok(_) => stalled = true,
                    Err(e) => {
                        self.state = ReaderState::Ended;
                        return Some(Err(e));
                    }
                }
            }

            let Some(progress) = progress else {
                continue;
            };
            if progress.finished && (stalled || self.position >= progress.flushed) {
                self.state = ReaderState::Ended;
                return None;
            }
            self.wait_for_writer().await;
        }
    }

    async fn wait_for_writer(&mut self) {
        if let Source::Writer(rx) = &mut self.source {
            if rx.changed().await.is_err() {
                // Writer dropped; whatever is on disk is all there will be
                self.source = Source::Complete;
            }
        }
    }

    async fn read_at_position(&mut self, want: usize) -> CacheResult<Bytes> {
        if self.file.is_none() {
            let mut file = File::open(&self.path)
                .await
                .map_err(|e| CacheError::io(&self.path, e))?;
            file.seek(SeekFrom::Start(self.position))
                .await
                .map_err(|e| CacheError::io(&self.path, e))?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(Bytes::new());
        };

        let mut buf = vec![0u8; want];
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| CacheError::io(&self.path, e))?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Read everything that remains
    pub async fn read_to_end(&mut self) -> CacheResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Turn this reader into a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = CacheResult<Bytes>> {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_chunk().await.map(|item| (item, reader))
        })
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reader_follows_writer() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ChunkedWriter::new(temp_dir.path().join("dcc-follow.bin"));
        let mut reader = writer.create_read_stream(ReadOptions::default());
        assert!(reader.is_persistent());

        let producer = writer.clone();
        let task = tokio::spawn(async move {
            for part in [&b"first "[..], &b"second "[..], &b"third"[..]] {
                producer.push(Bytes::copy_from_slice(part)).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            producer.end();
        });

        let content = reader.read_to_end().await.unwrap();
        task.await.unwrap();
        assert_eq!(content, b"first second third");
        assert!(!reader.is_persistent());
    }

    #[tokio::test]
    async fn test_readers_before_and_after_finish_agree() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ChunkedWriter::new(temp_dir.path().join("dcc-agree.bin"));
        let early = writer.create_read_stream(ReadOptions::default());

        writer.push(Bytes::from_static(b"abc")).unwrap();
        writer.push(Bytes::from_static(b"defg")).unwrap();
        writer.end();

        let early: Vec<Bytes> = early
            .into_stream()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let early: Vec<u8> = early.concat();

        writer.wait_finished().await;
        let mut late = writer.create_read_stream(ReadOptions::default());
        assert!(!late.is_persistent());
        let late = late.read_to_end().await.unwrap();

        assert_eq!(early, b"abcdefg");
        assert_eq!(early, late);
    }

    #[tokio::test]
    async fn test_range_options() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dcc-range.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let mut reader = FileReader::open(
            &path,
            ReadOptions {
                start: 2,
                end: Some(5),
            },
        );
        assert_eq!(reader.read_to_end().await.unwrap(), b"2345");

        let mut tail = FileReader::open(&path, ReadOptions::from_offset(7));
        assert_eq!(tail.read_to_end().await.unwrap(), b"789");
    }

    #[tokio::test]
    async fn test_failed_writer_surfaces_error() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ChunkedWriter::new(temp_dir.path().join("dcc-fail.bin"));
        let mut reader = writer.create_read_stream(ReadOptions::default());

        writer.push(Bytes::from_static(b"partial")).unwrap();
        writer.fail("Removed").await;

        let mut saw_error = false;
        while let Some(chunk) = reader.next_chunk().await {
            if let Err(CacheError::WriterFailed { reason }) = chunk {
                assert_eq!(reason, "Removed");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ChunkedWriter::new(temp_dir.path().join("dcc-destroy.bin"));
        let mut reader = writer.create_read_stream(ReadOptions::default());

        reader.destroy();
        reader.destroy();
        assert!(reader.is_closed());
        assert!(reader.next_chunk().await.is_none());

        // Writer is unaffected by its readers
        writer.push(Bytes::from_static(b"x")).unwrap();
        writer.end();
        writer.wait_finished().await;
        assert_eq!(writer.size(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut reader = FileReader::open(temp_dir.path().join("absent.bin"), ReadOptions::default());
        assert!(matches!(
            reader.next_chunk().await,
            Some(Err(CacheError::Io { .. }))
        ));
        assert!(reader.next_chunk().await.is_none());
    }
}
