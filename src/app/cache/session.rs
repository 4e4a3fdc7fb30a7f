//! Downloader-facing types
//!
//! The cache does not download anything itself. A downloader drives it by
//! calling [`CacheIndex::save`](super::CacheIndex::save) with a view of its
//! own state through the [`DownloadSession`] trait.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::http;

/// Response headers, keyed by lowercase header name
pub type Headers = BTreeMap<String, String>;

/// Identifier of one downloader invocation
pub type SessionId = u64;

/// Per-session options set by the downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Session identifier, used to reject chunks from competing sessions
    pub uid: SessionId,
    /// How long a response fetched by this session may be served from cache
    pub cache_ttl: Duration,
    /// Whether the downloader keeps the transfer open for live streams
    pub persistent: bool,
}

/// Byte range requested by the downloader (`end` is inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Check whether this range leaves out part of a resource of `total` bytes
    ///
    /// With an unknown total, only a nonzero start counts as partial.
    pub fn is_partial(&self, total: Option<u64>) -> bool {
        if self.start > 0 {
            return true;
        }
        match (self.end, total) {
            (Some(end), Some(total)) => end < total.saturating_sub(1),
            _ => false,
        }
    }
}

/// State a downloader exposes to the cache while a transfer runs
pub trait DownloadSession: Send + Sync {
    /// Session options
    fn options(&self) -> &SessionOptions;

    /// URL currently being fetched (the cache key)
    fn current_url(&self) -> &str;

    /// Total content length of the resource, if known
    fn total_content_length(&self) -> Option<u64>;

    /// Headers of the last response received
    fn last_headers_received(&self) -> Option<&Headers>;

    /// Status code of the last response received
    fn last_status_code_received(&self) -> Option<u16>;

    /// Final status code of the transfer
    fn status_code(&self) -> u16;

    /// Errors recorded during the transfer
    fn errors(&self) -> &[String];

    /// Bytes actually received from the network
    fn received(&self) -> u64;

    /// Range requested, if any
    fn requesting_range(&self) -> Option<ByteRange>;
}

/// What the cache remembers of a session once its transfer has ended
///
/// Captured at the final `save` call and checked after the writer finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub total_content_length: Option<u64>,
    pub status_code: u16,
    pub error_count: usize,
    pub received: u64,
}

impl TransferSummary {
    /// Capture the final state of a session
    pub fn capture(session: &dyn DownloadSession) -> Self {
        Self {
            total_content_length: session.total_content_length(),
            status_code: session.status_code(),
            error_count: session.errors().len(),
            received: session.received(),
        }
    }

    /// Check whether the status code is in the cacheable range
    pub fn has_cacheable_status(&self) -> bool {
        (http::MIN_CACHEABLE_STATUS..=http::MAX_CACHEABLE_STATUS).contains(&self.status_code)
    }

    /// A transfer that recorded errors but received nothing
    pub fn failed_without_data(&self) -> bool {
        self.error_count > 0 && self.received == 0
    }
}

/// Prepare headers for storage
///
/// A body that was transparently decompressed no longer matches its
/// `content-encoding`, and its compressed `content-length` no longer applies.
pub fn storable_headers(headers: Option<&Headers>) -> Headers {
    let mut headers = headers.cloned().unwrap_or_default();
    if headers.remove(http::CONTENT_ENCODING).is_some() {
        headers.remove(http::CONTENT_LENGTH);
    }
    headers
}

/// Parse the declared body length from stored headers
pub fn declared_length(headers: &Headers) -> Option<u64> {
    headers
        .get(http::CONTENT_LENGTH)
        .and_then(|v| v.trim().parse().ok())
}

/// Parse the response-declared expiry timestamp (unix seconds)
pub fn declared_expiry(headers: Option<&Headers>) -> Option<i64> {
    headers?
        .get(http::CACHE_TTL_HEADER)
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_range_partial_detection() {
        assert!(ByteRange { start: 100, end: None }.is_partial(Some(1000)));
        assert!(ByteRange { start: 0, end: Some(499) }.is_partial(Some(1000)));
        assert!(!ByteRange { start: 0, end: Some(999) }.is_partial(Some(1000)));
        assert!(!ByteRange { start: 0, end: None }.is_partial(Some(1000)));
        assert!(!ByteRange { start: 0, end: Some(10) }.is_partial(None));
    }

    #[test]
    fn test_storable_headers_strip_encoding() {
        let h = headers(&[
            ("content-encoding", "gzip"),
            ("content-length", "120"),
            ("content-type", "video/mp2t"),
        ]);
        let stored = storable_headers(Some(&h));
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.get("content-type").map(String::as_str), Some("video/mp2t"));
        assert_eq!(declared_length(&stored), None);
    }

    #[test]
    fn test_storable_headers_keep_length_without_encoding() {
        let h = headers(&[("content-length", "45")]);
        let stored = storable_headers(Some(&h));
        assert_eq!(declared_length(&stored), Some(45));
        assert!(storable_headers(None).is_empty());
    }

    #[test]
    fn test_declared_expiry() {
        let h = headers(&[("x-cache-ttl", "1700000000")]);
        assert_eq!(declared_expiry(Some(&h)), Some(1_700_000_000));
        assert_eq!(declared_expiry(None), None);
        let bad = headers(&[("x-cache-ttl", "soon")]);
        assert_eq!(declared_expiry(Some(&bad)), None);
    }

    #[test]
    fn test_summary_status_range() {
        let mut summary = TransferSummary {
            total_content_length: None,
            status_code: 200,
            error_count: 0,
            received: 10,
        };
        assert!(summary.has_cacheable_status());
        summary.status_code = 404;
        assert!(!summary.has_cacheable_status());
        summary.status_code = 199;
        assert!(!summary.has_cacheable_status());
        summary.error_count = 1;
        assert!(!summary.failed_without_data());
        summary.received = 0;
        assert!(summary.failed_without_data());
    }
}
