//! Scriptable download session for tests

use std::time::Duration;

use super::session::{ByteRange, DownloadSession, Headers, SessionId, SessionOptions};

#[derive(Debug, Clone)]
pub struct MockSession {
    options: SessionOptions,
    url: String,
    total_content_length: Option<u64>,
    headers: Option<Headers>,
    status: u16,
    errors: Vec<String>,
    received: Option<u64>,
    range: Option<ByteRange>,
}

impl MockSession {
    pub fn new(url: &str, uid: SessionId) -> Self {
        Self {
            options: SessionOptions {
                uid,
                cache_ttl: Duration::from_secs(3_600),
                persistent: false,
            },
            url: url.to_string(),
            total_content_length: None,
            headers: None,
            status: 200,
            errors: Vec::new(),
            received: None,
            range: None,
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_total_length(mut self, length: u64) -> Self {
        self.total_content_length = Some(length);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_received(mut self, received: u64) -> Self {
        self.received = Some(received);
        self
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}

impl DownloadSession for MockSession {
    fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn current_url(&self) -> &str {
        &self.url
    }

    fn total_content_length(&self) -> Option<u64> {
        self.total_content_length
    }

    fn last_headers_received(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    fn last_status_code_received(&self) -> Option<u16> {
        Some(self.status)
    }

    fn status_code(&self) -> u16 {
        self.status
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }

    fn received(&self) -> u64 {
        self.received
            .or(self.total_content_length)
            .unwrap_or_default()
    }

    fn requesting_range(&self) -> Option<ByteRange> {
        self.range
    }
}
