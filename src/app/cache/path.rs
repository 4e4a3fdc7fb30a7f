//! Backing file path generation
//!
//! Every cached URL maps to exactly one backing file whose name is derived
//! deterministically from the URL, so independent processes sharing a cache
//! folder agree on where a URL lives without coordinating.

use std::path::{Path, PathBuf};

use crate::constants::files;

/// Path generation utility for cache files
pub struct PathGenerator;

impl PathGenerator {
    /// Get the backing file path for a URL
    ///
    /// Structure: `{cache_dir}/dcc-{sanitized-url}.bin`, where the scheme is
    /// stripped and each run of non-alphanumeric characters becomes a single
    /// `-`. The name is truncated so the whole path stays within
    /// [`files::MAX_PATH_LENGTH`] characters.
    pub fn backing_file_path(cache_dir: &Path, url: &str) -> PathBuf {
        let folder_len = cache_dir.to_string_lossy().chars().count() + 1;
        let budget = files::MAX_PATH_LENGTH
            .saturating_sub(folder_len + files::BACKING_FILE_EXTENSION.len() + 1);

        let mut name = String::with_capacity(url.len() + files::BACKING_FILE_PREFIX.len());
        name.push_str(files::BACKING_FILE_PREFIX);
        name.push_str(&Self::sanitize(url));
        name.truncate(budget);

        cache_dir.join(format!("{}.{}", name, files::BACKING_FILE_EXTENSION))
    }

    /// Get the index file path inside a cache directory
    pub fn index_file_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(files::INDEX_FILE_NAME)
    }

    /// Strip the http(s) scheme and collapse non-alphanumeric runs into `-`
    pub fn sanitize(url: &str) -> String {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);

        let mut out = String::with_capacity(rest.len());
        let mut in_separator = false;
        for c in rest.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c);
                in_separator = false;
            } else if !in_separator {
                out.push('-');
                in_separator = true;
            }
        }
        out
    }

    /// Check whether a path names a backing file
    pub fn is_backing_file(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(files::BACKING_FILE_PREFIX)
            && path.extension().and_then(|e| e.to_str()) == Some(files::BACKING_FILE_EXTENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_scheme_and_collapses_runs() {
        assert_eq!(
            PathGenerator::sanitize("https://cdn.example.com/live/index.m3u8?token=a&b=c"),
            "cdn-example-com-live-index-m3u8-token-a-b-c"
        );
        assert_eq!(
            PathGenerator::sanitize("http://host//a--b"),
            "host-a-b"
        );
        assert_eq!(PathGenerator::sanitize("ftp://x"), "ftp-x");
    }

    #[test]
    fn test_backing_file_path() {
        let dir = Path::new("/var/cache/dlcache");
        let path = PathGenerator::backing_file_path(dir, "https://example.com/video.ts");
        assert_eq!(
            path,
            PathBuf::from("/var/cache/dlcache/dcc-example-com-video-ts.bin")
        );
        assert!(PathGenerator::is_backing_file(&path));
    }

    #[test]
    fn test_backing_file_path_is_truncated() {
        let dir = Path::new("/var/cache/dlcache");
        let url = format!("https://example.com/{}", "a".repeat(1000));
        let path = PathGenerator::backing_file_path(dir, &url);
        assert!(path.to_string_lossy().chars().count() <= files::MAX_PATH_LENGTH);
        assert!(PathGenerator::is_backing_file(&path));
    }

    #[test]
    fn test_same_url_same_path() {
        let dir = Path::new("/c");
        assert_eq!(
            PathGenerator::backing_file_path(dir, "https://a/b"),
            PathGenerator::backing_file_path(dir, "https://a/b")
        );
    }

    #[test]
    fn test_index_file_is_not_backing_file() {
        let dir = Path::new("/c");
        assert!(!PathGenerator::is_backing_file(
            &PathGenerator::index_file_path(dir)
        ));
    }
}
