//! Cache statistics
//!
//! Counts of finalized and in-flight entries plus usage against the quota.

use std::path::PathBuf;

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Cache directory
    pub cache_dir: PathBuf,
    /// Number of finalized entries
    pub file_entries: usize,
    /// Number of entries still being saved
    pub saving_entries: usize,
    /// Total declared size of finalized entries in bytes
    pub indexed_bytes: u64,
    /// Bytes received so far by entries still being saved
    pub saving_bytes: u64,
    /// Disk quota in bytes
    pub quota: u64,
}

impl CacheStats {
    /// Create empty statistics
    pub fn new(cache_dir: PathBuf, quota: u64) -> Self {
        Self {
            cache_dir,
            file_entries: 0,
            saving_entries: 0,
            indexed_bytes: 0,
            saving_bytes: 0,
            quota,
        }
    }

    /// Count one finalized entry
    pub fn add_file(&mut self, size: u64) {
        self.file_entries += 1;
        self.indexed_bytes = self.indexed_bytes.saturating_add(size);
    }

    /// Count one in-flight entry
    pub fn add_saving(&mut self, received: u64) {
        self.saving_entries += 1;
        self.saving_bytes = self.saving_bytes.saturating_add(received);
    }

    /// Total number of entries
    pub fn total_entries(&self) -> usize {
        self.file_entries + self.saving_entries
    }

    /// Finalized bytes as a percentage of the quota
    pub fn usage_percentage(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }
        (self.indexed_bytes as f64 / self.quota as f64) * 100.0
    }

    /// Check if usage is over a percentage of the quota
    pub fn is_near_capacity(&self, threshold_percentage: f64) -> bool {
        self.usage_percentage() > threshold_percentage
    }

    /// Format finalized size in human-readable format
    pub fn format_indexed_size(&self) -> String {
        format_bytes(self.indexed_bytes)
    }

    /// Format quota in human-readable format
    pub fn format_quota(&self) -> String {
        format_bytes(self.quota)
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_state() {
        let mut stats = CacheStats::new(PathBuf::from("/cache"), 1000);
        stats.add_file(100);
        stats.add_file(150);
        stats.add_saving(20);

        assert_eq!(stats.file_entries, 2);
        assert_eq!(stats.saving_entries, 1);
        assert_eq!(stats.total_entries(), 3);
        assert_eq!(stats.indexed_bytes, 250);
        assert_eq!(stats.saving_bytes, 20);
    }

    #[test]
    fn test_usage_percentage() {
        let mut stats = CacheStats::new(PathBuf::from("/cache"), 0);
        stats.add_file(10);
        assert_eq!(stats.usage_percentage(), 0.0);

        let mut stats = CacheStats::new(PathBuf::from("/cache"), 1000);
        stats.add_file(900);
        assert!((stats.usage_percentage() - 90.0).abs() < 0.1);
        assert!(stats.is_near_capacity(80.0));
        assert!(!stats.is_near_capacity(95.0));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }
}
