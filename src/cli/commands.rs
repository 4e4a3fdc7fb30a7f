//! Command handlers for the download cache CLI
//!
//! Each handler opens the cache index described by the configuration and
//! global flags, performs one operation and prints a short report.

use tracing::{debug, info};

use crate::app::cache::{format_bytes, unix_now, CacheConfig, CacheIndex, IndexSnapshot};
use crate::cli::{Commands, GlobalArgs};
use crate::config::AppConfig;
use crate::errors::Result;

/// Build the cache configuration for a CLI run
///
/// Unreferenced files are only cleaned up when attached to a terminal, so a
/// background invocation never deletes a file a live downloader may still be
/// creating.
pub fn cache_config(global: &GlobalArgs, config: &AppConfig) -> CacheConfig {
    let mut cache = config.cache.clone();
    if let Some(root) = &global.cache_dir {
        cache.cache_root = Some(root.clone());
    }
    let foreground = atty::is(atty::Stream::Stdout);
    let grace = cache.orphan_grace;
    cache.with_orphan_cleanup(foreground, grace)
}

/// Open and reconcile the cache index
pub async fn open_index(cache: CacheConfig) -> Result<CacheIndex> {
    let index = CacheIndex::new(cache)?;
    let report = index.start().await?;
    debug!("Startup reconciliation: {:?}", report);
    if report.truncated {
        println!("⚠️  Cache directory had no index and was emptied");
    }
    Ok(index)
}

/// Dispatch a parsed command
pub async fn handle_command(command: Commands, index: &CacheIndex) -> Result<()> {
    match command {
        Commands::Info => handle_info(index).await,
        Commands::List { json } => handle_list(index, json).await,
        Commands::Maintain => handle_maintain(index).await,
        Commands::Remove { url } => handle_remove(index, &url).await,
        Commands::Clear { yes } => handle_clear(index, yes).await,
    }
}

/// Show cache location and usage
pub async fn handle_info(index: &CacheIndex) -> Result<()> {
    let stats = index.stats().await;

    println!("💾 Cache Information");
    println!("===================");
    println!("Location: {}", stats.cache_dir.display());
    println!("Index: {}", index.index_file().display());
    println!("Cached entries: {}", stats.file_entries);
    println!("In-flight entries: {}", stats.saving_entries);
    println!(
        "Cache size: {} of {} ({:.1}%)",
        stats.format_indexed_size(),
        stats.format_quota(),
        stats.usage_percentage()
    );
    Ok(())
}

/// List exported entries
pub async fn handle_list(index: &CacheIndex, json: bool) -> Result<()> {
    let snapshot = index.export().await;

    if json {
        let text = serde_json::to_string_pretty(&snapshot)
            .map_err(crate::errors::CacheError::from)?;
        println!("{}", text);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("ℹ️  No cached entries");
        return Ok(());
    }
    for line in format_listing(&snapshot, unix_now()) {
        println!("{}", line);
    }
    Ok(())
}

fn format_listing(snapshot: &IndexSnapshot, now: i64) -> Vec<String> {
    snapshot
        .iter()
        .map(|(url, entry)| {
            let size = entry
                .size
                .map(format_bytes)
                .unwrap_or_else(|| "?".to_string());
            format!("{:>10}  expires in {:>6}s  {}", size, entry.ttl - now, url)
        })
        .collect()
}

/// Run one maintenance cycle
pub async fn handle_maintain(index: &CacheIndex) -> Result<()> {
    match index.maintenance().await {
        Some(report) => {
            info!("Maintenance finished: {:?}", report);
            println!("🧹 Cache Maintenance");
            println!("===================");
            println!("Expired entries removed: {}", report.expired);
            println!("Entries evicted for quota: {}", report.evicted);
            println!("Next cycle due in: {}s", report.next_delay.as_secs());
        }
        None => println!("ℹ️  Maintenance already running"),
    }
    Ok(())
}

/// Remove one entry
pub async fn handle_remove(index: &CacheIndex, url: &str) -> Result<()> {
    if index.remove(url).await {
        println!("🗑️  Removed {}", url);
    } else {
        println!("ℹ️  No cache entry for {}", url);
    }
    Ok(())
}

/// Empty the cache
pub async fn handle_clear(index: &CacheIndex, confirmed: bool) -> Result<()> {
    if !confirmed {
        println!("⚠️  This will remove ALL cached files!");
        println!("   Re-run with --yes to confirm.");
        return Ok(());
    }
    let entries = index.len().await;
    index.truncate().await;
    println!("🧹 Removed {} entries from {}", entries, index.cache_dir().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cache::ExportedEntry;
    use tempfile::TempDir;

    #[test]
    fn test_cache_dir_flag_overrides_config() {
        let global = GlobalArgs {
            cache_dir: Some("/tmp/override".into()),
            ..Default::default()
        };
        let config = AppConfig::default();
        let cache = cache_config(&global, &config);
        assert_eq!(cache.cache_root, Some("/tmp/override".into()));
        assert_eq!(cache.orphan_grace, config.cache.orphan_grace);
    }

    #[test]
    fn test_listing_format() {
        let mut snapshot = IndexSnapshot::new();
        snapshot.insert(
            "https://example.com/a.ts".to_string(),
            ExportedEntry {
                time: 0,
                ttl: 160,
                size: Some(2048),
            },
        );
        let lines = format_listing(&snapshot, 100);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("2.00 KB"));
        assert!(lines[0].contains("60s"));
        assert!(lines[0].ends_with("https://example.com/a.ts"));
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation() {
        let temp_dir = TempDir::new().unwrap();
        let index = open_index(CacheConfig::with_cache_root(temp_dir.path().to_path_buf()))
            .await
            .unwrap();
        let marker = index.cache_dir().join("dcc-keep.bin");
        tokio::fs::write(&marker, b"x").await.unwrap();

        handle_clear(&index, false).await.unwrap();
        assert!(marker.exists());

        handle_clear(&index, true).await.unwrap();
        assert!(!marker.exists());
    }
}
