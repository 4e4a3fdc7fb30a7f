//! Expiry and quota maintenance
//!
//! A maintenance cycle reloads peer state, evicts expired entries plus the
//! soonest-expiring entries needed to bring usage under the disk quota, and
//! tells the caller when the next cycle is due. [`MaintenanceTask`] runs
//! cycles in the background until it is shut down.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::entry::{unix_now, EntryState};
use super::index::CacheIndex;
use super::writer::remove_file_best_effort;

/// Why an entry was evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Expired,
    Quota,
}

/// One finalized entry considered for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub url: String,
    pub ttl: i64,
    pub size: u64,
}

impl EvictionCandidate {
    fn is_expired(&self, now: i64) -> bool {
        now > self.ttl
    }
}

/// Result of planning one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub evicted: Vec<(String, EvictionReason)>,
    /// Unix time at which the first kept entry expires
    pub next_run: Option<i64>,
}

/// Decide which entries to evict
///
/// Candidates are walked by ascending TTL. Expired ones always go; the rest
/// go while the bytes still kept are at or over `quota`, so the earliest
/// expiring are dropped first.
pub fn plan_eviction(mut candidates: Vec<EvictionCandidate>, now: i64, quota: u64) -> EvictionPlan {
    candidates.sort_by(|a, b| a.ttl.cmp(&b.ttl).then_with(|| a.url.cmp(&b.url)));

    let mut remaining = candidates
        .iter()
        .filter(|c| !c.is_expired(now))
        .fold(0u64, |total, c| total.saturating_add(c.size));
    let mut plan = EvictionPlan::default();

    for candidate in candidates {
        if candidate.is_expired(now) {
            plan.evicted.push((candidate.url, EvictionReason::Expired));
        } else if remaining >= quota {
            remaining = remaining.saturating_sub(candidate.size);
            plan.evicted.push((candidate.url, EvictionReason::Quota));
        } else if plan.next_run.is_none() {
            plan.next_run = Some(candidate.ttl.saturating_add(1));
        }
    }
    plan
}

/// What one maintenance cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
    /// Delay until the next cycle
    pub next_delay: Duration,
}

impl CacheIndex {
    /// Run one maintenance cycle now
    ///
    /// Returns `None` if another cycle is already in progress.
    pub async fn maintenance(&self) -> Option<MaintenanceReport> {
        self.maintenance_at(unix_now()).await
    }

    /// Run one maintenance cycle as of `now`
    pub async fn maintenance_at(&self, now: i64) -> Option<MaintenanceReport> {
        let Ok(_guard) = self.shared.maintenance_lock.try_lock() else {
            debug!("Maintenance already running, skipping");
            return None;
        };

        self.reload().await;

        let plan = {
            let mut entries = self.shared.entries.write().await;
            let candidates = entries
                .iter()
                .filter(|(_, entry)| !entry.is_saving())
                .map(|(url, entry)| EvictionCandidate {
                    url: url.clone(),
                    ttl: entry.ttl,
                    size: entry.size.unwrap_or_default(),
                })
                .collect();
            let plan = plan_eviction(candidates, now, self.shared.config.max_disk_usage);

            for (url, reason) in &plan.evicted {
                if let Some(entry) = entries.remove(url) {
                    if let EntryState::File(path) = &entry.state {
                        remove_file_best_effort(path).await;
                    }
                    debug!("Evicted {} ({:?})", url, reason);
                }
            }
            plan
        };

        let expired = plan
            .evicted
            .iter()
            .filter(|(_, reason)| *reason == EvictionReason::Expired)
            .count();
        let evicted = plan.evicted.len() - expired;

        if !plan.evicted.is_empty() {
            self.publish_update().await;
        }
        self.persist_or_log().await;

        let max_interval = self.shared.config.max_maintenance_interval;
        let next_delay = match plan.next_run {
            Some(next) => {
                let secs = next.saturating_sub(now).max(0) as u64;
                Duration::from_secs(secs).min(max_interval)
            }
            None => max_interval,
        };

        if expired > 0 || evicted > 0 {
            info!(
                "Cache maintenance: {} expired, {} evicted for quota",
                expired, evicted
            );
        }
        debug!(
            "Cache index {} next maintenance in {:?}",
            self.shared.instance_id, next_delay
        );

        Some(MaintenanceReport {
            expired,
            evicted,
            next_delay,
        })
    }

    /// Start the background maintenance loop
    ///
    /// The first cycle runs after the configured initial delay; each later
    /// cycle is scheduled once the previous one has finished.
    pub fn spawn_maintenance(&self) -> MaintenanceTask {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let index = self.clone();

        let handle = tokio::spawn(async move {
            let mut delay = index.shared.config.initial_maintenance_delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => {
                        debug!("Maintenance task received shutdown signal");
                        break;
                    }
                }

                delay = match index.maintenance().await {
                    Some(report) => report.next_delay,
                    None => index.shared.config.max_maintenance_interval,
                };
            }
        });

        MaintenanceTask {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to the background maintenance loop
#[derive(Debug)]
pub struct MaintenanceTask {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    /// Stop the loop and wait for it to exit
    ///
    /// A cycle already in progress completes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }

    /// Check if the loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, ttl: i64, size: u64) -> EvictionCandidate {
        EvictionCandidate {
            url: url.to_string(),
            ttl,
            size,
        }
    }

    #[test]
    fn test_expired_always_evicted() {
        let plan = plan_eviction(
            vec![candidate("a", 90, 1), candidate("b", 200, 1)],
            100,
            1_000,
        );
        assert_eq!(plan.evicted, vec![("a".to_string(), EvictionReason::Expired)]);
        assert_eq!(plan.next_run, Some(201));
    }

    #[test]
    fn test_quota_evicts_earliest_first() {
        let plan = plan_eviction(
            vec![
                candidate("t3", 300, 40),
                candidate("t1", 100, 40),
                candidate("t2", 200, 40),
            ],
            50,
            100,
        );
        assert_eq!(plan.evicted, vec![("t1".to_string(), EvictionReason::Quota)]);
        assert_eq!(plan.next_run, Some(201));
    }

    #[test]
    fn test_usage_at_quota_is_evicted() {
        let plan = plan_eviction(vec![candidate("a", 100, 50), candidate("b", 200, 50)], 0, 100);
        assert_eq!(plan.evicted, vec![("a".to_string(), EvictionReason::Quota)]);
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let plan = plan_eviction(
            vec![
                candidate("far", i64::MAX, u64::MAX),
                candidate("huge", i64::MAX - 1, u64::MAX),
                candidate("past", i64::MIN, 2),
            ],
            0,
            u64::MAX,
        );
        assert_eq!(
            plan.evicted,
            vec![
                ("past".to_string(), EvictionReason::Expired),
                ("huge".to_string(), EvictionReason::Quota),
            ]
        );
        assert_eq!(plan.next_run, Some(i64::MAX));
    }

    #[test]
    fn test_nothing_kept_has_no_next_run() {
        let plan = plan_eviction(vec![candidate("a", 10, 1)], 100, 1_000);
        assert_eq!(plan.next_run, None);
        assert!(plan_eviction(Vec::new(), 100, 1_000).evicted.is_empty());
    }
}
