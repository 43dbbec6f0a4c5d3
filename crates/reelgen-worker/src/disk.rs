//! Working-directory lifecycle and disk retention.
//!
//! Delayed deletions are persisted as tombstone files inside the directory
//! they condemn, so a worker restart cannot leak disk: the periodic reaper
//! honors tombstones, evicts expired cache entries, and sweeps anything
//! older than the maximum age by mtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Tombstone file name inside a condemned working directory.
const TOMBSTONE_FILE: &str = ".delete_after";

/// Fine-grained sweep interval (tombstones, cache TTL).
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Coarse sweeps (max-age purge) run once per this many fine sweeps.
const DEEP_SWEEP_EVERY: u32 = 24;

/// Disk retention policy.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub success_retention: Duration,
    pub failure_retention: Duration,
    pub max_age: Duration,
    pub cache_ttl: Duration,
    pub enabled: bool,
}

impl From<&WorkerConfig> for RetentionPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            success_retention: config.success_retention,
            failure_retention: config.failure_retention,
            max_age: config.max_age,
            cache_ttl: config.cache_ttl,
            enabled: config.cleanup_enabled,
        }
    }
}

/// Owns the per-job working directories, the capture-cache directory, and
/// their deletion schedules.
#[derive(Clone)]
pub struct DiskManager {
    root: PathBuf,
    policy: RetentionPolicy,
}

impl DiskManager {
    pub fn new(root: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Root holding one directory per campaign, each holding one per job.
    pub fn campaigns_root(&self) -> PathBuf {
        self.root.join("campaigns")
    }

    /// Shared capture-cache directory.
    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Create the working directory for a claimed job.
    pub async fn create_workdir(&self, campaign_id: &str, job_id: &str) -> WorkerResult<PathBuf> {
        let dir = self.campaigns_root().join(campaign_id).join(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Created working directory");
        Ok(dir)
    }

    /// Delete a working directory now. Failures are logged, never raised.
    pub async fn delete_workdir(&self, dir: &Path) {
        if !self.policy.enabled {
            debug!(dir = %dir.display(), "Cleanup disabled, keeping directory");
            return;
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => info!(dir = %dir.display(), "Deleted working directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to delete working directory"),
        }
    }

    /// Condemn a directory: write a tombstone the reaper honors after the
    /// retention period. Survives restarts.
    pub async fn schedule_deletion(&self, dir: &Path, after: Duration) {
        let deadline =
            Utc::now() + chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
        let tombstone = dir.join(TOMBSTONE_FILE);
        match tokio::fs::write(&tombstone, deadline.to_rfc3339()).await {
            Ok(()) => debug!(dir = %dir.display(), %deadline, "Scheduled deletion"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to write tombstone"),
        }
    }

    /// Convenience wrappers for the two retention classes.
    pub async fn retain_success(&self, dir: &Path) {
        self.schedule_deletion(dir, self.policy.success_retention)
            .await;
    }

    pub async fn retain_failure(&self, dir: &Path) {
        self.schedule_deletion(dir, self.policy.failure_retention)
            .await;
    }

    /// Delete every workdir whose tombstone deadline has passed. Returns the
    /// number of directories removed.
    pub async fn sweep_tombstones(&self) -> usize {
        if !self.policy.enabled {
            return 0;
        }
        let mut removed = 0;
        for job_dir in self.job_dirs().await {
            let tombstone = job_dir.join(TOMBSTONE_FILE);
            let Ok(contents) = tokio::fs::read_to_string(&tombstone).await else {
                continue;
            };
            let due = match contents.trim().parse::<DateTime<Utc>>() {
                Ok(deadline) => deadline <= Utc::now(),
                // An unreadable tombstone is treated as overdue.
                Err(_) => true,
            };
            if due {
                self.delete_workdir(&job_dir).await;
                removed += 1;
            }
        }
        removed
    }

    /// Evict cache entries older than the cache TTL by mtime.
    pub async fn sweep_cache(&self) -> usize {
        if !self.policy.enabled {
            return 0;
        }
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(self.cache_root()).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry_older_than(&entry.path(), self.policy.cache_ttl).await {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Cache eviction failed")
                    }
                }
            }
        }
        if removed > 0 {
            info!(removed, "Evicted expired cache entries");
        }
        removed
    }

    /// Safety net: delete any campaign entry older than the maximum age by
    /// mtime, tombstoned or not.
    pub async fn sweep_stale(&self) -> usize {
        if !self.policy.enabled {
            return 0;
        }
        let mut removed = 0;
        for job_dir in self.job_dirs().await {
            if entry_older_than(&job_dir, self.policy.max_age).await {
                self.delete_workdir(&job_dir).await;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Reaped stale working directories");
        }
        removed
    }

    async fn job_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let Ok(mut campaigns) = tokio::fs::read_dir(self.campaigns_root()).await else {
            return dirs;
        };
        while let Ok(Some(campaign)) = campaigns.next_entry().await {
            let Ok(mut jobs) = tokio::fs::read_dir(campaign.path()).await else {
                continue;
            };
            while let Ok(Some(job)) = jobs.next_entry().await {
                if job.path().is_dir() {
                    dirs.push(job.path());
                }
            }
        }
        dirs
    }

    /// Periodic reaper task: tombstones and cache TTL every sweep, max-age
    /// purge on startup and then daily.
    pub fn spawn_reaper(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = 0u32;
            self.sweep_stale().await;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                self.sweep_tombstones().await;
                self.sweep_cache().await;
                ticks += 1;
                if ticks % DEEP_SWEEP_EVERY == 0 {
                    self.sweep_stale().await;
                }
            }
        })
    }
}

/// Whether a path's mtime is older than `age`.
async fn entry_older_than(path: &Path, age: Duration) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    modified
        .elapsed()
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(enabled: bool) -> RetentionPolicy {
        RetentionPolicy {
            success_retention: Duration::from_secs(3600),
            failure_retention: Duration::from_secs(7 * 24 * 3600),
            max_age: Duration::from_secs(30 * 24 * 3600),
            cache_ttl: Duration::from_secs(24 * 3600),
            enabled,
        }
    }

    #[tokio::test]
    async fn test_create_and_delete_workdir() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(true));

        let dir = disk.create_workdir("c1", "j1").await.unwrap();
        assert!(dir.exists());
        assert!(dir.ends_with("campaigns/c1/j1"));

        disk.delete_workdir(&dir).await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_tombstone_due_in_future_survives_sweep() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(true));
        let dir = disk.create_workdir("c1", "j1").await.unwrap();

        disk.schedule_deletion(&dir, Duration::from_secs(3600)).await;
        assert_eq!(disk.sweep_tombstones().await, 0);
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_tombstone_past_due_is_reaped() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(true));
        let dir = disk.create_workdir("c1", "j1").await.unwrap();

        disk.schedule_deletion(&dir, Duration::ZERO).await;
        assert_eq!(disk.sweep_tombstones().await, 1);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_unreadable_tombstone_is_reaped() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(true));
        let dir = disk.create_workdir("c1", "j1").await.unwrap();

        tokio::fs::write(dir.join(TOMBSTONE_FILE), b"garbage")
            .await
            .unwrap();
        assert_eq!(disk.sweep_tombstones().await, 1);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_cleanup_disabled_keeps_everything() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(false));
        let dir = disk.create_workdir("c1", "j1").await.unwrap();

        disk.schedule_deletion(&dir, Duration::ZERO).await;
        assert_eq!(disk.sweep_tombstones().await, 0);
        disk.delete_workdir(&dir).await;
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_untombstoned_dir_untouched_by_tombstone_sweep() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(true));
        let dir = disk.create_workdir("c1", "j1").await.unwrap();

        assert_eq!(disk.sweep_tombstones().await, 0);
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_fresh_cache_entry_survives_ttl_sweep() {
        let root = TempDir::new().unwrap();
        let disk = DiskManager::new(root.path(), policy(true));
        tokio::fs::create_dir_all(disk.cache_root()).await.unwrap();
        let entry = disk.cache_root().join("abc.mp4");
        tokio::fs::write(&entry, b"fresh").await.unwrap();

        assert_eq!(disk.sweep_cache().await, 0);
        assert!(entry.exists());
    }

    #[tokio::test]
    async fn test_stale_sweep_uses_mtime() {
        let root = TempDir::new().unwrap();
        let mut pol = policy(true);
        pol.max_age = Duration::ZERO;
        let disk = DiskManager::new(root.path(), pol);
        let dir = disk.create_workdir("c1", "j1").await.unwrap();

        // With a zero max age everything is stale.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(disk.sweep_stale().await, 1);
        assert!(!dir.exists());
    }
}
