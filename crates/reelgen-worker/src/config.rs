//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle sleep between empty claim attempts
    pub poll_interval: Duration,
    /// Fallback fleet cap when the shared setting is unreadable
    pub max_concurrent_jobs: u32,
    /// Preferred health endpoint port (next free port is tried on conflict)
    pub health_port: u16,
    /// Master switch for all disk cleanup
    pub cleanup_enabled: bool,
    /// Working-directory retention after a failed job
    pub failure_retention: Duration,
    /// Working-directory retention after a successful job
    pub success_retention: Duration,
    /// Reaper deletes anything under the campaigns root older than this
    pub max_age: Duration,
    /// Capture cache entries older than this are evicted
    pub cache_ttl: Duration,
    /// Grace given to the in-flight job on shutdown before it is failed
    pub kill_timeout: Duration,
    /// Cap on the recorder's post-navigation network-idle wait, in ms
    pub page_wait_ms: u64,
    /// How long a fetched concurrency cap stays fresh
    pub cap_refresh: Duration,
    /// Root for working directories and the capture cache
    pub work_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            max_concurrent_jobs: 3,
            health_port: 3001,
            cleanup_enabled: true,
            failure_retention: Duration::from_secs(7 * 24 * 3600),
            success_retention: Duration::from_secs(3600),
            max_age: Duration::from_secs(30 * 24 * 3600),
            cache_ttl: Duration::from_secs(24 * 3600),
            kill_timeout: Duration::from_secs(30),
            page_wait_ms: 5000,
            cap_refresh: Duration::from_secs(15),
            work_dir: PathBuf::from("/tmp/reelgen"),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                env_parse("WORKER_POLL_INTERVAL").unwrap_or(2000),
            ),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS").unwrap_or(3),
            health_port: env_parse("HEALTH_PORT").unwrap_or(3001),
            cleanup_enabled: env_bool("CLEANUP_ENABLED").unwrap_or(true),
            failure_retention: Duration::from_secs(
                env_parse::<u64>("FAILED_RENDER_RETENTION_DAYS").unwrap_or(7) * 24 * 3600,
            ),
            success_retention: Duration::from_secs(
                env_parse::<u64>("SUCCESS_RENDER_RETENTION_HOURS").unwrap_or(1) * 3600,
            ),
            max_age: Duration::from_secs(
                env_parse::<u64>("CLEANUP_MAX_AGE_DAYS").unwrap_or(30) * 24 * 3600,
            ),
            cache_ttl: Duration::from_secs(
                env_parse::<u64>("CAPTURE_CACHE_TTL_HOURS").unwrap_or(24) * 3600,
            ),
            kill_timeout: Duration::from_secs(env_parse("WORKER_KILL_TIMEOUT_SECS").unwrap_or(30)),
            page_wait_ms: env_parse("RECORDER_PAGE_WAIT_MS").unwrap_or(5000),
            cap_refresh: defaults.cap_refresh,
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.health_port, 3001);
        assert!(config.cleanup_enabled);
        assert_eq!(config.success_retention, Duration::from_secs(3600));
        assert_eq!(config.failure_retention, Duration::from_secs(604800));
        assert_eq!(config.kill_timeout, Duration::from_secs(30));
        assert_eq!(config.cap_refresh, Duration::from_secs(15));
    }
}
