//! Process-wide configuration snapshot.
//!
//! The `OWNCLOUD_*` environment knobs are read once when the propagator is
//! constructed; the snapshot is immutable afterwards.

use std::time::Duration;

const DEFAULT_MAX_PARALLEL: usize = 6;
const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_FREE_SPACE_LIMIT: i64 = 250 * 1000 * 1000;
const DEFAULT_CRITICAL_FREE_SPACE_LIMIT: i64 = 50 * 1000 * 1000;

/// First suppression window of a fresh blacklist entry, in seconds.
const BLACKLIST_BASE_IGNORE_SECS: i64 = 25;
/// Upper bound of the doubling suppression window, in seconds.
const BLACKLIST_MAX_IGNORE_SECS: i64 = 24 * 60 * 60;
/// Failures beyond this count stop being tracked at all.
const BLACKLIST_MAX_RETRIES: i32 = 20;

/// Transfers below this size self-report as likely to finish quickly.
const LIKELY_QUICK_SIZE: i64 = 100 * 1024;

#[derive(Debug, Clone)]
pub struct PropagateConfig {
    /// Hard cap on concurrently active jobs.
    pub hard_max_parallel: usize,
    /// Uploads above this size switch to the chunked protocol.
    pub chunk_size: u64,
    pub http_timeout: Duration,
    /// Scheduling refuses further downloads below this much free space.
    pub free_space_limit: i64,
    /// Below this limit the whole propagation is in danger.
    pub critical_free_space_limit: i64,
    pub blacklist_base_ignore: i64,
    pub blacklist_max_ignore: i64,
    /// An entry updated past this many retries is dropped instead.
    pub blacklist_max_retries: i32,
    pub likely_quick_size: i64,
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for PropagateConfig {
    fn default() -> Self {
        Self {
            hard_max_parallel: DEFAULT_MAX_PARALLEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            free_space_limit: DEFAULT_FREE_SPACE_LIMIT,
            critical_free_space_limit: DEFAULT_CRITICAL_FREE_SPACE_LIMIT,
            blacklist_base_ignore: BLACKLIST_BASE_IGNORE_SECS,
            blacklist_max_ignore: BLACKLIST_MAX_IGNORE_SECS,
            blacklist_max_retries: BLACKLIST_MAX_RETRIES,
            likely_quick_size: LIKELY_QUICK_SIZE,
        }
    }
}

impl PropagateConfig {
    /// Snapshot the environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(max) = env_number::<usize>("OWNCLOUD_MAX_PARALLEL").filter(|m| *m > 0) {
            config.hard_max_parallel = max;
        }
        if let Some(chunk) = env_number::<u64>("OWNCLOUD_CHUNK_SIZE").filter(|c| *c > 0) {
            config.chunk_size = chunk;
        }
        if let Some(timeout) = env_number::<u64>("OWNCLOUD_TIMEOUT").filter(|t| *t > 0) {
            config.http_timeout = Duration::from_secs(timeout);
        }
        if let Some(limit) = env_number::<i64>("OWNCLOUD_FREE_SPACE_BYTES") {
            config.free_space_limit = limit;
        }
        if let Some(limit) = env_number::<i64>("OWNCLOUD_CRITICAL_FREE_SPACE_BYTES") {
            config.critical_free_space_limit = limit;
        }
        config.critical_free_space_limit = config
            .critical_free_space_limit
            .clamp(0, config.free_space_limit.max(0));
        config
    }

    /// Soft budget for transfer jobs. A network rate limit disables
    /// parallelism entirely.
    pub fn soft_max_parallel(&self, rate_limited: bool) -> usize {
        if rate_limited {
            return 1;
        }
        std::cmp::max(1, (self.hard_max_parallel + 1) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_budget_is_half_of_hard_rounded_up() {
        let mut config = PropagateConfig::default();
        config.hard_max_parallel = 6;
        assert_eq!(config.soft_max_parallel(false), 3);
        config.hard_max_parallel = 5;
        assert_eq!(config.soft_max_parallel(false), 3);
        config.hard_max_parallel = 1;
        assert_eq!(config.soft_max_parallel(false), 1);
    }

    #[test]
    fn rate_limit_forces_serial_transfers() {
        let config = PropagateConfig::default();
        assert_eq!(config.soft_max_parallel(true), 1);
    }

    #[test]
    fn critical_limit_never_exceeds_the_soft_limit() {
        let mut config = PropagateConfig::default();
        config.critical_free_space_limit = config.free_space_limit + 1;
        config.critical_free_space_limit = config
            .critical_free_space_limit
            .clamp(0, config.free_space_limit.max(0));
        assert!(config.critical_free_space_limit <= config.free_space_limit);
    }
}
