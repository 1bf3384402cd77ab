//! Engine configuration.
//!
//! `SyncSettings` controls partition limits, refetch staleness, cascade
//! batch concurrency, and retry behavior. Hosts embedding the engine
//! deserialize it from whatever configuration file they already carry.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

// Default values for engine configuration
const DEFAULT_CATEGORY_PARTITION_LIMIT: usize = 64;
const DEFAULT_ITEM_PARTITION_LIMIT: usize = 64;
const DEFAULT_REWRITE_CONCURRENCY: usize = 8;
const DEFAULT_STALE_AFTER_MS: u64 = 30_000;
const DEFAULT_SIGNAL_CAPACITY: usize = 64;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 4_000;

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Maximum cached category partitions per store.
    pub category_partition_limit: usize,
    /// Maximum cached menu-item partitions per store (indicator partitions
    /// count against this limit too).
    pub item_partition_limit: usize,
    /// Concurrent per-item rewrite requests during reassign/merge/rename.
    pub rewrite_concurrency: usize,
    /// Bounded staleness window: partitions older than this are revalidated
    /// in the background on the next read.
    pub stale_after_ms: u64,
    /// Capacity of the in-process change-signal channel.
    pub signal_capacity: usize,
    /// Retry behavior for rate-limited idempotent bulk operations.
    pub retry: RetrySettings,
}

/// Retry policy for idempotent bulk operations that hit rate limiting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Ceiling on the exponential delay, before jitter.
    pub max_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            category_partition_limit: DEFAULT_CATEGORY_PARTITION_LIMIT,
            item_partition_limit: DEFAULT_ITEM_PARTITION_LIMIT,
            rewrite_concurrency: DEFAULT_REWRITE_CONCURRENCY,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl SyncSettings {
    /// Returns the category partition limit as NonZeroUsize, clamping to 1
    /// if zero.
    pub fn category_partition_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.category_partition_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the item partition limit as NonZeroUsize, clamping to 1 if
    /// zero.
    pub fn item_partition_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.item_partition_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the rewrite concurrency, clamping to 1 if zero.
    pub fn rewrite_concurrency_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.rewrite_concurrency).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Returns the signal channel capacity, clamping to 1 if zero.
    pub fn signal_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.signal_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Logging bootstrap settings for hosts that let the engine install the
/// global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}
