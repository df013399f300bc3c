//! Configuration for the lease registry and directory cache overlay.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables read once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of concurrent leases before LRU eviction kicks in.
    pub max_leases: usize,
    /// How long to wait for a lease break to be processed before forcing
    /// the lease to no caching and releasing it.
    pub lease_break_timeout: Duration,
    /// Period of the background expiry sweep. Defaults to twice the break
    /// timeout so a stuck break is always swept within one tick.
    pub lease_cleanup_interval: Duration,
    /// Idle bound used by the background sweep: leases not accessed for
    /// this long are removed.
    pub lease_max_age: Duration,
    /// Whether directory leases also register a change watcher.
    pub directory_notifications: bool,
    /// How long a directory cache entry stays fresh without an update.
    pub directory_max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let lease_break_timeout = Duration::from_secs(60);
        Self {
            max_leases: 1024,
            lease_break_timeout,
            lease_cleanup_interval: lease_break_timeout * 2,
            lease_max_age: lease_break_timeout * 2,
            directory_notifications: true,
            directory_max_age: Duration::from_millis(30_000),
        }
    }
}
