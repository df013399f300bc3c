//! Directory cache overlay.
//!
//! Binds a directory path to a lease key and a [`DirectoryCacheEntry`],
//! consumes lease-break and filesystem-change events, and answers
//! "can I serve this listing from cache?". Lease acquisition itself is
//! delegated to the [`LeaseManager`]; the overlay only derives cache
//! validity from what the registry currently grants.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::dir_cache::{DirectoryCacheEntry, DirectoryCacheScope, FileInfo};
use crate::error::Result;
use crate::lease::{LeaseKey, LeaseState};
use crate::registry::LeaseManager;

/// Kind of change reported for a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryChangeType {
    /// A child was created.
    FileAdded,
    /// A child was deleted.
    FileRemoved,
    /// A child's content changed.
    FileModified,
    /// A child's attributes changed.
    AttributesChanged,
    /// The directory itself was renamed.
    DirectoryRenamed,
}

/// Bookkeeping for one directory's change-notify registration. The
/// transport layer consults this to know which directories need a
/// change-notify request outstanding.
struct DirectoryWatcher {
    lease_key: LeaseKey,
    started: Instant,
}

/// Overlay that keeps directory caches coherent with their leases.
pub struct DirectoryLeaseManager {
    registry: Arc<LeaseManager>,
    config: CacheConfig,
    entries: RwLock<HashMap<String, Arc<DirectoryCacheEntry>>>,
    watchers: RwLock<HashMap<String, DirectoryWatcher>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl DirectoryLeaseManager {
    /// Creates an overlay without the background sweep. Useful when the
    /// caller drives [`LeaseManager::cleanup_expired_leases`] itself.
    pub fn new(registry: Arc<LeaseManager>, config: CacheConfig) -> Self {
        Self {
            registry,
            config,
            entries: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Creates an overlay and spawns the periodic lease expiry sweep.
    /// Must be called from within a tokio runtime.
    pub fn start(registry: Arc<LeaseManager>, config: CacheConfig) -> Arc<Self> {
        let mgr = Arc::new(Self::new(registry, config));
        mgr.spawn_sweeper();
        mgr
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let registry = Arc::clone(&self.registry);
        let period = self.config.lease_cleanup_interval;
        let max_age = self.config.lease_max_age;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = registry.cleanup_expired_leases(max_age);
                if removed > 0 {
                    debug!(removed, "lease expiry sweep");
                }
            }
        });
        *self.sweeper.lock().unwrap() = Some(handle);
    }

    /// Requests a directory lease for `path` and registers a cache entry
    /// bound to the granted key and `scope`. If change notifications are
    /// enabled, also starts a change watcher keyed to the lease. Reuses
    /// the existing cache entry when the registry reuses the lease.
    pub fn request_directory_lease(
        &self,
        path: &str,
        requested: LeaseState,
        scope: DirectoryCacheScope,
    ) -> LeaseKey {
        let key = self.registry.request_lease(path, requested);

        {
            let mut entries = self.entries.write().unwrap();
            let reused = entries
                .get(path)
                .is_some_and(|existing| existing.lease_key() == key);
            if !reused {
                entries.insert(
                    path.to_string(),
                    Arc::new(DirectoryCacheEntry::with_max_age(
                        path,
                        key,
                        scope,
                        self.config.directory_max_age,
                    )),
                );
                debug!(path, %key, ?scope, "directory cache entry registered");
            }
        }

        if self.config.directory_notifications {
            self.start_watcher(path, key);
        }
        key
    }

    /// The cache entry for `path`, re-validated against the registry when
    /// stale. Returns `None` if there is no entry or if its lease no
    /// longer grants read caching (in which case the entry is evicted).
    /// A possibly-stale entry whose lease is still good is returned
    /// as-is; staleness is advisory, not a hard barrier.
    pub fn get_cache_entry(&self, path: &str) -> Option<Arc<DirectoryCacheEntry>> {
        let entry = self.entries.read().unwrap().get(path).cloned()?;
        if entry.needs_refresh() && !self.lease_grants_read(entry.lease_key()) {
            debug!(path, "evicting cache entry whose lease lost read caching");
            self.stop_watcher(path);
            self.entries.write().unwrap().remove(path);
            return None;
        }
        Some(entry)
    }

    /// True only if a cache entry exists and the registry confirms its
    /// lease currently grants read caching.
    pub fn can_cache_directory_listing(&self, path: &str) -> bool {
        let Some(entry) = self.entries.read().unwrap().get(path).cloned() else {
            return false;
        };
        self.lease_grants_read(entry.lease_key())
    }

    /// The cached listing, only if it is a complete enumeration. A partial
    /// cache is never served as if complete.
    pub fn get_cached_directory_listing(&self, path: &str) -> Option<Vec<FileInfo>> {
        let entry = self.entries.read().unwrap().get(path).cloned()?;
        if entry.is_complete() {
            Some(entry.get_children())
        } else {
            None
        }
    }

    /// Replaces the cache with a freshly fetched full enumeration and
    /// marks it complete. Children no longer present on the server are
    /// pruned, so a deletion missed by notifications cannot survive a
    /// re-enumeration. This is the only path that can set completeness.
    /// Returns false if no cache entry is registered for `path`.
    pub fn update_directory_cache(&self, path: &str, listing: Vec<FileInfo>) -> bool {
        let Some(entry) = self.entries.read().unwrap().get(path).cloned() else {
            debug!(path, "no cache entry for enumeration update");
            return false;
        };
        entry.replace_listing(listing);
        true
    }

    /// Applies the minimum invalidation for one change notification.
    ///
    /// A new child cannot be safely synthesized into a partial-knowledge
    /// cache, so additions (and renames of the directory itself) clear
    /// the whole entry; removals and modifications only drop the targeted
    /// child, forcing its re-fetch.
    pub fn handle_directory_change(
        &self,
        path: &str,
        child_name: &str,
        change: DirectoryChangeType,
    ) {
        let Some(entry) = self.entries.read().unwrap().get(path).cloned() else {
            return;
        };
        match change {
            DirectoryChangeType::FileAdded | DirectoryChangeType::DirectoryRenamed => {
                entry.invalidate();
            }
            DirectoryChangeType::FileRemoved
            | DirectoryChangeType::FileModified
            | DirectoryChangeType::AttributesChanged => {
                entry.remove_child(child_name);
            }
        }
        debug!(path, child = child_name, ?change, "directory change applied");
    }

    /// Processes a break notification for a directory lease.
    ///
    /// Losing handle caching stops the change watcher; losing read
    /// caching (including a complete break) invalidates the cache entry.
    /// The break is always forwarded to the registry afterward so the
    /// base lease bookkeeping still runs.
    pub fn handle_directory_lease_break(
        &self,
        key: LeaseKey,
        new_state: LeaseState,
    ) -> Result<()> {
        let bound = self
            .entries
            .read()
            .unwrap()
            .values()
            .find(|entry| entry.lease_key() == key)
            .cloned();

        if let Some(entry) = bound {
            let had_handle = self
                .registry
                .get_lease(key)
                .map(|lease| lease.has_handle_cache())
                .unwrap_or(false);
            if had_handle && !new_state.has_handle_caching() {
                self.stop_watcher(entry.path());
            }
            if !new_state.has_read_caching() {
                entry.invalidate();
            }
        } else {
            warn!(%key, "directory lease break for unbound key");
        }

        self.registry.handle_lease_break(key, new_state)
    }

    /// Stops watching, removes the cache entry, and releases the
    /// underlying lease. Returns true if a cache entry existed.
    pub fn release_directory_lease(&self, path: &str) -> bool {
        self.stop_watcher(path);
        let removed = self.entries.write().unwrap().remove(path);
        match removed {
            Some(entry) => {
                self.registry.release_lease(entry.lease_key());
                debug!(path, "directory lease released");
                true
            }
            None => false,
        }
    }

    /// Stops the sweep and all watchers and releases every lease-bound
    /// cache entry. Idempotent; safe with no active leases.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        self.watchers.write().unwrap().clear();
        let drained: Vec<Arc<DirectoryCacheEntry>> =
            self.entries.write().unwrap().drain().map(|(_, e)| e).collect();
        for entry in drained {
            self.registry.release_lease(entry.lease_key());
        }
        debug!("directory lease manager shut down");
    }

    /// True if a change watcher is registered for `path`.
    pub fn is_watching(&self, path: &str) -> bool {
        self.watchers.read().unwrap().contains_key(path)
    }

    /// Number of registered change watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().unwrap().len()
    }

    /// Number of directories with a registered cache entry.
    pub fn cached_directory_count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    fn lease_grants_read(&self, key: LeaseKey) -> bool {
        self.registry
            .get_lease(key)
            .map(|lease| lease.has_read_cache())
            .unwrap_or(false)
    }

    fn start_watcher(&self, path: &str, key: LeaseKey) {
        let mut watchers = self.watchers.write().unwrap();
        if !watchers.contains_key(path) {
            watchers.insert(
                path.to_string(),
                DirectoryWatcher {
                    lease_key: key,
                    started: Instant::now(),
                },
            );
            debug!(path, %key, "change watcher started");
        }
    }

    fn stop_watcher(&self, path: &str) {
        if let Some(watcher) = self.watchers.write().unwrap().remove(path) {
            debug!(
                path,
                key = %watcher.lease_key,
                watched_for = ?watcher.started.elapsed(),
                "change watcher stopped"
            );
        }
    }
}

impl Drop for DirectoryLeaseManager {
    fn drop(&mut self) {
        // Best-effort: abort the sweep task if shutdown was never called.
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}
