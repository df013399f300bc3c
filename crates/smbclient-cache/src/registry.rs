//! Lease registry.
//!
//! Maps paths to lease keys to entries; grants, reuses, updates, breaks,
//! evicts, and expires leases. The registry is the sole source of truth
//! for what a lease key currently grants.
//!
//! Break handling enforces one total order per entry: flush writes, then
//! invalidate reads, then apply the new state, then bump the epoch. Any
//! reader observing a new epoch is guaranteed the callbacks for the
//! previous state already ran.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::lease::{LeaseEntry, LeaseKey, LeaseState};

/// Coherence callbacks invoked when a lease loses capabilities.
///
/// Implemented by the layer that owns cached data (write-behind buffers,
/// read caches). Callbacks run while the affected lease entry is locked,
/// so implementations must not call back into the registry.
pub trait CoherenceSink: Send + Sync {
    /// Flush any cached writes for `path` to the server. Called before a
    /// lease loses write caching.
    fn flush_writes(&self, path: &str) -> anyhow::Result<()>;

    /// Drop any cached read state for `path`. Called when a lease loses
    /// read caching.
    fn invalidate_reads(&self, path: &str) -> anyhow::Result<()>;
}

/// Sink for callers that cache nothing locally.
pub struct NullSink;

impl CoherenceSink for NullSink {
    fn flush_writes(&self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn invalidate_reads(&self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registry of active leases.
///
/// The path and key maps are structurally protected by registry-wide
/// locks; individual entries carry their own mutex so a slow break on one
/// lease never blocks lookups of unrelated leases.
pub struct LeaseManager {
    max_leases: usize,
    break_timeout: Duration,
    sink: Arc<dyn CoherenceSink>,
    leases: RwLock<HashMap<LeaseKey, Arc<Mutex<LeaseEntry>>>>,
    by_path: RwLock<HashMap<String, LeaseKey>>,
}

impl LeaseManager {
    /// Creates a registry with the given configuration and coherence sink.
    pub fn new(config: &CacheConfig, sink: Arc<dyn CoherenceSink>) -> Self {
        Self {
            max_leases: config.max_leases.max(1),
            break_timeout: config.lease_break_timeout,
            sink,
            leases: RwLock::new(HashMap::new()),
            by_path: RwLock::new(HashMap::new()),
        }
    }

    /// Requests a lease for `path`.
    ///
    /// If a live, non-breaking lease already exists for the path its key is
    /// returned unchanged and its last-access time refreshed, so no
    /// duplicate lease is ever requested for the same path concurrently.
    /// Otherwise a new entry is created at epoch 1, evicting the
    /// least-recently-used entries first if the registry is at capacity.
    pub fn request_lease(&self, path: &str, requested: LeaseState) -> LeaseKey {
        let existing = self.by_path.read().unwrap().get(path).copied();
        if let Some(key) = existing {
            if let Some(entry) = self.entry(key) {
                let mut entry = entry.lock().unwrap();
                if !entry.is_breaking() {
                    entry.touch();
                    debug!(%key, path, "reusing existing lease");
                    return key;
                }
            }
        }

        let key = LeaseKey::generate();
        let evicted = {
            let mut leases = self.leases.write().unwrap();
            let evicted = if leases.len() >= self.max_leases {
                let excess = leases.len() + 1 - self.max_leases;
                self.detach_victims_locked(&mut leases, excess)
            } else {
                Vec::new()
            };
            leases.insert(key, Arc::new(Mutex::new(LeaseEntry::new(key, path, requested))));
            self.by_path
                .write()
                .unwrap()
                .insert(path.to_string(), key);
            evicted
        };
        // Callbacks run outside the registry locks so a slow sink never
        // stalls lookups of unrelated leases.
        for (victim, entry) in evicted {
            self.flush_evicted(victim, &entry);
        }
        debug!(%key, path, state = %requested, "granted new lease");
        key
    }

    /// Applies the server's granted state when it differs from the request
    /// (for example a downgrade). Unknown keys are logged and ignored.
    pub fn update_lease(&self, key: LeaseKey, granted: LeaseState) {
        match self.entry(key) {
            Some(entry) => {
                let mut entry = entry.lock().unwrap();
                debug!(%key, granted = %granted, "lease state updated");
                entry.set_state(granted);
                entry.touch();
            }
            None => warn!(%key, "update for unknown lease key ignored"),
        }
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn get_lease(&self, key: LeaseKey) -> Option<LeaseEntry> {
        self.entry(key).map(|e| e.lock().unwrap().clone())
    }

    /// Snapshot of the entry covering `path`, if any.
    pub fn get_lease_by_path(&self, path: &str) -> Option<LeaseEntry> {
        let key = self.by_path.read().unwrap().get(path).copied()?;
        self.get_lease(key)
    }

    /// Processes a server break notification for `key`.
    ///
    /// Marks the entry breaking, flushes writes if write caching is being
    /// lost, invalidates reads if read caching is being lost, then applies
    /// `new_state`, bumps the epoch, and clears the breaking flag. A
    /// callback failure forces the entry to no caching instead; the
    /// breaking flag is always cleared. Unknown keys are logged and
    /// ignored.
    pub fn handle_lease_break(&self, key: LeaseKey, new_state: LeaseState) -> Result<()> {
        let Some(entry) = self.entry(key) else {
            warn!(%key, "break for unknown lease key ignored");
            return Ok(());
        };
        Self::apply_break(self.sink.as_ref(), &entry, key, new_state)
    }

    /// Processes a break with a bounded wait.
    ///
    /// The break runs on a blocking worker while the caller waits up to
    /// `timeout`. The protocol requires the client to acknowledge a break
    /// within a server-enforced window, so on timeout coherence can no
    /// longer be guaranteed: the entry is forced to no caching and the
    /// lease released entirely. On any other failure the entry is forced
    /// to no caching but kept.
    pub async fn handle_lease_break_with_timeout(
        &self,
        key: LeaseKey,
        new_state: LeaseState,
        timeout: Duration,
    ) -> Result<()> {
        let Some(entry) = self.entry(key) else {
            warn!(%key, "break for unknown lease key ignored");
            return Ok(());
        };
        let sink = Arc::clone(&self.sink);
        let task = tokio::task::spawn_blocking(move || {
            Self::apply_break(sink.as_ref(), &entry, key, new_state)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => {
                self.force_to_none(key);
                Err(err)
            }
            Ok(Err(join_err)) => {
                warn!(%key, error = %join_err, "break task failed");
                self.force_to_none(key);
                Err(CacheError::TaskFailed(join_err.to_string()))
            }
            Err(_elapsed) => {
                warn!(%key, ?timeout, "break not acknowledged in time, disabling caching");
                self.force_to_none(key);
                self.release_lease(key);
                Err(CacheError::BreakTimeout {
                    key,
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Same as [`handle_lease_break_with_timeout`] with the configured
    /// default bound.
    ///
    /// [`handle_lease_break_with_timeout`]: Self::handle_lease_break_with_timeout
    pub async fn handle_lease_break_bounded(
        &self,
        key: LeaseKey,
        new_state: LeaseState,
    ) -> Result<()> {
        self.handle_lease_break_with_timeout(key, new_state, self.break_timeout)
            .await
    }

    /// Removes the lease for `key`. Returns true if it existed.
    pub fn release_lease(&self, key: LeaseKey) -> bool {
        let removed = self.leases.write().unwrap().remove(&key);
        if removed.is_some() {
            self.by_path.write().unwrap().retain(|_, k| *k != key);
            debug!(%key, "lease released");
            true
        } else {
            false
        }
    }

    /// Removes every lease. Returns the number removed.
    pub fn release_all(&self) -> usize {
        let mut leases = self.leases.write().unwrap();
        let count = leases.len();
        leases.clear();
        self.by_path.write().unwrap().clear();
        if count > 0 {
            debug!(count, "all leases released");
        }
        count
    }

    /// Removes leases not accessed for longer than `max_age`. Returns the
    /// number removed. Invoked periodically by the background sweep.
    pub fn cleanup_expired_leases(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<LeaseKey> = self
            .leases
            .read()
            .unwrap()
            .iter()
            .filter(|(_, entry)| {
                now.duration_since(entry.lock().unwrap().last_access_time()) > max_age
            })
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            self.release_lease(*key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired leases removed");
        }
        expired.len()
    }

    /// Number of active leases.
    pub fn lease_count(&self) -> usize {
        self.leases.read().unwrap().len()
    }

    /// The configured break timeout.
    pub fn break_timeout(&self) -> Duration {
        self.break_timeout
    }

    fn entry(&self, key: LeaseKey) -> Option<Arc<Mutex<LeaseEntry>>> {
        self.leases.read().unwrap().get(&key).cloned()
    }

    /// Core break sequence for one entry: mark breaking, flush writes if
    /// write caching is lost, invalidate reads if read caching is lost,
    /// apply the new state, bump the epoch, clear the breaking flag. The
    /// entry mutex is held throughout.
    fn apply_break(
        sink: &dyn CoherenceSink,
        entry: &Mutex<LeaseEntry>,
        key: LeaseKey,
        new_state: LeaseState,
    ) -> Result<()> {
        let mut entry = entry.lock().unwrap();
        entry.begin_break();
        let prior = entry.state();

        let mut callback_err: Option<anyhow::Error> = None;
        if prior.has_write_caching() && !new_state.has_write_caching() {
            if let Err(err) = sink.flush_writes(entry.path()) {
                callback_err = Some(err);
            }
        }
        if callback_err.is_none() && prior.has_read_caching() && !new_state.has_read_caching() {
            if let Err(err) = sink.invalidate_reads(entry.path()) {
                callback_err = Some(err);
            }
        }

        if let Some(err) = callback_err {
            warn!(%key, path = entry.path(), error = %err, "break callback failed, lease forced to none");
            entry.set_state(LeaseState::NONE);
            entry.bump_epoch();
            entry.end_break();
            entry.touch();
            return Err(CacheError::BreakCallback {
                path: entry.path().to_string(),
                source: err,
            });
        }

        entry.set_state(new_state);
        entry.bump_epoch();
        entry.end_break();
        entry.touch();
        debug!(%key, new_state = %new_state, epoch = entry.epoch(), "lease break applied");
        Ok(())
    }

    /// Conservative fallback after a failed or abandoned break: the lease
    /// grants nothing until released or re-requested. Skips entries whose
    /// mutex is still held by an abandoned break task; that task applies
    /// its own terminal state when it finishes. Does not bump the epoch —
    /// the break path that failed already accounts for it.
    fn force_to_none(&self, key: LeaseKey) {
        if let Some(entry) = self.entry(key) {
            if let Ok(mut entry) = entry.try_lock() {
                entry.set_state(LeaseState::NONE);
                entry.end_break();
                entry.touch();
            }
        }
    }

    /// Detaches the `count` least-recently-used entries from both maps
    /// and returns them. Called with the `leases` write lock held; runs no
    /// sink callbacks, so the lock is never held across a slow sink.
    fn detach_victims_locked(
        &self,
        leases: &mut HashMap<LeaseKey, Arc<Mutex<LeaseEntry>>>,
        count: usize,
    ) -> Vec<(LeaseKey, Arc<Mutex<LeaseEntry>>)> {
        let mut victims: Vec<(LeaseKey, Instant)> = leases
            .iter()
            .map(|(key, entry)| (*key, entry.lock().unwrap().last_access_time()))
            .collect();
        victims.sort_by_key(|(_, last_access)| *last_access);

        let mut detached = Vec::new();
        let mut by_path = self.by_path.write().unwrap();
        for (key, _) in victims.into_iter().take(count) {
            if let Some(entry) = leases.remove(&key) {
                by_path.remove(entry.lock().unwrap().path());
                detached.push((key, entry));
            }
        }
        detached
    }

    /// Coherence callbacks for one detached eviction victim. A victim
    /// still holding write caching is flushed and one holding read caching
    /// invalidated, so eviction never silently drops unflushed writes.
    fn flush_evicted(&self, key: LeaseKey, entry: &Mutex<LeaseEntry>) {
        let entry = entry.lock().unwrap();
        if entry.has_write_cache() {
            if let Err(err) = self.sink.flush_writes(entry.path()) {
                warn!(%key, path = entry.path(), error = %err, "flush during eviction failed");
            }
        }
        if entry.has_read_cache() {
            if let Err(err) = self.sink.invalidate_reads(entry.path()) {
                warn!(%key, path = entry.path(), error = %err, "invalidate during eviction failed");
            }
        }
        debug!(%key, path = entry.path(), "evicted least-recently-used lease");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    /// Records callback invocations in order.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl CoherenceSink for RecordingSink {
        fn flush_writes(&self, path: &str) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("flush:{path}"));
            Ok(())
        }

        fn invalidate_reads(&self, path: &str) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("invalidate:{path}"));
            Ok(())
        }
    }

    /// Fails every flush.
    struct FailingSink;

    impl CoherenceSink for FailingSink {
        fn flush_writes(&self, _path: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("flush failed"))
        }

        fn invalidate_reads(&self, _path: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Blocks inside flush long enough to exceed small timeouts.
    struct SlowSink {
        delay: Duration,
    }

    impl CoherenceSink for SlowSink {
        fn flush_writes(&self, _path: &str) -> anyhow::Result<()> {
            sleep(self.delay);
            Ok(())
        }

        fn invalidate_reads(&self, _path: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn manager_with(sink: Arc<dyn CoherenceSink>, max_leases: usize) -> LeaseManager {
        let config = CacheConfig {
            max_leases,
            ..CacheConfig::default()
        };
        LeaseManager::new(&config, sink)
    }

    fn default_manager() -> LeaseManager {
        manager_with(Arc::new(NullSink), 1024)
    }

    #[test]
    fn test_request_lease_is_idempotent_per_path() {
        let mgr = default_manager();
        let k1 = mgr.request_lease("/share/dir", LeaseState::READ_HANDLE);
        let k2 = mgr.request_lease("/share/dir", LeaseState::READ_HANDLE);
        assert_eq!(k1, k2);
        assert_eq!(mgr.lease_count(), 1);
    }

    #[test]
    fn test_distinct_paths_get_distinct_keys() {
        let mgr = default_manager();
        let k1 = mgr.request_lease("/a", LeaseState::READ);
        let k2 = mgr.request_lease("/b", LeaseState::READ);
        assert_ne!(k1, k2);
        assert_eq!(mgr.lease_count(), 2);
    }

    #[test]
    fn test_get_lease_by_path() {
        let mgr = default_manager();
        let key = mgr.request_lease("/share/f.txt", LeaseState::FULL);
        let entry = mgr.get_lease_by_path("/share/f.txt").unwrap();
        assert_eq!(entry.key(), key);
        assert!(mgr.get_lease_by_path("/other").is_none());
    }

    #[test]
    fn test_update_lease_applies_downgrade() {
        let mgr = default_manager();
        let key = mgr.request_lease("/f", LeaseState::FULL);
        mgr.update_lease(key, LeaseState::READ_HANDLE);
        let entry = mgr.get_lease(key).unwrap();
        assert_eq!(entry.state(), LeaseState::READ_HANDLE);
        assert_eq!(entry.epoch(), 1, "update is not a break");
    }

    #[test]
    fn test_update_unknown_key_is_ignored() {
        let mgr = default_manager();
        mgr.update_lease(LeaseKey::generate(), LeaseState::READ);
        assert_eq!(mgr.lease_count(), 0);
    }

    #[test]
    fn test_break_applies_state_and_bumps_epoch_once() {
        let mgr = default_manager();
        let key = mgr.request_lease("/f", LeaseState::FULL);
        let before = mgr.get_lease(key).unwrap().epoch();

        mgr.handle_lease_break(key, LeaseState::READ).unwrap();

        let entry = mgr.get_lease(key).unwrap();
        assert_eq!(entry.state(), LeaseState::READ);
        assert_eq!(entry.epoch(), before + 1);
        assert!(!entry.is_breaking());
    }

    #[test]
    fn test_full_lease_broken_to_read_caching() {
        let mgr = default_manager();
        let key = mgr.request_lease("/s/f.txt", LeaseState::FULL);

        mgr.handle_lease_break(key, LeaseState::READ).unwrap();

        let entry = mgr.get_lease(key).unwrap();
        assert!(!entry.has_write_cache());
        assert!(entry.has_read_cache());
        assert_eq!(entry.epoch(), 2);
    }

    #[test]
    fn test_break_flushes_before_invalidating() {
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager_with(sink.clone(), 1024);
        let key = mgr.request_lease("/f", LeaseState::FULL);

        mgr.handle_lease_break(key, LeaseState::NONE).unwrap();

        assert_eq!(sink.events(), vec!["flush:/f", "invalidate:/f"]);
    }

    #[test]
    fn test_break_losing_only_write_flushes_without_invalidating() {
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager_with(sink.clone(), 1024);
        let key = mgr.request_lease("/f", LeaseState::FULL);

        mgr.handle_lease_break(key, LeaseState::READ_HANDLE).unwrap();

        assert_eq!(sink.events(), vec!["flush:/f"]);
    }

    #[test]
    fn test_break_keeping_all_bits_runs_no_callbacks() {
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager_with(sink.clone(), 1024);
        let key = mgr.request_lease("/f", LeaseState::READ);

        mgr.handle_lease_break(key, LeaseState::READ).unwrap();

        assert!(sink.events().is_empty());
        assert_eq!(mgr.get_lease(key).unwrap().epoch(), 2);
    }

    #[test]
    fn test_break_unknown_key_is_ignored() {
        let mgr = default_manager();
        assert!(mgr
            .handle_lease_break(LeaseKey::generate(), LeaseState::NONE)
            .is_ok());
    }

    #[test]
    fn test_failed_callback_forces_none_and_clears_breaking() {
        let mgr = manager_with(Arc::new(FailingSink), 1024);
        let key = mgr.request_lease("/f", LeaseState::FULL);

        let result = mgr.handle_lease_break(key, LeaseState::READ);
        assert!(matches!(result, Err(CacheError::BreakCallback { .. })));

        let entry = mgr.get_lease(key).unwrap();
        assert!(entry.state().is_none());
        assert!(!entry.is_breaking());
        assert_eq!(entry.epoch(), 2);
    }

    #[test]
    fn test_release_lease_detaches_path_mapping() {
        let mgr = default_manager();
        let key = mgr.request_lease("/f", LeaseState::READ);
        assert!(mgr.release_lease(key));
        assert!(mgr.get_lease(key).is_none());
        assert!(mgr.get_lease_by_path("/f").is_none());
        assert!(!mgr.release_lease(key));
    }

    #[test]
    fn test_release_all() {
        let mgr = default_manager();
        mgr.request_lease("/a", LeaseState::READ);
        mgr.request_lease("/b", LeaseState::READ);
        assert_eq!(mgr.release_all(), 2);
        assert_eq!(mgr.lease_count(), 0);
    }

    #[test]
    fn test_cleanup_removes_idle_leases() {
        let mgr = default_manager();
        mgr.request_lease("/f", LeaseState::READ);

        sleep(Duration::from_millis(10));
        assert_eq!(mgr.cleanup_expired_leases(Duration::from_millis(1)), 1);
        assert_eq!(mgr.lease_count(), 0);
    }

    #[test]
    fn test_cleanup_keeps_fresh_leases() {
        let mgr = default_manager();
        mgr.request_lease("/f", LeaseState::READ);
        assert_eq!(mgr.cleanup_expired_leases(Duration::from_secs(60)), 0);
        assert_eq!(mgr.lease_count(), 1);
    }

    #[test]
    fn test_eviction_under_pressure_drops_least_recently_used() {
        let mgr = manager_with(Arc::new(NullSink), 2);
        mgr.request_lease("/a", LeaseState::READ);
        sleep(Duration::from_millis(5));
        mgr.request_lease("/b", LeaseState::READ);
        sleep(Duration::from_millis(5));
        mgr.request_lease("/c", LeaseState::READ);

        assert!(mgr.get_lease_by_path("/a").is_none());
        assert!(mgr.get_lease_by_path("/b").is_some());
        assert!(mgr.get_lease_by_path("/c").is_some());
        assert_eq!(mgr.lease_count(), 2);
    }

    #[test]
    fn test_eviction_flushes_and_invalidates_victim() {
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager_with(sink.clone(), 1);
        mgr.request_lease("/a", LeaseState::FULL);
        sleep(Duration::from_millis(5));
        mgr.request_lease("/b", LeaseState::READ);

        assert_eq!(sink.events(), vec!["flush:/a", "invalidate:/a"]);
        assert!(mgr.get_lease_by_path("/a").is_none());
    }

    #[test]
    fn test_eviction_callbacks_do_not_block_other_lookups() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(200),
        });
        let mgr = Arc::new(manager_with(sink, 1));
        mgr.request_lease("/a", LeaseState::FULL);
        sleep(Duration::from_millis(5));

        let background = {
            let mgr = Arc::clone(&mgr);
            // Evicts /a; the slow flush runs after the registry locks are
            // released.
            std::thread::spawn(move || mgr.request_lease("/b", LeaseState::READ))
        };
        sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert!(mgr.get_lease_by_path("/a").is_none());
        assert!(mgr.get_lease_by_path("/b").is_some());
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "lookups stalled behind the eviction flush"
        );
        background.join().unwrap();
    }

    #[test]
    fn test_reuse_refreshes_last_access() {
        let mgr = manager_with(Arc::new(NullSink), 2);
        mgr.request_lease("/a", LeaseState::READ);
        sleep(Duration::from_millis(5));
        mgr.request_lease("/b", LeaseState::READ);
        sleep(Duration::from_millis(5));
        // Touch /a so /b becomes the LRU victim.
        mgr.request_lease("/a", LeaseState::READ);
        sleep(Duration::from_millis(5));
        mgr.request_lease("/c", LeaseState::READ);

        assert!(mgr.get_lease_by_path("/a").is_some());
        assert!(mgr.get_lease_by_path("/b").is_none());
        assert!(mgr.get_lease_by_path("/c").is_some());
    }

    #[tokio::test]
    async fn test_bounded_break_completes_within_timeout() {
        let mgr = default_manager();
        let key = mgr.request_lease("/f", LeaseState::FULL);

        mgr.handle_lease_break_with_timeout(key, LeaseState::READ, Duration::from_secs(5))
            .await
            .unwrap();

        let entry = mgr.get_lease(key).unwrap();
        assert_eq!(entry.state(), LeaseState::READ);
        assert_eq!(entry.epoch(), 2);
    }

    #[tokio::test]
    async fn test_bounded_break_timeout_releases_lease() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(500),
        });
        let mgr = manager_with(sink, 1024);
        let key = mgr.request_lease("/f", LeaseState::FULL);

        let result = mgr
            .handle_lease_break_with_timeout(key, LeaseState::NONE, Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(CacheError::BreakTimeout { .. })));
        assert!(mgr.get_lease(key).is_none(), "timed-out lease is released");
    }

    #[tokio::test]
    async fn test_bounded_break_callback_failure_keeps_lease_at_none() {
        let mgr = manager_with(Arc::new(FailingSink), 1024);
        let key = mgr.request_lease("/f", LeaseState::FULL);

        let result = mgr
            .handle_lease_break_with_timeout(key, LeaseState::READ, Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(CacheError::BreakCallback { .. })));
        let entry = mgr.get_lease(key).unwrap();
        assert!(entry.state().is_none());
        assert!(!entry.is_breaking());
    }
}
