//! Per-directory content cache.
//!
//! A [`DirectoryCacheEntry`] holds one directory's cached child listing,
//! keyed by child name. It is safe for concurrent readers and a single
//! concurrent writer via an internal read/write lock, independent of the
//! lease registry's locks: cache reads never block on lease bookkeeping.
//!
//! The entry never decides on its own that its lease is gone — the
//! overlay tells it, via [`DirectoryCacheEntry::invalidate`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::lease::LeaseKey;

/// Default freshness bound for a directory cache entry.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(30_000);

/// How broadly cached data under a directory lease may be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryCacheScope {
    /// Only the directory's immediate children are covered.
    ImmediateChildren,
    /// The whole subtree is covered.
    RecursiveTree,
    /// Only directory metadata, not the listing.
    MetadataOnly,
}

impl DirectoryCacheScope {
    /// Numeric tag used on the wire.
    pub fn ordinal(self) -> u32 {
        match self {
            Self::ImmediateChildren => 0,
            Self::RecursiveTree => 1,
            Self::MetadataOnly => 2,
        }
    }

    /// Checked conversion from a wire ordinal. Out-of-range values are a
    /// decoding error, never coerced.
    pub fn from_ordinal(ordinal: u32) -> Result<Self> {
        match ordinal {
            0 => Ok(Self::ImmediateChildren),
            1 => Ok(Self::RecursiveTree),
            2 => Ok(Self::MetadataOnly),
            _ => Err(CacheError::InvalidScope { ordinal }),
        }
    }

    /// True for the scope that covers a whole subtree.
    pub fn is_recursive(self) -> bool {
        matches!(self, Self::RecursiveTree)
    }
}

/// Immutable metadata snapshot for one directory child.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Child name, unique within its directory.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: SystemTime,
    /// True for subdirectories.
    pub is_directory: bool,
    /// Raw attribute bits as reported by the server.
    pub attributes: u32,
    /// Creation time.
    pub creation_time: SystemTime,
    /// Last access time.
    pub last_access_time: SystemTime,
}

impl FileInfo {
    /// Value-equality on the fields that matter for cache freshness.
    /// Names match by construction; access times are too noisy to compare.
    pub fn same_metadata(&self, other: &FileInfo) -> bool {
        self.size == other.size
            && self.last_modified == other.last_modified
            && self.attributes == other.attributes
            && self.is_directory == other.is_directory
    }
}

struct CacheState {
    children: HashMap<String, FileInfo>,
    is_complete: bool,
    has_changes: bool,
    last_update: Instant,
}

/// One directory's cached view, bound to a lease key it does not own.
pub struct DirectoryCacheEntry {
    path: String,
    lease_key: LeaseKey,
    scope: DirectoryCacheScope,
    max_age: Duration,
    created: Instant,
    state: RwLock<CacheState>,
    // Milliseconds since `created`; stamped by readers without taking the
    // write side of the lock.
    last_access_ms: AtomicU64,
    inconsistencies: AtomicU64,
}

impl DirectoryCacheEntry {
    /// Creates an empty entry with the default freshness bound.
    pub fn new(path: &str, lease_key: LeaseKey, scope: DirectoryCacheScope) -> Self {
        Self::with_max_age(path, lease_key, scope, DEFAULT_MAX_AGE)
    }

    /// Creates an empty entry with an explicit freshness bound.
    pub fn with_max_age(
        path: &str,
        lease_key: LeaseKey,
        scope: DirectoryCacheScope,
        max_age: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            path: path.to_string(),
            lease_key,
            scope,
            max_age,
            created: now,
            state: RwLock::new(CacheState {
                children: HashMap::new(),
                is_complete: false,
                has_changes: false,
                last_update: now,
            }),
            last_access_ms: AtomicU64::new(0),
            inconsistencies: AtomicU64::new(0),
        }
    }

    /// The directory path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The lease key this cache is bound to. The registry, not this entry,
    /// knows whether that key still grants read caching.
    pub fn lease_key(&self) -> LeaseKey {
        self.lease_key
    }

    /// The trust scope this entry was created with.
    pub fn scope(&self) -> DirectoryCacheScope {
        self.scope
    }

    /// The freshness bound.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// All cached children. Stamps the access time.
    pub fn get_children(&self) -> Vec<FileInfo> {
        self.touch();
        self.state.read().unwrap().children.values().cloned().collect()
    }

    /// One cached child by name. Stamps the access time.
    pub fn get_child(&self, name: &str) -> Option<FileInfo> {
        self.touch();
        self.state.read().unwrap().children.get(name).cloned()
    }

    /// True if a child with this name is cached. Stamps the access time.
    pub fn has_child(&self, name: &str) -> bool {
        self.touch();
        self.state.read().unwrap().children.contains_key(name)
    }

    /// Number of cached children.
    pub fn child_count(&self) -> usize {
        self.state.read().unwrap().children.len()
    }

    /// Writes one child's metadata. Only marks the entry changed and bumps
    /// the update time when the metadata actually differs, which
    /// suppresses noisy re-validation. Returns true if something changed.
    pub fn update_child(&self, info: FileInfo) -> bool {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state.children.get(&info.name) {
            if existing.same_metadata(&info) {
                return false;
            }
        }
        state.children.insert(info.name.clone(), info);
        state.has_changes = true;
        state.last_update = Instant::now();
        true
    }

    /// Removes one child, forcing its re-fetch. Returns true if it was
    /// cached.
    pub fn remove_child(&self, name: &str) -> bool {
        let mut state = self.state.write().unwrap();
        if state.children.remove(name).is_some() {
            state.has_changes = true;
            state.last_update = Instant::now();
            true
        } else {
            false
        }
    }

    /// Replaces the cached view with a complete fresh enumeration, all
    /// under one write lock. Children absent from `listing` are pruned;
    /// children present in both keep the value-equality suppression of
    /// [`update_child`](Self::update_child). The entry comes out complete
    /// with no pending changes.
    pub fn replace_listing(&self, listing: Vec<FileInfo>) {
        let mut state = self.state.write().unwrap();
        let fresh: std::collections::HashSet<&str> =
            listing.iter().map(|info| info.name.as_str()).collect();
        state.children.retain(|name, _| fresh.contains(name.as_str()));
        for info in listing {
            let unchanged = state
                .children
                .get(&info.name)
                .is_some_and(|existing| existing.same_metadata(&info));
            if !unchanged {
                state.children.insert(info.name.clone(), info);
            }
        }
        state.is_complete = true;
        state.has_changes = false;
        state.last_update = Instant::now();
    }

    /// Marks the cached listing as a complete enumeration; cleared by any
    /// invalidating event.
    pub fn mark_complete(&self) {
        let mut state = self.state.write().unwrap();
        state.is_complete = true;
        state.has_changes = false;
        state.last_update = Instant::now();
    }

    /// Atomically clears children and completeness and flags the entry
    /// changed, so subsequent reads are forced to refetch.
    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap();
        state.children.clear();
        state.is_complete = false;
        state.has_changes = true;
        debug!(path = %self.path, "directory cache invalidated");
    }

    /// True only if a full enumeration has been written and no
    /// invalidating event has occurred since.
    pub fn is_complete(&self) -> bool {
        self.state.read().unwrap().is_complete
    }

    /// True if a change notification or targeted update has landed since
    /// the last full enumeration.
    pub fn has_changes(&self) -> bool {
        self.state.read().unwrap().has_changes
    }

    /// True once the last update is older than the freshness bound.
    pub fn is_expired(&self) -> bool {
        self.state.read().unwrap().last_update.elapsed() > self.max_age
    }

    /// Advisory staleness: expired or changed. Callers combine this with
    /// the registry's view of the lease.
    pub fn needs_refresh(&self) -> bool {
        let state = self.state.read().unwrap();
        state.last_update.elapsed() > self.max_age || state.has_changes
    }

    /// Time since the last read access.
    pub fn last_access_age(&self) -> Duration {
        let stamped = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(stamped)
    }

    /// Records one observed cache inconsistency.
    pub fn record_inconsistency(&self) {
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of recorded inconsistencies. Pure accessor.
    pub fn inconsistency_count(&self) -> u64 {
        self.inconsistencies.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_access_ms
            .store(self.created.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}
