//! Lease value types and the registry-owned lease record.
//!
//! A lease is the SMB2.1+ mechanism that lets a client cache file or
//! directory state without polling the server. It is identified by an
//! opaque 16-byte key chosen by the client and carries a three-bit
//! capability mask: read caching, handle caching, write caching.

use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Opaque 16-byte lease identifier.
///
/// Equality and hashing are by byte content. Keys are immutable after
/// construction; fresh keys come from a cryptographically secure source.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseKey([u8; 16]);

impl LeaseKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Wraps an externally supplied 16-byte value.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The all-zero key. Distinguishable but carries no special registry
    /// meaning by itself.
    pub const fn zero() -> Self {
        Self([0; 16])
    }

    /// True if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Raw key bytes, for embedding into an outgoing lease context.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseKey({})", self)
    }
}

/// Lease capability mask.
///
/// Only the three low bits are meaningful. Directory leases reuse the same
/// bits: READ permits cached enumeration, HANDLE permits keeping directory
/// handles open, WRITE permits optimistic create/delete caching.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct LeaseState(u32);

impl LeaseState {
    /// No caching.
    pub const NONE: LeaseState = LeaseState(0x0);
    /// Read caching.
    pub const READ: LeaseState = LeaseState(0x1);
    /// Handle caching.
    pub const HANDLE: LeaseState = LeaseState(0x2);
    /// Write caching.
    pub const WRITE: LeaseState = LeaseState(0x4);
    /// Read and handle caching.
    pub const READ_HANDLE: LeaseState = LeaseState(0x3);
    /// Read and write caching.
    pub const READ_WRITE: LeaseState = LeaseState(0x5);
    /// All three capabilities.
    pub const FULL: LeaseState = LeaseState(0x7);

    /// Wraps a raw state word from the wire.
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw state word.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if read caching is granted.
    pub fn has_read_caching(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    /// True if handle caching is granted.
    pub fn has_handle_caching(self) -> bool {
        self.0 & Self::HANDLE.0 != 0
    }

    /// True if write caching is granted.
    pub fn has_write_caching(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    /// True if no capability is granted.
    pub fn is_none(self) -> bool {
        self.0 & Self::FULL.0 == 0
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }
        if self.has_read_caching() {
            write!(f, "R")?;
        }
        if self.has_handle_caching() {
            write!(f, "H")?;
        }
        if self.has_write_caching() {
            write!(f, "W")?;
        }
        Ok(())
    }
}

/// The authoritative record of one granted lease.
///
/// Owned exclusively by the registry; callers only ever see cloned
/// snapshots. The epoch starts at 1 and increments on every break, so a
/// reader observing a new epoch knows the flush/invalidate for the
/// previous state already ran.
#[derive(Clone, Debug)]
pub struct LeaseEntry {
    key: LeaseKey,
    path: String,
    state: LeaseState,
    epoch: u64,
    create_time: Instant,
    last_access: Instant,
    breaking: bool,
}

impl LeaseEntry {
    /// Creates a fresh entry at epoch 1.
    pub fn new(key: LeaseKey, path: &str, state: LeaseState) -> Self {
        let now = Instant::now();
        Self {
            key,
            path: path.to_string(),
            state,
            epoch: 1,
            create_time: now,
            last_access: now,
            breaking: false,
        }
    }

    /// The lease key.
    pub fn key(&self) -> LeaseKey {
        self.key
    }

    /// The path this lease covers.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Currently granted capabilities.
    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// Break counter, starting at 1.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// When the entry was created.
    pub fn create_time(&self) -> Instant {
        self.create_time
    }

    /// Last time the lease was requested, updated, or broken.
    pub fn last_access_time(&self) -> Instant {
        self.last_access
    }

    /// True while a break is being processed.
    pub fn is_breaking(&self) -> bool {
        self.breaking
    }

    /// True if the lease currently grants read caching.
    pub fn has_read_cache(&self) -> bool {
        self.state.has_read_caching()
    }

    /// True if the lease currently grants handle caching.
    pub fn has_handle_cache(&self) -> bool {
        self.state.has_handle_caching()
    }

    /// True if the lease currently grants write caching.
    pub fn has_write_cache(&self) -> bool {
        self.state.has_write_caching()
    }

    pub(crate) fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    pub(crate) fn set_state(&mut self, state: LeaseState) {
        self.state = state;
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub(crate) fn begin_break(&mut self) {
        self.breaking = true;
    }

    pub(crate) fn end_break(&mut self) {
        self.breaking = false;
    }
}
