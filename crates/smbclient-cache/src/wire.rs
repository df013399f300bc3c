//! Directory lease create-context payload ("DLse").
//!
//! The transport's encode/decode layer owns the 16-byte common context
//! header and 4-byte name field; this module only codes the payload that
//! follows. The payload extends the 32-byte standard SMB2 lease block
//! with directory-specific fields, 52 bytes total, little-endian:
//!
//! ```text
//!  0..16  lease key
//! 16..20  lease state
//! 20..24  lease flags
//! 24..32  lease duration
//! 32..36  scope ordinal
//! 36..44  max cache age (ms)
//! 44..48  directory flags (bit 0 recursive, bit 1 notifications)
//! 48..52  notification filter
//! ```
//!
//! A payload carrying exactly the 32 standard bytes decodes with the
//! directory fields at their defaults; any other truncation is rejected.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::dir_cache::{DirectoryCacheScope, DEFAULT_MAX_AGE};
use crate::error::{CacheError, Result};
use crate::lease::{LeaseKey, LeaseState};

/// Context name field identifying a directory lease context.
pub const CONTEXT_NAME: [u8; 4] = *b"DLse";

/// Length of the standard lease block.
pub const STANDARD_LEASE_LEN: usize = 32;

/// Length of the full directory lease payload.
pub const DIRECTORY_CONTEXT_LEN: usize = 52;

/// Default notification filter: file name, directory name, and attribute
/// changes.
pub const DEFAULT_NOTIFICATION_FILTER: u32 = 0x0000_0007;

const FLAG_RECURSIVE: u32 = 0x1;
const FLAG_NOTIFICATIONS: u32 = 0x2;

/// Decoded form of the "DLse" payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryLeaseContext {
    /// Client-chosen lease key.
    pub lease_key: LeaseKey,
    /// Requested or granted capability mask.
    pub lease_state: LeaseState,
    /// Standard lease flags word; opaque to this layer.
    pub lease_flags: u32,
    /// Standard lease duration field; opaque to this layer.
    pub lease_duration: u64,
    /// How broadly cached data may be trusted.
    pub scope: DirectoryCacheScope,
    /// Freshness bound for the directory cache.
    pub max_age: Duration,
    /// Whether the lease covers the whole subtree.
    pub recursive: bool,
    /// Whether change notifications are requested.
    pub notifications_enabled: bool,
    /// Change-notify completion filter.
    pub notification_filter: u32,
}

impl DirectoryLeaseContext {
    /// Builds a context for an outgoing CREATE request. The recursive
    /// flag is derived from the scope.
    pub fn new(lease_key: LeaseKey, lease_state: LeaseState, scope: DirectoryCacheScope) -> Self {
        Self {
            lease_key,
            lease_state,
            lease_flags: 0,
            lease_duration: 0,
            scope,
            max_age: DEFAULT_MAX_AGE,
            recursive: scope.is_recursive(),
            notifications_enabled: true,
            notification_filter: DEFAULT_NOTIFICATION_FILTER,
        }
    }

    /// Encodes the full 52-byte payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DIRECTORY_CONTEXT_LEN);
        buf.put_slice(self.lease_key.as_bytes());
        buf.put_u32_le(self.lease_state.bits());
        buf.put_u32_le(self.lease_flags);
        buf.put_u64_le(self.lease_duration);
        buf.put_u32_le(self.scope.ordinal());
        buf.put_u64_le(self.max_age.as_millis() as u64);
        let mut flags = 0;
        if self.recursive {
            flags |= FLAG_RECURSIVE;
        }
        if self.notifications_enabled {
            flags |= FLAG_NOTIFICATIONS;
        }
        buf.put_u32_le(flags);
        buf.put_u32_le(self.notification_filter);
        buf.freeze()
    }

    /// Decodes a payload.
    ///
    /// The payload must be either exactly the standard lease block or the
    /// full directory payload. A standard-only payload decodes with scope
    /// [`DirectoryCacheScope::ImmediateChildren`], the default max age,
    /// and notifications enabled. A truncated directory extension is
    /// malformed and rejected, as is an out-of-range scope ordinal.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != STANDARD_LEASE_LEN && payload.len() < DIRECTORY_CONTEXT_LEN {
            return Err(CacheError::ShortContext {
                len: payload.len(),
            });
        }

        let mut buf = payload;
        let mut key = [0u8; 16];
        buf.copy_to_slice(&mut key);
        let lease_key = LeaseKey::from_bytes(key);
        let lease_state = LeaseState::new(buf.get_u32_le());
        let lease_flags = buf.get_u32_le();
        let lease_duration = buf.get_u64_le();

        if payload.len() == STANDARD_LEASE_LEN {
            return Ok(Self {
                lease_key,
                lease_state,
                lease_flags,
                lease_duration,
                scope: DirectoryCacheScope::ImmediateChildren,
                max_age: DEFAULT_MAX_AGE,
                recursive: false,
                notifications_enabled: true,
                notification_filter: DEFAULT_NOTIFICATION_FILTER,
            });
        }

        let scope = DirectoryCacheScope::from_ordinal(buf.get_u32_le())?;
        let max_age = Duration::from_millis(buf.get_u64_le());
        let flags = buf.get_u32_le();
        let notification_filter = buf.get_u32_le();

        Ok(Self {
            lease_key,
            lease_state,
            lease_flags,
            lease_duration,
            scope,
            max_age,
            recursive: flags & FLAG_RECURSIVE != 0,
            notifications_enabled: flags & FLAG_NOTIFICATIONS != 0,
            notification_filter,
        })
    }
}
