use crate::lease::LeaseKey;
use thiserror::Error;

/// Errors produced by the lease registry and directory cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A lease key was presented that the registry does not know about.
    #[error("unknown lease key: {key}")]
    UnknownLease {
        /// The key that failed to resolve.
        key: LeaseKey,
    },

    /// A lease break was not acknowledged within the configured bound.
    /// The lease has been downgraded to no caching and released.
    #[error("lease break for {key} not acknowledged within {timeout_secs}s")]
    BreakTimeout {
        /// The key whose break timed out.
        key: LeaseKey,
        /// The bound that was exceeded, in seconds.
        timeout_secs: u64,
    },

    /// A coherence callback (write flush or read invalidation) failed
    /// during break handling. The lease has been downgraded to no caching.
    #[error("break callback failed for {path}")]
    BreakCallback {
        /// Path of the lease whose callback failed.
        path: String,
        /// The underlying callback failure.
        #[source]
        source: anyhow::Error,
    },

    /// A wire context carried a directory cache scope ordinal outside the
    /// defined range.
    #[error("invalid directory cache scope ordinal: {ordinal}")]
    InvalidScope {
        /// The out-of-range ordinal.
        ordinal: u32,
    },

    /// A directory lease context payload was neither the 32-byte standard
    /// lease block nor the full 52-byte directory payload.
    #[error("directory lease context truncated: {len} bytes")]
    ShortContext {
        /// Length of the rejected payload.
        len: usize,
    },

    /// A background break task failed to complete.
    #[error("lease break task failed: {0}")]
    TaskFailed(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
