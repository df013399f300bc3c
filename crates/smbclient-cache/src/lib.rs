#![warn(missing_docs)]

//! SMB2/3 client-side cache coherence.
//!
//! Grants, tracks, and revokes leases — the SMB2.1+ mechanism that lets a
//! client safely cache file and directory state without polling the
//! server — and maintains a directory content cache whose validity is
//! derived from those leases. Wire framing, signing, transport setup, and
//! remote I/O live elsewhere; this crate consumes lease-grant and
//! lease-break events and answers whether cached data may still be
//! served.

pub mod config;
pub mod dir_cache;
pub mod dir_lease;
pub mod error;
pub mod lease;
pub mod registry;
pub mod wire;

pub use config::CacheConfig;
pub use dir_cache::{DirectoryCacheEntry, DirectoryCacheScope, FileInfo};
pub use dir_lease::{DirectoryChangeType, DirectoryLeaseManager};
pub use error::{CacheError, Result};
pub use lease::{LeaseEntry, LeaseKey, LeaseState};
pub use registry::{CoherenceSink, LeaseManager, NullSink};
pub use wire::DirectoryLeaseContext;
