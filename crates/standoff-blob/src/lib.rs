//! Standoff Blob Store
//!
//! Verbatim originals, keyed by document id.
//!
//! - [`ident`]: identifier rules shared by every component that turns ids
//!   into file names
//! - [`BlobStore`]: 65536 hash-derived buckets, one reader/writer lock each,
//!   atomic rename on write
//!
//! # Example
//!
//! ```rust
//! use standoff_blob::{BlobStore, ReplaceOutcome};
//! use std::time::Duration;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = BlobStore::open(dir.path(), Duration::from_secs(1)).unwrap();
//!
//! store.put("foo", "bar").unwrap();
//! assert!(store.put("foo", "baz").is_err());
//! assert_eq!(store.replace("foo", "baz").unwrap(), ReplaceOutcome::Written);
//! assert_eq!(store.get("foo").unwrap(), b"baz");
//! ```

#![warn(unreachable_pub)]

pub mod ident;
mod store;

pub use ident::{is_valid, require_valid, IdentifierError, MAX_LENGTH};
pub use store::{
    BlobError, BlobStore, Bucket, ReplaceOutcome, WriteOp, BUCKET_COUNT, DEFAULT_TIMEOUT,
    TEMP_PREFIX,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
