//! Standoff Store
//!
//! Documents and stand-off annotations over a pluggable backing index.
//!
//! # Core Concepts
//!
//! - [`AnnotationStore`]: document, annotation and XML operations
//! - [`Index`]: the backing index contract; [`InMemoryIndex`] implements it
//! - [`PutResult`]: id, [`Status`] and message of every mutating operation
//! - [`StoreConfig`]: offset unit, search limit, originals directory and
//!   field mapping, loadable from TOML
//!
//! Annotations may target documents or other annotations. Each one caches
//! its root document, so everything hanging off a document is found with a
//! single lookup and removed with it.
//!
//! # Example
//!
//! ```rust
//! use standoff_store::{Annotation, AnnotationStore, Status, StoreConfig};
//!
//! let store = AnnotationStore::in_memory(&StoreConfig::default()).unwrap();
//! let doc = store.create_document(None, "some text").id.unwrap();
//!
//! let note = store.create_annotation(None, Annotation::new(0, 4, &doc, "note"));
//! assert_eq!(note.status, Status::Created);
//!
//! let found = store.get_annotations(&doc, None, true).unwrap();
//! assert_eq!(found[0].kind, "note");
//! ```

#![warn(unreachable_pub)]

mod config;
mod error;
pub mod index;
mod memory;
mod model;
pub mod record;
mod result;
mod store;

pub use config::{ConfigError, StoreConfig, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_SEARCH_LIMIT};
pub use error::{ErrorKind, StoreError};
pub use index::{Collection, Filter, Hit, Index, IndexError, IndexStatus, Record, Sort};
pub use memory::InMemoryIndex;
pub use model::{Annotation, Document, DocumentWithAnnotations, ListPage};
pub use result::{PutResult, Status};
pub use store::AnnotationStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
