//! Annotation store
//!
//! [`AnnotationStore`] ties the codec, the blob store and a backing
//! [`Index`] together. Operations are split by concern:
//! - `documents`: create, read, list and cascading delete
//! - `annotations`: creation with root resolution, retrieval, body links
//! - `xml`: ingestion of markup and reconstruction from stored tags
//!
//! Every annotation caches the id of the document at the top of its target
//! chain (`root`), so a document's full annotation set is a single filtered
//! search.

mod annotations;
mod documents;
mod xml;

use crate::config::{ConfigError, StoreConfig};
use crate::error::StoreError;
use crate::index::{Collection, Index, IndexStatus, Record};
use crate::memory::InMemoryIndex;
use crate::result::{PutResult, Status};
use standoff_blob::{require_valid, BlobError, BlobStore};
use standoff_codec::{FieldMapping, OffsetUnit};
use uuid::Uuid;

/// Document and annotation store over an [`Index`]
#[derive(Debug)]
pub struct AnnotationStore<I: Index = InMemoryIndex> {
    index: I,
    blobs: Option<BlobStore>,
    mapping: FieldMapping,
    unit: OffsetUnit,
    search_limit: usize,
}

impl AnnotationStore<InMemoryIndex> {
    /// Store over a fresh [`InMemoryIndex`]
    ///
    /// # Errors
    /// Invalid configuration or an unusable blob root.
    pub fn in_memory(config: &StoreConfig) -> Result<Self, ConfigError> {
        Self::open(config, InMemoryIndex::new())
    }
}

impl<I: Index> AnnotationStore<I> {
    /// Store over `index`, configured by `config`
    ///
    /// # Errors
    /// Invalid configuration or an unusable blob root.
    pub fn open(config: &StoreConfig, index: I) -> Result<Self, ConfigError> {
        let mapping = config.validate()?;
        let blobs = match &config.blob_root {
            Some(root) => Some(BlobStore::open(root, config.lock_timeout()).map_err(|e| {
                ConfigError::Invalid {
                    key: "blob_root",
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        tracing::debug!(
            unit = %config.offset_unit,
            body_field = mapping.body_field(),
            originals = blobs.is_some(),
            "opened annotation store"
        );
        Ok(Self {
            index,
            blobs,
            mapping,
            unit: config.offset_unit,
            search_limit: config.search_limit,
        })
    }

    /// Backing index
    #[inline]
    #[must_use]
    pub fn index(&self) -> &I {
        &self.index
    }

    /// Blob store for originals, when configured
    #[inline]
    #[must_use]
    pub fn blobs(&self) -> Option<&BlobStore> {
        self.blobs.as_ref()
    }

    /// Field mapping applied to XML documents
    #[inline]
    #[must_use]
    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// Offset unit of ingested tags
    #[inline]
    #[must_use]
    pub fn unit(&self) -> OffsetUnit {
        self.unit
    }

    /// Create-only write of one record, as a result
    fn create_record(&self, collection: Collection, id: &str, record: Record) -> PutResult {
        match self.index.put(collection, id, record, true) {
            Ok(status) if status.is_success() => PutResult::created(id),
            Ok(IndexStatus::Conflict) => PutResult::failure(
                Some(id),
                Status::Conflict,
                format!("{} '{id}' already exists", singular(collection)),
            ),
            Ok(status) => PutResult::failure(
                Some(id),
                index_failure(&status),
                format!("{} '{id}' not written: {status}", singular(collection)),
            ),
            Err(e) => {
                tracing::error!(%collection, %id, error = %e, "index write failed");
                PutResult::failure(Some(id), Status::Internal, e.to_string())
            }
        }
    }

    /// Store `content` as the original of `id`, logging failures
    fn keep_original(&self, id: &str, content: &str) {
        let Some(blobs) = &self.blobs else {
            return;
        };
        match blobs.replace(id, content) {
            Ok(outcome) => tracing::debug!(%id, ?outcome, "kept original"),
            Err(e) => tracing::warn!(%id, error = %e, "could not keep original"),
        }
    }

    /// Remove the original of `id`; `Ok(false)` when there was none
    fn drop_original(&self, id: &str) -> Result<bool, BlobError> {
        let Some(blobs) = &self.blobs else {
            return Ok(false);
        };
        let op = blobs.begin_delete(id)?;
        if op.noop()? {
            return Ok(false);
        }
        op.commit()?;
        Ok(true)
    }
}

/// Fresh random id
fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Validate a caller-supplied id, or assign a fresh one
fn assign_id(id: Option<&str>) -> Result<String, StoreError> {
    match id {
        Some(id) => Ok(require_valid(id)?.to_string()),
        None => Ok(new_id()),
    }
}

fn singular(collection: Collection) -> &'static str {
    match collection {
        Collection::Documents => "document",
        Collection::Annotations => "annotation",
    }
}

/// Result status for a non-success index status
fn index_failure(status: &IndexStatus) -> Status {
    match status {
        IndexStatus::Conflict => Status::Conflict,
        IndexStatus::NotFound => Status::NotFound,
        IndexStatus::Rejected(_) => Status::BadRequest,
        IndexStatus::Created | IndexStatus::Updated => Status::Created,
        IndexStatus::Deleted => Status::Ok,
    }
}
