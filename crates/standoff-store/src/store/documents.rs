use super::{assign_id, index_failure, AnnotationStore};
use crate::error::StoreError;
use crate::index::{Collection, Filter, Index, IndexStatus, Sort};
use crate::model::{Document, ListPage};
use crate::record::{decode_document, document_record, field};
use crate::result::{PutResult, Status};
use standoff_blob::require_valid;
use std::collections::BTreeMap;

impl<I: Index> AnnotationStore<I> {
    /// Create a plain-text document
    ///
    /// Without an id, a random one is assigned. Fails with `Conflict` when
    /// the id is taken. The text is also kept as the document's original
    /// when a blob store is configured.
    pub fn create_document(&self, id: Option<&str>, text: &str) -> PutResult {
        let id = match assign_id(id) {
            Ok(id) => id,
            Err(e) => return PutResult::from_error(id, &e),
        };
        let result = self.insert_document(&id, text, &BTreeMap::new());
        if result.is_success() {
            self.keep_original(&id, text);
        }
        result
    }

    pub(super) fn insert_document(
        &self,
        id: &str,
        text: &str,
        fields: &BTreeMap<String, String>,
    ) -> PutResult {
        let record = document_record(self.mapping.body_field(), text, fields);
        let result = self.create_record(Collection::Documents, id, record);
        if result.is_success() {
            tracing::debug!(%id, length = self.unit.measure(text), fields = fields.len(), "created document");
        }
        result
    }

    /// Fetch a document
    ///
    /// # Errors
    /// Index failure or an undecodable record.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.index
            .get(Collection::Documents, id)?
            .map(|record| decode_document(id, self.mapping.body_field(), record))
            .transpose()
    }

    pub(super) fn is_document(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.index.get(Collection::Documents, id)?.is_some())
    }

    /// Verbatim original of a document; `None` when none was kept
    ///
    /// # Errors
    /// Invalid id, lock timeout or I/O failure.
    pub fn get_original(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(blobs) = &self.blobs else {
            return Ok(None);
        };
        match blobs.get(id) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Page through document ids in id order, optionally filtered by a
    /// free-text query
    ///
    /// # Errors
    /// Index failure.
    pub fn list_documents(
        &self,
        query: Option<&str>,
        from: usize,
        count: usize,
    ) -> Result<ListPage, StoreError> {
        let filter = Filter::All.with_query(query);
        let total = self.index.count(Collection::Documents, &filter)?;
        let limit = from.saturating_add(count).min(self.search_limit);
        let result = self
            .index
            .search(Collection::Documents, &filter, Some(&Sort::Id), limit)?
            .into_iter()
            .skip(from)
            .map(|hit| hit.id)
            .collect();
        Ok(ListPage {
            result,
            from,
            total,
        })
    }

    /// Delete a document, its original and every annotation rooted in it
    ///
    /// The status is that of the document removal. A missing original or
    /// failed annotation cleanup is logged; a blob lock timeout aborts
    /// before anything is removed.
    pub fn delete(&self, id: &str) -> PutResult {
        if let Err(e) = require_valid(id) {
            return PutResult::from_error(Some(id), &e.into());
        }

        let had_original = match self.drop_original(id) {
            Ok(found) => found,
            Err(e) if e.is_retryable() => return PutResult::from_error(Some(id), &e.into()),
            Err(e) => {
                tracing::warn!(%id, error = %e, "could not remove original");
                false
            }
        };

        match self
            .index
            .delete_by_filter(Collection::Annotations, &Filter::term(field::ROOT, id))
        {
            Ok(removed) => tracing::debug!(%id, removed, "removed annotations"),
            Err(e) => tracing::warn!(%id, error = %e, "could not remove annotations"),
        }

        match self.index.delete(Collection::Documents, id) {
            Ok(IndexStatus::Deleted) => {
                if self.blobs.is_some() && !had_original {
                    tracing::warn!(%id, "deleted document had no original");
                }
                PutResult::ok(id)
            }
            Ok(IndexStatus::NotFound) => {
                PutResult::failure(Some(id), Status::NotFound, format!("no document '{id}'"))
            }
            Ok(status) => PutResult::failure(
                Some(id),
                index_failure(&status),
                format!("document '{id}' not deleted: {status}"),
            ),
            Err(e) => {
                tracing::error!(%id, error = %e, "document delete failed");
                PutResult::failure(Some(id), Status::Internal, e.to_string())
            }
        }
    }
}
