//! In-memory index
//!
//! Provides [`InMemoryIndex`], a [`DashMap`]-backed [`Index`] with one map
//! per collection. Create-only writes go through the entry API, so two
//! racing creates of the same id see exactly one `Created`.

use crate::index::{Collection, Filter, Hit, Index, IndexError, IndexStatus, Record, Sort};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Thread-safe in-process index
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    documents: DashMap<String, Record>,
    annotations: DashMap<String, Record>,
}

impl InMemoryIndex {
    /// Create an empty index
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, collection: Collection) -> &DashMap<String, Record> {
        match collection {
            Collection::Documents => &self.documents,
            Collection::Annotations => &self.annotations,
        }
    }

    /// Number of records in `collection`
    #[inline]
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        self.map(collection).len()
    }

    /// Whether both collections are empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.annotations.is_empty()
    }
}

impl Index for InMemoryIndex {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, IndexError> {
        Ok(self.map(collection).get(id).map(|r| r.value().clone()))
    }

    fn put(
        &self,
        collection: Collection,
        id: &str,
        record: Record,
        create_only: bool,
    ) -> Result<IndexStatus, IndexError> {
        let status = match self.map(collection).entry(id.to_string()) {
            Entry::Occupied(_) if create_only => IndexStatus::Conflict,
            Entry::Occupied(mut entry) => {
                entry.insert(record);
                IndexStatus::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                IndexStatus::Created
            }
        };
        tracing::debug!(%collection, %id, %status, "put record");
        Ok(status)
    }

    fn search(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: usize,
    ) -> Result<Vec<Hit>, IndexError> {
        let mut hits: Vec<Hit> = self
            .map(collection)
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| Hit {
                id: r.key().clone(),
                record: r.value().clone(),
            })
            .collect();
        match sort {
            Some(sort) => hits.sort_by(|a, b| sort.compare(a, b)),
            None => hits.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        hits.truncate(limit);
        Ok(hits)
    }

    fn delete_by_filter(&self, collection: Collection, filter: &Filter) -> Result<usize, IndexError> {
        let mut removed = 0;
        self.map(collection).retain(|_, record| {
            let keep = !filter.matches(record);
            if !keep {
                removed += 1;
            }
            keep
        });
        tracing::debug!(%collection, removed, "deleted by filter");
        Ok(removed)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<IndexStatus, IndexError> {
        Ok(match self.map(collection).remove(id) {
            Some(_) => IndexStatus::Deleted,
            None => IndexStatus::NotFound,
        })
    }

    fn count(&self, collection: Collection, filter: &Filter) -> Result<usize, IndexError> {
        Ok(self
            .map(collection)
            .iter()
            .filter(|r| filter.matches(r.value()))
            .count())
    }
}
