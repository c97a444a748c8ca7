//! Testing utilities for the standoff workspace
//!
//! Shared fixtures, temporary stores and a fault-injecting index.

#![allow(missing_docs)]

use parking_lot::Mutex;
use standoff_codec::{FieldSpec, MappingSpec};
use standoff_store::{
    AnnotationStore, Collection, Filter, Hit, Index, IndexError, IndexStatus, InMemoryIndex,
    Record, Sort, StoreConfig,
};
use std::collections::BTreeSet;
use tempfile::TempDir;

pub const MESSAGE_XML: &str = r#"<msg num="1">hello, <xml num="2" attr="extra"/> world!</msg>"#;

pub const TEI_NS: &str = "http://www.tei-c.org/ns/1.0";

pub const TEI_XML: &str = r##"<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader><title>Letter to Thomas More</title><date when="1511-06-09"/></teiHeader><text><body><p n="1">Greetings, <persName ref="#More">my More</persName>.</p><p n="2">Farewell<!-- closing -->, from Paris.</p></body></text></TEI>"##;

pub fn tei_mapping() -> MappingSpec {
    MappingSpec {
        fields: vec![
            FieldSpec::new("body", "text", "/tei:TEI/tei:text"),
            FieldSpec::new("title", "keyword", "//tei:teiHeader/tei:title"),
            FieldSpec::new("date", "date", "//tei:date/@when"),
        ],
        ..MappingSpec::default()
    }
    .with_namespace("tei", TEI_NS)
}

pub fn memory_store() -> AnnotationStore {
    AnnotationStore::in_memory(&StoreConfig::default()).unwrap()
}

/// A store keeping originals in a temporary directory, removed on drop
pub struct TempStore<I: Index = InMemoryIndex> {
    pub store: AnnotationStore<I>,
    pub dir: TempDir,
}

impl<I: Index> std::ops::Deref for TempStore<I> {
    type Target = AnnotationStore<I>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

pub fn temp_store_with<I: Index>(config: StoreConfig, index: I) -> TempStore<I> {
    let dir = tempfile::tempdir().unwrap();
    let config = config.with_blob_root(dir.path());
    let store = AnnotationStore::open(&config, index).unwrap();
    TempStore { store, dir }
}

pub fn temp_store() -> TempStore {
    temp_store_with(StoreConfig::default(), InMemoryIndex::new())
}

/// Which bulk items a [`FlakyIndex`] rejects
#[derive(Debug, Clone)]
pub enum Fault {
    /// Items at these positions of each bulk call
    Items(BTreeSet<usize>),
    /// Items from this position on
    From(usize),
    /// The whole call
    Call,
}

/// An [`Index`] that rejects selected bulk items without storing them.
/// Single-record writes and reads pass through.
pub struct FlakyIndex<I: Index = InMemoryIndex> {
    inner: I,
    fault: Mutex<Option<Fault>>,
}

impl FlakyIndex<InMemoryIndex> {
    pub fn new() -> Self {
        Self::wrap(InMemoryIndex::new())
    }
}

impl Default for FlakyIndex<InMemoryIndex> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Index> FlakyIndex<I> {
    pub fn wrap(inner: I) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn fail(&self, fault: Fault) {
        *self.fault.lock() = Some(fault);
    }

    pub fn heal(&self) {
        *self.fault.lock() = None;
    }
}

impl<I: Index> Index for FlakyIndex<I> {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, IndexError> {
        self.inner.get(collection, id)
    }

    fn put(
        &self,
        collection: Collection,
        id: &str,
        record: Record,
        create_only: bool,
    ) -> Result<IndexStatus, IndexError> {
        self.inner.put(collection, id, record, create_only)
    }

    fn search(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: usize,
    ) -> Result<Vec<Hit>, IndexError> {
        self.inner.search(collection, filter, sort, limit)
    }

    fn bulk_put(
        &self,
        collection: Collection,
        items: Vec<(String, Record)>,
        create_only: bool,
    ) -> Result<Vec<IndexStatus>, IndexError> {
        let fault = self.fault.lock().clone();
        let rejects = |position: usize| match &fault {
            None => false,
            Some(Fault::Items(positions)) => positions.contains(&position),
            Some(Fault::From(first)) => position >= *first,
            Some(Fault::Call) => true,
        };
        if matches!(fault, Some(Fault::Call)) {
            return Err(IndexError::Unavailable("injected failure".to_string()));
        }
        items
            .into_iter()
            .enumerate()
            .map(|(position, (id, record))| {
                if rejects(position) {
                    Ok(IndexStatus::Rejected("injected failure".to_string()))
                } else {
                    self.inner.put(collection, &id, record, create_only)
                }
            })
            .collect()
    }

    fn delete_by_filter(&self, collection: Collection, filter: &Filter) -> Result<usize, IndexError> {
        self.inner.delete_by_filter(collection, filter)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<IndexStatus, IndexError> {
        self.inner.delete(collection, id)
    }

    fn count(&self, collection: Collection, filter: &Filter) -> Result<usize, IndexError> {
        self.inner.count(collection, filter)
    }
}
