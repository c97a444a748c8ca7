//! Backing index contract
//!
//! Provides the [`Index`] trait the store persists through, together with
//! the query vocabulary it understands ([`Filter`], [`Sort`]) and per-write
//! outcomes ([`IndexStatus`]). Records are JSON objects kept in one of two
//! [`Collection`]s.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

/// A stored record
pub type Record = Map<String, Value>;

/// Logical collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Document records
    Documents,
    /// Annotation records, markup tags included
    Annotations,
}

impl Collection {
    /// Collection name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Annotations => "annotations",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every record
    All,
    /// Field equals value
    Term(String, Value),
    /// Case-insensitive substring over string fields and nested string
    /// values, ignoring the top-level fields in `skip`
    Query { text: String, skip: Vec<String> },
    /// All sub-filters match
    And(Vec<Filter>),
}

impl Filter {
    /// Exact-match filter
    #[inline]
    #[must_use]
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term(field.into(), value.into())
    }

    /// Free-text filter
    #[inline]
    #[must_use]
    pub fn query(text: impl Into<String>) -> Self {
        Self::Query {
            text: text.into(),
            skip: Vec::new(),
        }
    }

    /// Free-text filter that does not look at the `skip` fields
    #[must_use]
    pub fn query_skipping(text: impl Into<String>, skip: &[&str]) -> Self {
        Self::Query {
            text: text.into(),
            skip: skip.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Conjunction with `other`
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), f) => {
                left.push(f);
                Self::And(left)
            }
            (f, Self::And(mut right)) => {
                right.insert(0, f);
                Self::And(right)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    /// Conjunction with an optional free-text query
    #[must_use]
    pub fn with_query(self, query: Option<&str>) -> Self {
        self.with_query_skipping(query, &[])
    }

    /// Conjunction with an optional free-text query over all but `skip`
    #[must_use]
    pub fn with_query_skipping(self, query: Option<&str>, skip: &[&str]) -> Self {
        match query.map(str::trim) {
            Some(q) if !q.is_empty() => self.and(Self::query_skipping(q, skip)),
            _ => self,
        }
    }

    /// Whether `record` passes the filter
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Term(field, value) => record.get(field) == Some(value),
            Self::Query { text, skip } => {
                let needle = text.to_lowercase();
                record
                    .iter()
                    .filter(|(name, _)| !skip.contains(*name))
                    .any(|(_, v)| contains_text(v, &needle))
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Object(map) => map.values().any(|v| contains_text(v, needle)),
        Value::Array(items) => items.iter().any(|v| contains_text(v, needle)),
        _ => false,
    }
}

/// Result ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sort {
    /// By record id
    Id,
    /// By field, ascending
    Asc(String),
    /// By field, descending
    Desc(String),
}

impl Sort {
    /// Ascending by `field`
    #[inline]
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self::Asc(field.into())
    }

    /// Descending by `field`
    #[inline]
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self::Desc(field.into())
    }

    /// Compare two hits. Records missing the field sort last in either
    /// direction; ties fall back to the id.
    #[must_use]
    pub fn compare(&self, a: &Hit, b: &Hit) -> Ordering {
        let (field, descending) = match self {
            Self::Id => return a.id.cmp(&b.id),
            Self::Asc(field) => (field, false),
            Self::Desc(field) => (field, true),
        };
        let by_field = match (a.record.get(field), b.record.get(field)) {
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_field.then_with(|| a.id.cmp(&b.id))
    }
}

/// Numbers before strings before everything else
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        (Value::String(_), _) => Ordering::Less,
        (_, Value::String(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Record id
    pub id: String,
    /// Record content
    pub record: Record,
}

/// Outcome of a single write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    /// New record stored
    Created,
    /// Existing record overwritten
    Updated,
    /// Record removed
    Deleted,
    /// No record with that id
    NotFound,
    /// Create-only write over an existing record
    Conflict,
    /// Record refused by the backend
    Rejected(String),
}

impl IndexStatus {
    /// Whether the write took effect
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

impl Display for IndexStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
            Self::Deleted => f.write_str("deleted"),
            Self::NotFound => f.write_str("not found"),
            Self::Conflict => f.write_str("conflict"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Backend failures
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Backend could not be reached
    #[error("index unavailable: {0}")]
    Unavailable(String),

    /// Record could not be encoded or decoded
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure
    #[error("index backend error: {0}")]
    Backend(String),
}

impl IndexError {
    /// Check if the call may succeed when retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Storage for documents and annotations
///
/// Implementations must make create-only writes atomic per id; nothing
/// else is assumed to be transactional.
pub trait Index: Send + Sync {
    /// Fetch a record
    ///
    /// # Errors
    /// Backend failure.
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, IndexError>;

    /// Store a record. With `create_only`, an existing id yields
    /// [`IndexStatus::Conflict`] and leaves the record untouched.
    ///
    /// # Errors
    /// Backend failure.
    fn put(
        &self,
        collection: Collection,
        id: &str,
        record: Record,
        create_only: bool,
    ) -> Result<IndexStatus, IndexError>;

    /// Records matching `filter`, ordered by `sort`, at most `limit`
    ///
    /// # Errors
    /// Backend failure.
    fn search(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: usize,
    ) -> Result<Vec<Hit>, IndexError>;

    /// Store many records, reporting a status per item in input order
    ///
    /// # Errors
    /// Failure of the call as a whole; per-item failures are statuses.
    fn bulk_put(
        &self,
        collection: Collection,
        items: Vec<(String, Record)>,
        create_only: bool,
    ) -> Result<Vec<IndexStatus>, IndexError> {
        items
            .into_iter()
            .map(|(id, record)| self.put(collection, &id, record, create_only))
            .collect()
    }

    /// Remove every record matching `filter`, returning how many went
    ///
    /// # Errors
    /// Backend failure.
    fn delete_by_filter(&self, collection: Collection, filter: &Filter) -> Result<usize, IndexError>;

    /// Remove one record
    ///
    /// # Errors
    /// Backend failure.
    fn delete(&self, collection: Collection, id: &str) -> Result<IndexStatus, IndexError>;

    /// Number of records matching `filter`
    ///
    /// # Errors
    /// Backend failure.
    fn count(&self, collection: Collection, filter: &Filter) -> Result<usize, IndexError> {
        Ok(self.search(collection, filter, None, usize::MAX)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn hit(id: &str, value: Value) -> Hit {
        Hit {
            id: id.to_string(),
            record: record(value),
        }
    }

    #[test]
    fn term_matches_exact_value() {
        let r = record(json!({"root": "d1", "order": 3}));
        assert!(Filter::term("root", "d1").matches(&r));
        assert!(!Filter::term("root", "d2").matches(&r));
        assert!(Filter::term("order", 3).matches(&r));
        assert!(!Filter::term("missing", "x").matches(&r));
    }

    #[test]
    fn query_searches_nested_strings() {
        let r = record(json!({"type": "persName", "attrib": {"ref": "#Erasmus"}}));
        assert!(Filter::query("PERS").matches(&r));
        assert!(Filter::query("erasmus").matches(&r));
        assert!(!Filter::query("luther").matches(&r));
    }

    #[test]
    fn query_ignores_skipped_fields() {
        let r = record(json!({"type": "note", "target": "7e75d583-4f1a", "root": "7e75d583-4f1a"}));
        assert!(Filter::query("7e75").matches(&r));
        let skip = ["target", "root"];
        assert!(!Filter::query_skipping("7e75", &skip).matches(&r));
        assert!(!Filter::query_skipping("4", &skip).matches(&r));
        assert!(Filter::query_skipping("NOTE", &skip).matches(&r));
        assert_eq!(
            Filter::All.with_query_skipping(Some(" x "), &skip),
            Filter::query_skipping("x", &skip)
        );
    }

    #[test]
    fn and_flattens_and_drops_all() {
        let f = Filter::All
            .and(Filter::term("a", 1))
            .and(Filter::term("b", 2).and(Filter::term("c", 3)));
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::term("a", 1),
                Filter::term("b", 2),
                Filter::term("c", 3)
            ])
        );
        assert_eq!(Filter::term("a", 1).with_query(Some("  ")), Filter::term("a", 1));
    }

    #[test]
    fn sort_puts_missing_fields_last() {
        let mut hits = vec![
            hit("c", json!({})),
            hit("b", json!({"order": 10})),
            hit("a", json!({"order": 2})),
        ];
        hits.sort_by(|x, y| Sort::asc("order").compare(x, y));
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        hits.sort_by(|x, y| Sort::desc("order").compare(x, y));
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn status_success() {
        assert!(IndexStatus::Created.is_success());
        assert!(!IndexStatus::Conflict.is_success());
        assert_eq!(IndexStatus::Rejected("bad".into()).to_string(), "rejected: bad");
    }
}
