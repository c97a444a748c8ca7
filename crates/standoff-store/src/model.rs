//! Data model
//!
//! Provides the values exchanged with [`AnnotationStore`](crate::AnnotationStore):
//! - [`Annotation`]: a typed span over a document or another annotation
//! - [`Document`]: stored text plus mapped side fields
//! - [`DocumentWithAnnotations`] and [`ListPage`] for composite reads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stand-off annotation
///
/// `id`, `root` and `order` are assigned by the store; an annotation
/// submitted for creation carries none of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Annotation {
    /// Store-assigned id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Start offset in the target
    pub start: usize,

    /// End offset in the target (exclusive)
    pub end: usize,

    /// Id of the annotated document or annotation
    #[serde(default)]
    pub target: String,

    /// Annotation type; the element name for markup tags
    #[serde(rename = "type")]
    pub kind: String,

    /// Id of a document holding the annotation's body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Provenance tag; `"xml"` for tags produced by ingestion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Free-form attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    /// Document at the top of the target chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Creation order within the root document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
}

impl Annotation {
    /// Create an annotation of `kind` over `[start, end)` of `target`
    #[inline]
    #[must_use]
    pub fn new(start: usize, end: usize, target: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            start,
            end,
            target: target.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Add an attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Link a body document
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether the annotation is a markup tag produced by XML ingestion
    #[inline]
    #[must_use]
    pub fn is_markup(&self) -> bool {
        self.source.as_deref() == Some(crate::record::XML_SOURCE)
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document id
    pub id: String,
    /// Body text
    pub text: String,
    /// Side fields extracted by the field mapping
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// A document together with its annotations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentWithAnnotations {
    /// The document
    #[serde(flatten)]
    pub document: Document,
    /// Annotations, sorted by order
    pub annotations: Vec<Annotation>,
}

/// One page of document ids
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListPage {
    /// Ids on this page
    pub result: Vec<String>,
    /// Offset of the first id
    pub from: usize,
    /// Number of matching documents
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn annotation_wire_format() {
        let ann = Annotation::new(0, 4, "doc", "note").with_attribute("lang", "en");
        let value = serde_json::to_value(&ann).unwrap();
        assert_eq!(
            value,
            json!({
                "start": 0,
                "end": 4,
                "target": "doc",
                "type": "note",
                "attributes": { "lang": "en" },
            })
        );
    }

    #[test]
    fn annotation_accepts_minimal_input() {
        let ann: Annotation =
            serde_json::from_value(json!({"start": 1, "end": 2, "type": "w"})).unwrap();
        assert_eq!(ann.target, "");
        assert!(ann.id.is_none());
        assert!(!ann.is_markup());
    }

    #[test]
    fn document_with_annotations_flattens_document() {
        let doc = DocumentWithAnnotations {
            document: Document {
                id: "d".to_string(),
                text: "t".to_string(),
                fields: BTreeMap::new(),
            },
            annotations: Vec::new(),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"id": "d", "text": "t", "annotations": []}));
    }
}
