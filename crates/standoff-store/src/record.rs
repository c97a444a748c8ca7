//! Record layout
//!
//! Field names used in the backing index and conversions between records
//! and model values. Annotations and markup tags share one layout; tags
//! additionally carry `xml_parent`.

use crate::error::StoreError;
use crate::index::{Collection, Record};
use crate::model::{Annotation, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use standoff_codec::Tag;
use std::collections::BTreeMap;

/// Source value marking ingested markup tags
pub const XML_SOURCE: &str = "xml";

/// Field names
pub mod field {
    /// Annotated document or annotation
    pub const TARGET: &str = "target";
    /// Root document of the target chain
    pub const ROOT: &str = "root";
    /// Annotation type
    pub const TYPE: &str = "type";
    /// Provenance
    pub const SOURCE: &str = "source";
    /// Linked body document
    pub const BODY: &str = "body";
    /// Creation order within the root
    pub const ORDER: &str = "order";
    /// Enclosing tag of a markup tag
    pub const XML_PARENT: &str = "xml_parent";

    /// Fields holding ids of other records, not searchable text
    pub const LINKS: &[&str] = &[TARGET, ROOT, BODY, XML_PARENT];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AnnotationRecord {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) target: String,
    pub(crate) root: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<String>,
    #[serde(default, rename = "attrib")]
    pub(crate) attributes: BTreeMap<String, String>,
    pub(crate) order: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) xml_parent: Option<String>,
}

impl AnnotationRecord {
    pub(crate) fn from_annotation(ann: Annotation, root: String, order: u64) -> Self {
        Self {
            start: ann.start,
            end: ann.end,
            target: ann.target,
            root,
            kind: ann.kind,
            body: ann.body,
            source: ann.source,
            attributes: ann.attributes,
            order,
            xml_parent: None,
        }
    }

    pub(crate) fn from_tag(tag: &Tag, doc_id: &str) -> Self {
        Self {
            start: tag.start,
            end: tag.end,
            target: doc_id.to_string(),
            root: doc_id.to_string(),
            kind: tag.name.clone(),
            body: None,
            source: Some(XML_SOURCE.to_string()),
            attributes: tag.attributes.clone(),
            order: tag.order as u64,
            xml_parent: tag.xml_parent.clone(),
        }
    }

    pub(crate) fn decode(id: &str, record: Record) -> Result<Self, StoreError> {
        serde_json::from_value(Value::Object(record)).map_err(|e| StoreError::Corrupt {
            collection: Collection::Annotations,
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn encode(&self) -> Result<Record, StoreError> {
        match serde_json::to_value(self).map_err(crate::index::IndexError::from)? {
            Value::Object(map) => Ok(map),
            other => Err(crate::index::IndexError::Backend(format!(
                "record encoded as {other}, expected an object"
            ))
            .into()),
        }
    }

    pub(crate) fn into_annotation(self, id: &str) -> Annotation {
        Annotation {
            id: Some(id.to_string()),
            start: self.start,
            end: self.end,
            target: self.target,
            kind: self.kind,
            body: self.body,
            source: self.source,
            attributes: self.attributes,
            root: Some(self.root),
            order: Some(self.order),
        }
    }

    pub(crate) fn into_tag(self, id: &str) -> Tag {
        Tag {
            id: id.to_string(),
            name: self.kind,
            start: self.start,
            end: self.end,
            attributes: self.attributes,
            xml_parent: self.xml_parent,
            order: usize::try_from(self.order).unwrap_or(usize::MAX),
        }
    }
}

pub(crate) fn document_record(
    body_field: &str,
    text: &str,
    fields: &BTreeMap<String, String>,
) -> Record {
    let mut record: Record = fields
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    record.insert(body_field.to_string(), Value::String(text.to_string()));
    record
}

pub(crate) fn decode_document(id: &str, body_field: &str, mut record: Record) -> Result<Document, StoreError> {
    let text = match record.remove(body_field) {
        Some(Value::String(text)) => text,
        Some(_) => {
            return Err(StoreError::Corrupt {
                collection: Collection::Documents,
                id: id.to_string(),
                reason: format!("field '{body_field}' is not a string"),
            })
        }
        None => String::new(),
    };
    let fields = record
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect();
    Ok(Document {
        id: id.to_string(),
        text,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn annotation_record_layout() {
        let ann = Annotation::new(3, 7, "t", "note").with_attribute("k", "v");
        let record = AnnotationRecord::from_annotation(ann, "r".to_string(), 4)
            .encode()
            .unwrap();
        assert_eq!(
            Value::Object(record),
            json!({
                "start": 3, "end": 7, "target": "t", "root": "r", "type": "note",
                "attrib": {"k": "v"}, "order": 4,
            })
        );
    }

    #[test]
    fn tag_survives_record() {
        let tag = Tag {
            id: "t1".to_string(),
            name: "p".to_string(),
            start: 0,
            end: 5,
            attributes: BTreeMap::from([("n".to_string(), "1".to_string())]),
            xml_parent: Some("t0".to_string()),
            order: 1,
        };
        let record = AnnotationRecord::from_tag(&tag, "doc").encode().unwrap();
        assert_eq!(record[field::SOURCE], XML_SOURCE);
        assert_eq!(record[field::ROOT], "doc");
        let back = AnnotationRecord::decode("t1", record).unwrap().into_tag("t1");
        assert_eq!(back, tag);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let record = match json!({"start": "zero"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let err = AnnotationRecord::decode("a", record).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn document_fields_round_trip() {
        let fields = BTreeMap::from([("title".to_string(), "T".to_string())]);
        let record = document_record("body", "text", &fields);
        let doc = decode_document("d", "body", record).unwrap();
        assert_eq!(doc.text, "text");
        assert_eq!(doc.fields, fields);
    }
}
