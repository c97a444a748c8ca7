use super::{assign_id, index_failure, AnnotationStore};
use crate::error::StoreError;
use crate::index::{Collection, Filter, Index, Sort};
use crate::record::{field, AnnotationRecord, XML_SOURCE};
use crate::result::{PutResult, Status};
use standoff_blob::require_valid;
use standoff_codec::{flatten, parse, reconstruct, reconstruct_subtree, Tag, XmlElement, XMLNS};

impl<I: Index> AnnotationStore<I> {
    /// Ingest an XML document
    ///
    /// The mapping selects the body element and side fields; the body is
    /// flattened into the document text and one `source = "xml"`
    /// annotation per element. The document is written first; a failure
    /// there leaves nothing behind. Tags that fail to write are reported
    /// but the document and the tags already written stay.
    pub fn put_xml(&self, id: Option<&str>, raw: &str) -> PutResult {
        let id = match assign_id(id) {
            Ok(id) => id,
            Err(e) => return PutResult::from_error(id, &e),
        };
        self.try_put_xml(&id, raw)
            .unwrap_or_else(|e| PutResult::from_error(Some(&id), &e))
    }

    fn try_put_xml(&self, id: &str, raw: &str) -> Result<PutResult, StoreError> {
        let root = parse(raw)?;
        let mapped = self.mapping.apply(&root)?;
        let mut flat = flatten(mapped.body, self.unit);
        // The body keeps the bindings it inherits from outside the body
        if let (Some(inherited), Some(top)) = (root.inherited_namespaces(mapped.body), flat.tags.first_mut()) {
            for (prefix, uri) in inherited {
                let name = if prefix.is_empty() {
                    XMLNS.to_string()
                } else {
                    format!("{XMLNS}:{prefix}")
                };
                top.attributes.entry(name).or_insert(uri);
            }
        }
        let items = flat
            .tags
            .iter()
            .map(|tag| Ok((tag.id.clone(), AnnotationRecord::from_tag(tag, id).encode()?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let created = self.insert_document(id, &flat.text, &mapped.fields);
        if !created.is_success() {
            return Ok(created);
        }
        self.keep_original(id, raw);

        let total = items.len();
        let statuses = match self.index.bulk_put(Collection::Annotations, items, true) {
            Ok(statuses) => statuses,
            Err(e) => {
                tracing::error!(%id, error = %e, "tag bulk write failed");
                return Ok(PutResult::failure(
                    Some(id),
                    Status::Internal,
                    format!("partial: 0 of {total} tags written"),
                ));
            }
        };
        let written = statuses.iter().filter(|s| s.is_success()).count();
        if let Some(first) = statuses.iter().find(|s| !s.is_success()) {
            tracing::warn!(%id, written, total, first = %first, "tags partially written");
            return Ok(PutResult::failure(
                Some(id),
                index_failure(first),
                format!("partial: {written} of {total} tags written"),
            ));
        }

        tracing::debug!(%id, tags = total, unit = %self.unit, "ingested xml");
        Ok(PutResult::created(id))
    }

    /// Replace an XML document
    ///
    /// Identical to the kept original: `Ok` without changes. Otherwise the
    /// document is deleted with everything rooted in it and ingested again.
    pub fn update_xml(&self, id: &str, raw: &str) -> PutResult {
        if let Err(e) = require_valid(id) {
            return PutResult::from_error(Some(id), &e.into());
        }
        match self.get_original(id) {
            Ok(Some(original)) if original == raw.as_bytes() => {
                tracing::debug!(%id, "original unchanged");
                return PutResult::ok(id);
            }
            Ok(_) => {}
            Err(e) => return PutResult::from_error(Some(id), &e),
        }

        let deleted = self.delete(id);
        if !deleted.is_success() && deleted.status != Status::NotFound {
            return deleted;
        }
        self.put_xml(Some(id), raw)
    }

    /// Rebuild the element tree of an ingested document
    ///
    /// # Errors
    /// `NotFound` for an unknown document, `BadRequest` when it was not
    /// ingested from XML, `Internal` when the stored tags do not nest.
    pub fn reconstruct_xml(&self, id: &str) -> Result<XmlElement, StoreError> {
        let (text, tags) = self.markup(id)?;
        Ok(reconstruct(&text, &tags, self.unit)?)
    }

    /// Rebuild one element of an ingested document, declaring the
    /// namespaces it inherits
    ///
    /// # Errors
    /// As [`reconstruct_xml`](Self::reconstruct_xml); `NotFound` when
    /// `tag_id` is not one of the document's tags.
    pub fn reconstruct_element(&self, id: &str, tag_id: &str) -> Result<XmlElement, StoreError> {
        let (text, tags) = self.markup(id)?;
        if !tags.iter().any(|t| t.id == tag_id) {
            return Err(StoreError::NotFound(format!("tag '{tag_id}' in document '{id}'")));
        }
        Ok(reconstruct_subtree(&text, &tags, self.unit, tag_id)?)
    }

    /// Body text and markup tags of `id`, tags in order
    fn markup(&self, id: &str) -> Result<(String, Vec<Tag>), StoreError> {
        let document = self
            .get_document(id)?
            .ok_or_else(|| StoreError::NotFound(format!("document '{id}'")))?;
        let filter = Filter::term(field::TARGET, id).and(Filter::term(field::SOURCE, XML_SOURCE));
        // Every tag is needed, regardless of the search limit
        let count = self.index.count(Collection::Annotations, &filter)?;
        if count == 0 {
            return Err(StoreError::BadRequest(format!(
                "document '{id}' was not ingested from xml"
            )));
        }
        let tags = self
            .index
            .search(
                Collection::Annotations,
                &filter,
                Some(&Sort::asc(field::ORDER)),
                count,
            )?
            .into_iter()
            .map(|hit| AnnotationRecord::decode(&hit.id, hit.record).map(|r| r.into_tag(&hit.id)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((document.text, tags))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Annotation, AnnotationStore, ErrorKind, Status, StoreConfig};
    use pretty_assertions::assert_eq;
    use standoff_codec::parse;

    const MSG: &str = r#"<msg num="1">hello, <xml num="2" attr="extra"/> world!</msg>"#;

    fn store() -> AnnotationStore {
        AnnotationStore::in_memory(&StoreConfig::default()).unwrap()
    }

    #[test]
    fn ingests_message() {
        let store = store();
        assert_eq!(store.put_xml(Some("doc1"), MSG).status, Status::Created);
        assert_eq!(store.get_document("doc1").unwrap().unwrap().text, "hello,  world!");

        let tags = store.get_annotations("doc1", None, false).unwrap();
        let spans: Vec<_> = tags
            .iter()
            .map(|a| (a.kind.as_str(), a.start, a.end, a.source.as_deref()))
            .collect();
        assert_eq!(
            spans,
            [("msg", 0, 14, Some("xml")), ("xml", 7, 7, Some("xml"))]
        );
        assert_eq!(tags[1].attributes["attr"], "extra");
    }

    #[test]
    fn malformed_xml_is_bad_request() {
        let store = store();
        let result = store.put_xml(Some("bad"), "<a><b></a>");
        assert_eq!(result.status, Status::BadRequest);
        assert!(result.message.unwrap().starts_with("malformed xml"));
        assert!(store.get_document("bad").unwrap().is_none());
    }

    #[test]
    fn duplicate_id_conflicts_without_touching_tags() {
        let store = store();
        store.put_xml(Some("d"), "<a>one</a>");
        let result = store.put_xml(Some("d"), "<b>two</b>");
        assert_eq!(result.status, Status::Conflict);
        let tags = store.get_annotations("d", None, false).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].kind, "a");
    }

    #[test]
    fn reconstructs_ingested_markup() {
        let store = store();
        store.put_xml(Some("doc1"), MSG);
        assert_eq!(store.reconstruct_xml("doc1").unwrap(), parse(MSG).unwrap());
    }

    #[test]
    fn plain_document_cannot_be_reconstructed() {
        let store = store();
        store.create_document(Some("plain"), "text");
        let err = store.reconstruct_xml("plain").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(store.reconstruct_xml("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn user_annotations_do_not_disturb_reconstruction() {
        let store = store();
        store.put_xml(Some("doc1"), MSG);
        let result = store.create_annotation(None, Annotation::new(0, 5, "doc1", "greeting"));
        assert_eq!(result.status, Status::Created);
        assert_eq!(store.reconstruct_xml("doc1").unwrap(), parse(MSG).unwrap());
    }

    #[test]
    fn unknown_element_is_not_found() {
        let store = store();
        store.put_xml(Some("doc1"), MSG);
        let err = store.reconstruct_element("doc1", "nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_replaces_markup() {
        let store = store();
        store.put_xml(Some("d"), "<a>one</a>");
        let result = store.update_xml("d", "<b>two</b>");
        assert_eq!(result.status, Status::Created);
        assert_eq!(store.reconstruct_xml("d").unwrap().to_xml(), "<b>two</b>");
        assert_eq!(store.get_annotations("d", None, true).unwrap().len(), 1);
    }
}
