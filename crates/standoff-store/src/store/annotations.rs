use super::{new_id, AnnotationStore};
use crate::error::StoreError;
use crate::index::{Collection, Filter, Hit, Index, IndexStatus, Sort};
use crate::model::{Annotation, DocumentWithAnnotations};
use crate::record::{decode_document, field, AnnotationRecord, XML_SOURCE};
use crate::result::PutResult;
use std::collections::HashSet;

impl<I: Index> AnnotationStore<I> {
    /// Create an annotation on a document or another annotation
    ///
    /// `target`, when given, is the target named by the caller's path and
    /// must agree with `ann.target` (an empty `ann.target` adopts it). The
    /// annotation inherits its target's root document and is placed after
    /// every existing annotation on that root.
    pub fn create_annotation(&self, target: Option<&str>, ann: Annotation) -> PutResult {
        match self.prepare_annotation(target, ann) {
            Ok((id, record)) => {
                let result = self.create_record(Collection::Annotations, &id, record);
                if result.is_success() {
                    tracing::debug!(%id, "created annotation");
                }
                result
            }
            Err(e) => PutResult::from_error(None, &e),
        }
    }

    fn prepare_annotation(
        &self,
        target: Option<&str>,
        mut ann: Annotation,
    ) -> Result<(String, crate::index::Record), StoreError> {
        if ann.id.is_some() {
            return Err(StoreError::BadRequest(
                "annotation may not determine its own id".to_string(),
            ));
        }
        if let Some(path) = target {
            if ann.target.is_empty() {
                ann.target = path.to_string();
            } else if ann.target != path {
                return Err(StoreError::BadRequest(format!(
                    "target mismatch: '{path}' in path, '{}' in annotation",
                    ann.target
                )));
            }
        }
        if ann.target.is_empty() {
            return Err(StoreError::BadRequest("annotation has no target".to_string()));
        }
        if ann.kind.is_empty() {
            return Err(StoreError::BadRequest("annotation has no type".to_string()));
        }
        if ann.start > ann.end {
            return Err(StoreError::BadRequest(format!(
                "start {} is after end {}",
                ann.start, ann.end
            )));
        }
        if ann.is_markup() {
            return Err(StoreError::BadRequest(format!(
                "source '{XML_SOURCE}' is reserved for ingested markup"
            )));
        }

        let root = self.resolve_root(&ann)?;
        let order = self.next_order(&root)?;
        let record = AnnotationRecord::from_annotation(ann, root, order).encode()?;
        Ok((new_id(), record))
    }

    /// Root document of `ann`'s target; checks the span against a document
    /// target's length
    fn resolve_root(&self, ann: &Annotation) -> Result<String, StoreError> {
        let target = ann.target.as_str();
        if let Some(record) = self.index.get(Collection::Documents, target)? {
            let doc = decode_document(target, self.mapping.body_field(), record)?;
            let length = self.unit.measure(&doc.text);
            if ann.end > length {
                return Err(StoreError::BadRequest(format!(
                    "span [{}, {}) exceeds length {length} of document '{target}'",
                    ann.start, ann.end
                )));
            }
            return Ok(target.to_string());
        }
        if let Some(record) = self.index.get(Collection::Annotations, target)? {
            return Ok(AnnotationRecord::decode(target, record)?.root);
        }
        Err(StoreError::NotFound(format!("target '{target}'")))
    }

    /// One past the highest order under `root`
    fn next_order(&self, root: &str) -> Result<u64, StoreError> {
        let last = self.index.search(
            Collection::Annotations,
            &Filter::term(field::ROOT, root),
            Some(&Sort::desc(field::ORDER)),
            1,
        )?;
        Ok(last
            .into_iter()
            .next()
            .and_then(|hit| hit.record.get(field::ORDER).and_then(serde_json::Value::as_u64))
            .map_or(0, |order| order + 1))
    }

    /// Fetch one annotation
    ///
    /// # Errors
    /// Index failure or an undecodable record.
    pub fn get_annotation(&self, id: &str) -> Result<Option<Annotation>, StoreError> {
        self.index
            .get(Collection::Annotations, id)?
            .map(|record| AnnotationRecord::decode(id, record).map(|r| r.into_annotation(id)))
            .transpose()
    }

    /// Annotations on `id`, sorted by order
    ///
    /// Without `recursive`, only annotations targeting `id` directly. With
    /// it, everything reachable through target links: a single root lookup
    /// when `id` is a document, a walk down the target chain otherwise. A
    /// `query` restricts the result to annotations whose string values
    /// other than id links contain it; the walk still descends through non-matching ones.
    ///
    /// # Errors
    /// Index failure or an undecodable record.
    pub fn get_annotations(
        &self,
        id: &str,
        query: Option<&str>,
        recursive: bool,
    ) -> Result<Vec<Annotation>, StoreError> {
        if !recursive {
            let filter = Filter::term(field::TARGET, id).with_query_skipping(query, field::LINKS);
            return self.find(&filter);
        }
        if self.is_document(id)? {
            let filter = Filter::term(field::ROOT, id).with_query_skipping(query, field::LINKS);
            return self.find(&filter);
        }

        let wanted = Filter::All.with_query_skipping(query, field::LINKS);
        let mut seen = HashSet::new();
        let mut pending = vec![id.to_string()];
        let mut found = Vec::new();
        while let Some(target) = pending.pop() {
            for hit in self.search_sorted(&Filter::term(field::TARGET, target))? {
                if !seen.insert(hit.id.clone()) {
                    continue;
                }
                pending.push(hit.id.clone());
                if wanted.matches(&hit.record) {
                    found.push(decode_hit(hit)?);
                }
            }
        }
        found.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    /// A document with its annotations; `None` for an unknown id
    ///
    /// # Errors
    /// Index failure or an undecodable record.
    pub fn get_with_annotations(
        &self,
        id: &str,
        recursive: bool,
    ) -> Result<Option<DocumentWithAnnotations>, StoreError> {
        let Some(document) = self.get_document(id)? else {
            return Ok(None);
        };
        let field = if recursive { field::ROOT } else { field::TARGET };
        let annotations = self.find(&Filter::term(field, id))?;
        Ok(Some(DocumentWithAnnotations {
            document,
            annotations,
        }))
    }

    /// Link `body_id` as the body of annotation `ann_id`
    ///
    /// The link is set at most once: repeating it yields `NoContent`, a
    /// different body `Conflict`.
    pub fn add_body(&self, ann_id: &str, body_id: &str) -> PutResult {
        self.try_add_body(ann_id, body_id)
            .unwrap_or_else(|e| PutResult::from_error(Some(ann_id), &e))
    }

    fn try_add_body(&self, ann_id: &str, body_id: &str) -> Result<PutResult, StoreError> {
        let record = self
            .index
            .get(Collection::Annotations, ann_id)?
            .ok_or_else(|| StoreError::NotFound(format!("annotation '{ann_id}'")))?;
        let mut ann = AnnotationRecord::decode(ann_id, record)?;
        match ann.body.as_deref() {
            Some(body) if body == body_id => return Ok(PutResult::no_content(ann_id)),
            Some(body) => {
                return Err(StoreError::Conflict(format!(
                    "annotation '{ann_id}' already has body '{body}'"
                )))
            }
            None => {}
        }
        if !self.is_document(body_id)? {
            return Err(StoreError::NotFound(format!("body document '{body_id}'")));
        }

        ann.body = Some(body_id.to_string());
        match self
            .index
            .put(Collection::Annotations, ann_id, ann.encode()?, false)?
        {
            IndexStatus::Created | IndexStatus::Updated => {
                tracing::debug!(%ann_id, %body_id, "linked body");
                Ok(PutResult::ok(ann_id))
            }
            status => Ok(PutResult::failure(
                Some(ann_id),
                super::index_failure(&status),
                format!("body link not written: {status}"),
            )),
        }
    }

    fn search_sorted(&self, filter: &Filter) -> Result<Vec<Hit>, StoreError> {
        Ok(self.index.search(
            Collection::Annotations,
            filter,
            Some(&Sort::asc(field::ORDER)),
            self.search_limit,
        )?)
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Annotation>, StoreError> {
        self.search_sorted(filter)?
            .into_iter()
            .map(decode_hit)
            .collect()
    }
}

fn decode_hit(hit: Hit) -> Result<Annotation, StoreError> {
    AnnotationRecord::decode(&hit.id, hit.record).map(|r| r.into_annotation(&hit.id))
}

#[cfg(test)]
mod tests {
    use crate::{Annotation, AnnotationStore, Status, StoreConfig};
    use pretty_assertions::assert_eq;

    fn store_with_doc(text: &str) -> (AnnotationStore, String) {
        let store = AnnotationStore::in_memory(&StoreConfig::default()).unwrap();
        let id = store.create_document(None, text).id.unwrap();
        (store, id)
    }

    #[test]
    fn rejects_preset_id() {
        let (store, doc) = store_with_doc("text");
        let mut ann = Annotation::new(0, 1, doc, "w");
        ann.id = Some("mine".to_string());
        let result = store.create_annotation(None, ann);
        assert_eq!(result.status, Status::BadRequest);
        assert_eq!(
            result.message.as_deref(),
            Some("annotation may not determine its own id")
        );
    }

    #[test]
    fn rejects_target_mismatch() {
        let (store, doc) = store_with_doc("text");
        let result = store.create_annotation(Some("other"), Annotation::new(0, 1, &doc, "w"));
        assert_eq!(result.status, Status::BadRequest);
        assert_eq!(
            result.message.unwrap(),
            format!("target mismatch: 'other' in path, '{doc}' in annotation")
        );
    }

    #[test]
    fn path_target_fills_empty_target() {
        let (store, doc) = store_with_doc("text");
        let result = store.create_annotation(Some(&doc), Annotation::new(0, 4, "", "w"));
        assert_eq!(result.status, Status::Created);
        let ann = store.get_annotation(&result.id.unwrap()).unwrap().unwrap();
        assert_eq!(ann.target, doc);
        assert_eq!(ann.root.as_deref(), Some(doc.as_str()));
    }

    #[test]
    fn rejects_span_past_end() {
        let (store, doc) = store_with_doc("t\u{e9}xt");
        assert_eq!(
            store.create_annotation(None, Annotation::new(0, 4, &doc, "w")).status,
            Status::Created
        );
        assert_eq!(
            store.create_annotation(None, Annotation::new(2, 5, &doc, "w")).status,
            Status::BadRequest
        );
        assert_eq!(
            store.create_annotation(None, Annotation::new(3, 2, &doc, "w")).status,
            Status::BadRequest
        );
    }

    #[test]
    fn reserved_source_is_rejected() {
        let (store, doc) = store_with_doc("text");
        let ann = Annotation::new(0, 1, doc, "p").with_source("xml");
        assert_eq!(store.create_annotation(None, ann).status, Status::BadRequest);
    }

    #[test]
    fn orders_increase_per_root() {
        let (store, doc) = store_with_doc("text");
        let first = store.create_annotation(None, Annotation::new(0, 1, &doc, "a"));
        let second = store.create_annotation(None, Annotation::new(0, 1, first.id.unwrap(), "b"));
        let ann = store.get_annotation(&second.id.unwrap()).unwrap().unwrap();
        assert_eq!(ann.order, Some(1));
        assert_eq!(ann.root.as_deref(), Some(doc.as_str()));
    }

    #[test]
    fn add_body_sets_once() {
        let (store, doc) = store_with_doc("text");
        let body = store.create_document(None, "a comment").id.unwrap();
        let other = store.create_document(None, "another").id.unwrap();
        let ann = store
            .create_annotation(None, Annotation::new(0, 4, &doc, "comment"))
            .id
            .unwrap();

        assert_eq!(store.add_body(&ann, &body).status, Status::Ok);
        assert_eq!(store.add_body(&ann, &body).status, Status::NoContent);
        assert_eq!(store.add_body(&ann, &other).status, Status::Conflict);
        assert_eq!(store.add_body("missing", &body).status, Status::NotFound);
        assert_eq!(
            store.get_annotation(&ann).unwrap().unwrap().body.as_deref(),
            Some(body.as_str())
        );
    }

    #[test]
    fn add_body_requires_document() {
        let (store, doc) = store_with_doc("text");
        let ann = store
            .create_annotation(None, Annotation::new(0, 4, &doc, "comment"))
            .id
            .unwrap();
        assert_eq!(store.add_body(&ann, "nowhere").status, Status::NotFound);
        assert_eq!(store.get_annotation(&ann).unwrap().unwrap().body, None);
    }

    #[test]
    fn query_filters_walk_results() {
        let (store, doc) = store_with_doc("some text");
        let word = store
            .create_annotation(None, Annotation::new(0, 4, &doc, "word"))
            .id
            .unwrap();
        store.create_annotation(None, Annotation::new(0, 2, &word, "lemma").with_attribute("value", "Some"));

        let from_word = store.get_annotations(&word, Some("lemma"), true).unwrap();
        assert_eq!(from_word.len(), 1);
        assert_eq!(from_word[0].kind, "lemma");

        let from_doc = store.get_annotations(&doc, Some("SOME"), true).unwrap();
        assert_eq!(from_doc.len(), 1);
        assert_eq!(store.get_annotations(&doc, None, false).unwrap().len(), 1);
    }
}
