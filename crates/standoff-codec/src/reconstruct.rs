//! Tree reconstruction (decode direction)
//!
//! Rebuilds an [`XmlElement`] from flat text and the [`Tag`]s produced by
//! [`flatten`](crate::flatten::flatten). The text cursor tracks both the
//! offset in the tags' unit and the byte index into the string, so astral
//! characters are never split.
//!
//! Namespace bindings flow top-down: when a single element is rebuilt with
//! [`reconstruct_subtree`], the declarations made on its ancestors are
//! threaded into the recursion and any binding the subtree actually uses is
//! declared on the emitted root.

use crate::flatten::Tag;
use crate::offset::{ByteCounter, CodepointCounter, OffsetCounter, OffsetUnit, Utf16Counter};
use crate::tree::{declared_prefix, split_qname, XmlElement, XmlNode, MAX_DEPTH};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;

/// Errors raised while rebuilding a tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconstructError {
    /// No tags supplied
    #[error("no tags to reconstruct")]
    Empty,

    /// No tag without a parent
    #[error("no root tag")]
    NoRoot,

    /// More than one tag without a parent
    #[error("multiple root tags: '{first}' and '{second}'")]
    MultipleRoots { first: String, second: String },

    /// Two tags share an id
    #[error("duplicate tag id '{0}'")]
    DuplicateId(String),

    /// Parent link points outside the tag set
    #[error("tag '{tag}' has unknown parent '{parent}'")]
    UnknownParent { tag: String, parent: String },

    /// Requested tag is not in the tag set
    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    /// Some tags are not reachable from the root
    #[error("{0} tag(s) not reachable from the root")]
    Detached(usize),

    /// Start after end
    #[error("tag '{tag}' has start {start} after end {end}")]
    Inverted { tag: String, start: usize, end: usize },

    /// Offset beyond the text
    #[error("offset {offset} beyond text length {length}")]
    OutOfBounds { offset: usize, length: usize },

    /// Child extends past its parent
    #[error("tag '{tag}' is not nested within its parent '{parent}'")]
    NotNested { tag: String, parent: String },

    /// Child starts before the previous sibling ends
    #[error("tag '{tag}' overlaps a preceding sibling")]
    Overlap { tag: String },

    /// Offset falls inside a multi-unit character
    #[error("offset {offset} splits a character")]
    SplitCharacter { offset: usize },

    /// Parent chain longer than [`MAX_DEPTH`]
    #[error("tag '{0}' is nested deeper than {MAX_DEPTH} levels")]
    TooDeep(String),
}

/// Rebuild the whole tree
///
/// # Errors
/// Returns [`ReconstructError`] if the tags do not describe a single
/// properly nested tree over `text`.
pub fn reconstruct(text: &str, tags: &[Tag], unit: OffsetUnit) -> Result<XmlElement, ReconstructError> {
    match unit {
        OffsetUnit::Byte => Reconstructor::<ByteCounter>::new(text, tags)?.whole(),
        OffsetUnit::Utf16 => Reconstructor::<Utf16Counter>::new(text, tags)?.whole(),
        OffsetUnit::Codepoint => Reconstructor::<CodepointCounter>::new(text, tags)?.whole(),
    }
}

/// Rebuild the element for `tag_id` in isolation, declaring the inherited
/// namespace bindings it uses on the returned root
///
/// # Errors
/// Returns [`ReconstructError::UnknownTag`] if `tag_id` is not in `tags`,
/// otherwise as [`reconstruct`].
pub fn reconstruct_subtree(
    text: &str,
    tags: &[Tag],
    unit: OffsetUnit,
    tag_id: &str,
) -> Result<XmlElement, ReconstructError> {
    match unit {
        OffsetUnit::Byte => Reconstructor::<ByteCounter>::new(text, tags)?.subtree(tag_id),
        OffsetUnit::Utf16 => Reconstructor::<Utf16Counter>::new(text, tags)?.subtree(tag_id),
        OffsetUnit::Codepoint => {
            Reconstructor::<CodepointCounter>::new(text, tags)?.subtree(tag_id)
        }
    }
}

/// Slice `text` between two offsets measured in `unit`
///
/// Returns `None` if either offset is out of range, splits a character, or
/// `start > end`.
#[must_use]
pub fn slice(text: &str, unit: OffsetUnit, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let (from, to) = match unit {
        OffsetUnit::Byte => (byte_index::<ByteCounter>(text, start)?, byte_index::<ByteCounter>(text, end)?),
        OffsetUnit::Utf16 => (byte_index::<Utf16Counter>(text, start)?, byte_index::<Utf16Counter>(text, end)?),
        OffsetUnit::Codepoint => (
            byte_index::<CodepointCounter>(text, start)?,
            byte_index::<CodepointCounter>(text, end)?,
        ),
    };
    text.get(from..to)
}

fn byte_index<C: OffsetCounter>(text: &str, offset: usize) -> Option<usize> {
    let mut cursor = Cursor::default();
    cursor.advance::<C>(text, offset).ok()?;
    Some(cursor.bytes)
}

/// Position in the flat text, in both units and bytes
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    units: usize,
    bytes: usize,
}

impl Cursor {
    /// Move forward to `target` units, returning the text passed over
    fn advance<'t, C: OffsetCounter>(
        &mut self,
        text: &'t str,
        target: usize,
    ) -> Result<&'t str, ReconstructError> {
        let from = self.bytes;
        let mut chars = text[from..].chars();
        while self.units < target {
            let c = chars.next().ok_or_else(|| ReconstructError::OutOfBounds {
                offset: target,
                length: C::measure(text),
            })?;
            self.units += C::width(c);
            self.bytes += c.len_utf8();
        }
        if self.units > target {
            return Err(ReconstructError::SplitCharacter { offset: target });
        }
        Ok(&text[from..self.bytes])
    }
}

/// Namespace bindings inherited from outside the emitted subtree
type Scope<'a> = BTreeMap<&'a str, &'a str>;

struct Reconstructor<'a, C: OffsetCounter> {
    text: &'a str,
    tags: &'a [Tag],
    by_id: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
    _unit: PhantomData<C>,
}

impl<'a, C: OffsetCounter> Reconstructor<'a, C> {
    fn new(text: &'a str, tags: &'a [Tag]) -> Result<Self, ReconstructError> {
        if tags.is_empty() {
            return Err(ReconstructError::Empty);
        }

        let mut by_id = HashMap::with_capacity(tags.len());
        for (i, tag) in tags.iter().enumerate() {
            if by_id.insert(tag.id.as_str(), i).is_some() {
                return Err(ReconstructError::DuplicateId(tag.id.clone()));
            }
        }

        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, tag) in tags.iter().enumerate() {
            if let Some(parent) = tag.xml_parent.as_deref() {
                if !by_id.contains_key(parent) {
                    return Err(ReconstructError::UnknownParent {
                        tag: tag.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                children.entry(parent).or_default().push(i);
            }
        }
        for list in children.values_mut() {
            list.sort_by_key(|&i| (tags[i].start, tags[i].order));
        }

        Ok(Self {
            text,
            tags,
            by_id,
            children,
            _unit: PhantomData,
        })
    }

    fn whole(&self) -> Result<XmlElement, ReconstructError> {
        let mut roots = self.tags.iter().filter(|t| t.xml_parent.is_none());
        let root = roots.next().ok_or(ReconstructError::NoRoot)?;
        if let Some(second) = roots.next() {
            return Err(ReconstructError::MultipleRoots {
                first: root.id.clone(),
                second: second.id.clone(),
            });
        }
        let index = self.by_id[root.id.as_str()];

        let reachable = self.reachable_from(index);
        if reachable < self.tags.len() {
            return Err(ReconstructError::Detached(self.tags.len() - reachable));
        }

        self.emit_root(index, &Scope::new())
    }

    fn subtree(&self, tag_id: &str) -> Result<XmlElement, ReconstructError> {
        let index = *self
            .by_id
            .get(tag_id)
            .ok_or_else(|| ReconstructError::UnknownTag(tag_id.to_string()))?;
        let scope = self.inherited_scope(index)?;
        self.emit_root(index, &scope)
    }

    /// Bindings declared on the ancestors of `index`, nearest winning
    fn inherited_scope(&self, index: usize) -> Result<Scope<'a>, ReconstructError> {
        let mut chain = Vec::new();
        let mut current = self.tags[index].xml_parent.as_deref();
        while let Some(parent) = current {
            let &i = self
                .by_id
                .get(parent)
                .ok_or_else(|| ReconstructError::UnknownParent {
                    tag: self.tags[index].id.clone(),
                    parent: parent.to_string(),
                })?;
            if chain.len() >= self.tags.len() {
                return Err(ReconstructError::Detached(chain.len()));
            }
            chain.push(i);
            current = self.tags[i].xml_parent.as_deref();
        }

        let tags = self.tags;
        let mut scope = Scope::new();
        for &i in chain.iter().rev() {
            for (name, uri) in &tags[i].attributes {
                if let Some(prefix) = declared_prefix(name) {
                    scope.insert(prefix, uri.as_str());
                }
            }
        }
        Ok(scope)
    }

    fn reachable_from(&self, index: usize) -> usize {
        let mut seen = HashSet::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            if !seen.insert(i) {
                continue;
            }
            if let Some(kids) = self.children.get(self.tags[i].id.as_str()) {
                stack.extend(kids.iter().copied());
            }
        }
        seen.len()
    }

    fn emit_root(&self, index: usize, scope: &Scope<'a>) -> Result<XmlElement, ReconstructError> {
        let tag = &self.tags[index];
        let mut cursor = Cursor::default();
        cursor.advance::<C>(self.text, tag.start)?;

        let mut needed = BTreeMap::new();
        let mut element = self.emit(index, 1, &mut cursor, scope, &mut needed)?;

        for (name, uri) in needed.into_iter().rev() {
            if !element.attributes.contains_key(&name) {
                element.attributes.shift_insert(0, name, uri);
            }
        }
        Ok(element)
    }

    fn emit(
        &self,
        index: usize,
        depth: usize,
        cursor: &mut Cursor,
        inherited: &Scope<'a>,
        needed: &mut BTreeMap<String, String>,
    ) -> Result<XmlElement, ReconstructError> {
        let tag = &self.tags[index];
        if depth > MAX_DEPTH {
            return Err(ReconstructError::TooDeep(tag.id.clone()));
        }
        if tag.start > tag.end {
            return Err(ReconstructError::Inverted {
                tag: tag.id.clone(),
                start: tag.start,
                end: tag.end,
            });
        }

        let mut element = XmlElement::new(tag.name.as_str());
        let mut shadowed = Vec::new();
        for (name, value) in &tag.attributes {
            if let Some(prefix) = declared_prefix(name) {
                element.attributes.insert(name.clone(), value.clone());
                shadowed.push(prefix);
            }
        }
        for (name, value) in &tag.attributes {
            if declared_prefix(name).is_none() {
                element.attributes.insert(name.clone(), value.clone());
            }
        }

        let scope: Scope<'a> = inherited
            .iter()
            .filter(|(prefix, _)| !shadowed.contains(*prefix))
            .map(|(&prefix, &uri)| (prefix, uri))
            .collect();

        require(split_qname(&tag.name).0.unwrap_or(""), &scope, needed);
        for name in tag.attributes.keys() {
            if let (Some(prefix), _) = split_qname(name) {
                if prefix != "xmlns" {
                    require(prefix, &scope, needed);
                }
            }
        }

        let kids = self
            .children
            .get(tag.id.as_str())
            .map_or(&[][..], Vec::as_slice);
        for &k in kids {
            let child = &self.tags[k];
            if child.end > tag.end {
                return Err(ReconstructError::NotNested {
                    tag: child.id.clone(),
                    parent: tag.id.clone(),
                });
            }
            if child.start < cursor.units {
                return Err(ReconstructError::Overlap {
                    tag: child.id.clone(),
                });
            }
            push_text(&mut element, cursor.advance::<C>(self.text, child.start)?);
            let nested = self.emit(k, depth + 1, cursor, &scope, needed)?;
            element.children.push(XmlNode::Element(nested));
        }
        push_text(&mut element, cursor.advance::<C>(self.text, tag.end)?);

        Ok(element)
    }
}

/// Record an inherited binding for `prefix` if the subtree relies on it
fn require(prefix: &str, scope: &Scope<'_>, needed: &mut BTreeMap<String, String>) {
    if prefix == "xml" {
        return;
    }
    if let Some(uri) = scope.get(prefix) {
        let attribute = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{prefix}")
        };
        needed.entry(attribute).or_insert_with(|| (*uri).to_string());
    }
}

fn push_text(element: &mut XmlElement, text: &str) {
    if !text.is_empty() {
        element.children.push(XmlNode::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use crate::tree::parse;
    use pretty_assertions::assert_eq;

    fn tag(id: &str, name: &str, start: usize, end: usize, parent: Option<&str>, order: usize) -> Tag {
        Tag {
            id: id.to_string(),
            name: name.to_string(),
            start,
            end,
            attributes: BTreeMap::new(),
            xml_parent: parent.map(str::to_string),
            order,
        }
    }

    fn round_trip(xml: &str, unit: OffsetUnit) -> String {
        let flat = flatten(&parse(xml).unwrap(), unit);
        reconstruct(&flat.text, &flat.tags, unit).unwrap().to_xml()
    }

    #[test]
    fn rejects_parent_chain_past_nesting_limit() {
        let tags: Vec<Tag> = (0..=MAX_DEPTH)
            .map(|i| {
                let parent = i.checked_sub(1).map(|p| p.to_string());
                tag(&i.to_string(), "a", 0, 0, parent.as_deref(), i)
            })
            .collect();
        assert_eq!(
            reconstruct("", &tags, OffsetUnit::Codepoint),
            Err(ReconstructError::TooDeep(MAX_DEPTH.to_string()))
        );
        assert!(reconstruct("", &tags[..MAX_DEPTH], OffsetUnit::Codepoint).is_ok());
    }

    #[test]
    fn empty_nested_elements_round_trip() {
        assert_eq!(round_trip("<x><p><q/></p></x>", OffsetUnit::Codepoint), "<x><p><q/></p></x>");
    }

    #[test]
    fn mixed_content_round_trips_in_every_unit() {
        let xml = "<p>Hello, <b>w\u{1D11E}rld</b>! één</p>";
        for unit in OffsetUnit::ALL {
            assert_eq!(round_trip(xml, unit), xml, "{unit}");
        }
    }

    #[test]
    fn siblings_with_equal_start_keep_document_order() {
        let xml = "<a><b><c/> bla bla <d><e/></d> <f/></b></a>";
        assert_eq!(round_trip(xml, OffsetUnit::Codepoint), xml);
    }

    #[test]
    fn namespace_declarations_come_first() {
        let xml = "<r b='2' xmlns:p='urn:p' a='1'><p:x/></r>";
        let out = round_trip(xml, OffsetUnit::Codepoint);
        assert_eq!(out, "<r xmlns:p=\"urn:p\" a=\"1\" b=\"2\"><p:x/></r>");
    }

    #[test]
    fn tags_need_not_arrive_sorted() {
        let mut tags = vec![
            tag("c", "c", 3, 5, Some("a"), 2),
            tag("a", "a", 0, 5, None, 0),
            tag("b", "b", 0, 2, Some("a"), 1),
        ];
        tags.reverse();
        let out = reconstruct("ab cd", &tags, OffsetUnit::Codepoint).unwrap();
        assert_eq!(out.to_xml(), "<a><b>ab</b> <c>cd</c></a>");
    }

    #[test]
    fn subtree_declares_inherited_prefixes() {
        let xml = "<r xmlns='urn:d' xmlns:p='urn:p' xmlns:q='urn:q'><p:x>1<y/></p:x></r>";
        let flat = flatten(&parse(xml).unwrap(), OffsetUnit::Codepoint);
        let px = &flat.tags[1];
        let out = reconstruct_subtree(&flat.text, &flat.tags, OffsetUnit::Codepoint, &px.id).unwrap();
        assert_eq!(out.attributes.get("xmlns:p").map(String::as_str), Some("urn:p"));
        assert_eq!(out.attributes.get("xmlns").map(String::as_str), Some("urn:d"));
        assert!(!out.attributes.contains_key("xmlns:q"));
        assert_eq!(out.text_content(), "1");
    }

    #[test]
    fn subtree_respects_local_redeclaration() {
        let xml = "<r xmlns:p='urn:outer'><s xmlns:p='urn:inner'><p:x/></s></r>";
        let flat = flatten(&parse(xml).unwrap(), OffsetUnit::Codepoint);
        let s = &flat.tags[1];
        let out = reconstruct_subtree(&flat.text, &flat.tags, OffsetUnit::Codepoint, &s.id).unwrap();
        assert_eq!(out.attributes.len(), 1);
        assert_eq!(out.attributes["xmlns:p"], "urn:inner");
    }

    #[test]
    fn subtree_prefixed_attribute_pulls_binding() {
        let xml = "<r xmlns:p='urn:p'><x p:a='1'>t</x></r>";
        let flat = flatten(&parse(xml).unwrap(), OffsetUnit::Codepoint);
        let out = reconstruct_subtree(&flat.text, &flat.tags, OffsetUnit::Codepoint, &flat.tags[1].id)
            .unwrap();
        assert_eq!(out.to_xml(), "<x xmlns:p=\"urn:p\" p:a=\"1\">t</x>");
    }

    #[test]
    fn unknown_subtree_tag() {
        let tags = vec![tag("a", "a", 0, 0, None, 0)];
        assert_eq!(
            reconstruct_subtree("", &tags, OffsetUnit::Codepoint, "zz"),
            Err(ReconstructError::UnknownTag("zz".to_string()))
        );
    }

    #[test]
    fn rejects_empty_tag_list() {
        assert_eq!(reconstruct("x", &[], OffsetUnit::Byte), Err(ReconstructError::Empty));
    }

    #[test]
    fn rejects_two_roots() {
        let tags = vec![tag("a", "a", 0, 0, None, 0), tag("b", "b", 0, 0, None, 1)];
        assert!(matches!(
            reconstruct("", &tags, OffsetUnit::Codepoint),
            Err(ReconstructError::MultipleRoots { .. })
        ));
    }

    #[test]
    fn rejects_unknown_parent() {
        let tags = vec![tag("a", "a", 0, 0, None, 0), tag("b", "b", 0, 0, Some("nope"), 1)];
        assert!(matches!(
            reconstruct("", &tags, OffsetUnit::Codepoint),
            Err(ReconstructError::UnknownParent { .. })
        ));
    }

    #[test]
    fn rejects_child_outside_parent() {
        let tags = vec![tag("a", "a", 0, 2, None, 0), tag("b", "b", 1, 4, Some("a"), 1)];
        assert!(matches!(
            reconstruct("abcd", &tags, OffsetUnit::Codepoint),
            Err(ReconstructError::NotNested { .. })
        ));
    }

    #[test]
    fn rejects_overlapping_siblings() {
        let tags = vec![
            tag("a", "a", 0, 4, None, 0),
            tag("b", "b", 0, 3, Some("a"), 1),
            tag("c", "c", 2, 4, Some("a"), 2),
        ];
        assert!(matches!(
            reconstruct("abcd", &tags, OffsetUnit::Codepoint),
            Err(ReconstructError::Overlap { .. })
        ));
    }

    #[test]
    fn rejects_offset_past_text() {
        let tags = vec![tag("a", "a", 0, 9, None, 0)];
        assert_eq!(
            reconstruct("abc", &tags, OffsetUnit::Codepoint),
            Err(ReconstructError::OutOfBounds { offset: 9, length: 3 })
        );
    }

    #[test]
    fn rejects_split_surrogate_pair() {
        let tags = vec![tag("a", "a", 0, 1, None, 0)];
        assert_eq!(
            reconstruct("\u{1D11E}", &tags, OffsetUnit::Utf16),
            Err(ReconstructError::SplitCharacter { offset: 1 })
        );
    }

    #[test]
    fn slice_by_unit() {
        let text = "a\u{1D11E}b";
        assert_eq!(slice(text, OffsetUnit::Codepoint, 1, 2), Some("\u{1D11E}"));
        assert_eq!(slice(text, OffsetUnit::Utf16, 1, 3), Some("\u{1D11E}"));
        assert_eq!(slice(text, OffsetUnit::Byte, 5, 6), Some("b"));
        assert_eq!(slice(text, OffsetUnit::Utf16, 1, 2), None);
        assert_eq!(slice(text, OffsetUnit::Codepoint, 2, 1), None);
    }
}
