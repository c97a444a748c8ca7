//! Tree flattening (encode direction)
//!
//! Turns an [`XmlElement`] into flat text plus one [`Tag`] per element.
//! Tags are emitted in pre-order; each tag's slot is reserved when the
//! element is entered and patched with its end offset and attributes once
//! the subtree has been visited.

use crate::offset::{ByteCounter, CodepointCounter, OffsetCounter, OffsetUnit, Utf16Counter};
use crate::tree::{XmlElement, XmlNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An element span produced by the flattener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique tag id
    pub id: String,
    /// Qualified element name
    pub name: String,
    /// Offset of the first text unit inside the element
    pub start: usize,
    /// Offset just past the element's last text unit
    pub end: usize,
    /// Attributes, including `xmlns` declarations made on the element
    pub attributes: BTreeMap<String, String>,
    /// Id of the enclosing element's tag; `None` for the root
    pub xml_parent: Option<String>,
    /// Position in pre-order emission
    pub order: usize,
}

/// Position of a comment in the flat text. Comments produce no tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMark {
    /// Offset at which the comment occurred
    pub offset: usize,
    /// Comment body
    pub text: String,
}

/// Output of [`flatten`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flattened {
    /// Concatenated text content
    pub text: String,
    /// One tag per element, in pre-order
    pub tags: Vec<Tag>,
    /// Unit the offsets are expressed in
    pub unit: OffsetUnit,
    /// Comments seen during traversal
    pub comments: Vec<CommentMark>,
}

impl Flattened {
    /// The root element's tag
    #[must_use]
    pub fn root(&self) -> Option<&Tag> {
        self.tags.first()
    }

    /// Text covered by a tag
    #[must_use]
    pub fn covered_text(&self, tag: &Tag) -> Option<&str> {
        crate::reconstruct::slice(&self.text, self.unit, tag.start, tag.end)
    }
}

/// Flatten `root`, measuring offsets in `unit`
#[must_use]
pub fn flatten(root: &XmlElement, unit: OffsetUnit) -> Flattened {
    match unit {
        OffsetUnit::Byte => Flattener::<ByteCounter>::new().run(root),
        OffsetUnit::Utf16 => Flattener::<Utf16Counter>::new().run(root),
        OffsetUnit::Codepoint => Flattener::<CodepointCounter>::new().run(root),
    }
}

struct TagBuilder {
    name: String,
    start: usize,
    end: usize,
    attributes: BTreeMap<String, String>,
    parent: Option<usize>,
}

/// Depth-first flattener over a specific offset counter
pub struct Flattener<C: OffsetCounter> {
    counter: C,
    text: String,
    slots: Vec<TagBuilder>,
    comments: Vec<CommentMark>,
}

impl<C: OffsetCounter> Default for Flattener<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: OffsetCounter> Flattener<C> {
    /// Create an empty flattener
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: C::default(),
            text: String::new(),
            slots: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Consume the flattener, encoding `root`
    #[must_use]
    pub fn run(mut self, root: &XmlElement) -> Flattened {
        self.visit(root, None);

        let ids: Vec<String> = self
            .slots
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();

        let tags = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(order, slot)| Tag {
                id: ids[order].clone(),
                name: slot.name,
                start: slot.start,
                end: slot.end,
                attributes: slot.attributes,
                xml_parent: slot.parent.map(|p| ids[p].clone()),
                order,
            })
            .collect();

        tracing::debug!(
            unit = %C::UNIT,
            length = self.counter.offset(),
            "flattened element tree"
        );

        Flattened {
            text: self.text,
            tags,
            unit: C::UNIT,
            comments: self.comments,
        }
    }

    fn visit(&mut self, element: &XmlElement, parent: Option<usize>) {
        let base = self.counter.offset();
        let slot = self.slots.len();
        self.slots.push(TagBuilder {
            name: element.name.clone(),
            start: base,
            end: base,
            attributes: BTreeMap::new(),
            parent,
        });

        for child in &element.children {
            match child {
                XmlNode::Element(inner) => self.visit(inner, Some(slot)),
                XmlNode::Text(text) => {
                    self.counter.append(text);
                    self.text.push_str(text);
                }
                XmlNode::Comment(body) => self.comments.push(CommentMark {
                    offset: self.counter.offset(),
                    text: body.clone(),
                }),
            }
        }

        let builder = &mut self.slots[slot];
        builder.end = self.counter.offset();
        builder.attributes = element
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse;
    use pretty_assertions::assert_eq;

    fn spans(flat: &Flattened) -> Vec<(&str, usize, usize)> {
        flat.tags
            .iter()
            .map(|t| (t.name.as_str(), t.start, t.end))
            .collect()
    }

    #[test]
    fn ascii_document() {
        let root = parse("<p>Hello, <b>world</b>!</p>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.text, "Hello, world!");
        assert_eq!(spans(&flat), vec![("p", 0, 13), ("b", 7, 12)]);
        assert_eq!(flat.covered_text(&flat.tags[1]), Some("world"));
    }

    #[test]
    fn message_with_attributes() {
        let root =
            parse(r#"<msg num="1">hello, <xml num="2" attr="extra"/> world!</msg>"#).unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.text, "hello,  world!");
        assert_eq!(spans(&flat), vec![("msg", 0, 14), ("xml", 7, 7)]);
        assert_eq!(flat.tags[0].attributes["num"], "1");
        assert_eq!(flat.tags[1].attributes["num"], "2");
        assert_eq!(flat.tags[1].attributes["attr"], "extra");
    }

    #[test]
    fn bmp_offsets_per_unit() {
        let root = parse("<a>één</a>").unwrap();
        assert_eq!(flatten(&root, OffsetUnit::Byte).tags[0].end, 5);
        assert_eq!(flatten(&root, OffsetUnit::Utf16).tags[0].end, 3);
        assert_eq!(flatten(&root, OffsetUnit::Codepoint).tags[0].end, 3);
    }

    #[test]
    fn astral_offsets_per_unit() {
        let root = parse("<tricky>\u{1D11E}<a/></tricky>").unwrap();
        for (unit, expected) in [
            (OffsetUnit::Byte, 4),
            (OffsetUnit::Utf16, 2),
            (OffsetUnit::Codepoint, 1),
        ] {
            let flat = flatten(&root, unit);
            assert_eq!(flat.tags[1].start, expected, "{unit}");
            assert_eq!(flat.tags[0].end, expected, "{unit}");
        }
    }

    #[test]
    fn empty_nested_elements() {
        let root = parse("<x><p><q/></p></x>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.text, "");
        assert_eq!(spans(&flat), vec![("x", 0, 0), ("p", 0, 0), ("q", 0, 0)]);
        assert_eq!(flat.tags[0].xml_parent, None);
        assert_eq!(flat.tags[1].xml_parent.as_ref(), Some(&flat.tags[0].id));
        assert_eq!(flat.tags[2].xml_parent.as_ref(), Some(&flat.tags[1].id));
    }

    #[test]
    fn nested_order_follows_document_order() {
        let root = parse("<a><b><c/> bla bla <d><e/></d> <f/></b></a>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.text, " bla bla  ");
        assert_eq!(
            spans(&flat),
            vec![
                ("a", 0, 10),
                ("b", 0, 10),
                ("c", 0, 0),
                ("d", 9, 9),
                ("e", 9, 9),
                ("f", 10, 10),
            ]
        );
        let orders: Vec<_> = flat.tags.iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn whitespace_and_attributes() {
        let root = parse("<xml foo='bar'> <tag attr2='quux' attr1='baz'/> </xml>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.text, "  ");
        assert_eq!(flat.tags[0].attributes.len(), 1);
        assert_eq!(flat.tags[1].attributes["attr1"], "baz");
        assert_eq!(flat.tags[1].attributes["attr2"], "quux");
        assert_eq!(flat.tags[1].start, 1);
    }

    #[test]
    fn comments_are_tracked_not_tagged() {
        let root = parse("<foo>ab<!-- what's next? --><bar/></foo>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.tags.len(), 2);
        assert_eq!(
            flat.comments,
            vec![CommentMark {
                offset: 2,
                text: " what's next? ".to_string()
            }]
        );
    }

    #[test]
    fn namespace_declarations_become_attributes() {
        let root = parse("<r xmlns='urn:d' xmlns:p='urn:p'><p:x/></r>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        assert_eq!(flat.tags[0].attributes["xmlns"], "urn:d");
        assert_eq!(flat.tags[0].attributes["xmlns:p"], "urn:p");
        assert_eq!(flat.tags[1].name, "p:x");
    }

    #[test]
    fn tag_ids_are_unique() {
        let root = parse("<a><b/><b/><b/></a>").unwrap();
        let flat = flatten(&root, OffsetUnit::Codepoint);
        let mut ids: Vec<_> = flat.tags.iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
