//! In-memory element tree
//!
//! [`XmlElement`] is the hierarchical side of the codec. Namespace
//! declarations (`xmlns`, `xmlns:prefix`) are kept as ordinary attributes
//! of the element that declares them.
//!
//! Parsing uses a fresh `quick_xml` reader per call; there is no shared
//! parser state.

use indexmap::IndexMap;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Attribute name that declares the default namespace
pub const XMLNS: &str = "xmlns";

/// Namespace bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Deepest element nesting accepted by [`parse`]; the root is at depth 1
pub const MAX_DEPTH: usize = 1024;

/// A node in the element tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Nested element
    Element(XmlElement),
    /// Character data (already unescaped)
    Text(String),
    /// Comment body; positionally transparent to the codec
    Comment(String),
}

/// An element with attributes and ordered children
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    /// Qualified name as written (`prefix:local` or `local`)
    pub name: String,
    /// Attributes, including namespace declarations made on this element
    pub attributes: IndexMap<String, String>,
    /// Children in document order
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// With an attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// With a child element
    #[inline]
    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// With a text child
    #[inline]
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Namespace prefix of the element name, if any
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Local part of the element name
    #[must_use]
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// Namespace declarations made directly on this element, as
    /// `(prefix, uri)` with `""` for the default namespace
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .filter_map(|(name, uri)| declared_prefix(name).map(|prefix| (prefix, uri.as_str())))
    }

    /// Namespace bindings `descendant` inherits from its ancestors in this
    /// tree, as `prefix -> uri` with the nearest declaration winning.
    /// Declarations made on `descendant` itself are not included; `None`
    /// when it is not part of the tree.
    #[must_use]
    pub fn inherited_namespaces(&self, descendant: &XmlElement) -> Option<BTreeMap<String, String>> {
        if std::ptr::eq(self, descendant) {
            return Some(BTreeMap::new());
        }
        let mut inherited = self
            .child_elements()
            .find_map(|child| child.inherited_namespaces(descendant))?;
        for (prefix, uri) in self.namespace_declarations() {
            inherited
                .entry(prefix.to_string())
                .or_insert_with(|| uri.to_string());
        }
        Some(inherited)
    }

    /// Copy of the tree with comments removed and the text around each
    /// comment merged, the shape [`crate::reconstruct`] produces
    #[must_use]
    pub fn without_comments(&self) -> XmlElement {
        let mut children: Vec<XmlNode> = Vec::with_capacity(self.children.len());
        for child in &self.children {
            match child {
                XmlNode::Comment(_) => {}
                XmlNode::Text(text) => match children.last_mut() {
                    Some(XmlNode::Text(previous)) => previous.push_str(text),
                    _ => children.push(XmlNode::Text(text.clone())),
                },
                XmlNode::Element(element) => {
                    children.push(XmlNode::Element(element.without_comments()));
                }
            }
        }
        XmlElement {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            children,
        }
    }

    /// Child elements, skipping text and comments
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Concatenated text of all descendants (the XPath string value)
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.collect_text(out),
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Comment(_) => {}
            }
        }
    }

    /// Serialize to markup. Attribute order follows the map; no
    /// indentation is added.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write_into(out),
                XmlNode::Text(text) => out.push_str(&escape(text.as_str())),
                XmlNode::Comment(comment) => {
                    out.push_str("<!--");
                    out.push_str(comment);
                    out.push_str("-->");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Split a qualified name into `(prefix, local)`
#[must_use]
pub fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Prefix declared by an attribute name: `Some("")` for `xmlns`,
/// `Some("p")` for `xmlns:p`, `None` for ordinary attributes
#[must_use]
pub fn declared_prefix(attribute: &str) -> Option<&str> {
    if attribute == XMLNS {
        Some("")
    } else {
        attribute.strip_prefix("xmlns:")
    }
}

/// Errors raised while parsing markup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Markup is not well formed
    #[error("malformed xml at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    /// Element left open at end of input
    #[error("unclosed element <{0}>")]
    Unclosed(String),

    /// Input contains no element
    #[error("no root element")]
    NoRootElement,

    /// More than one top-level element
    #[error("content after root element at byte {0}")]
    TrailingContent(u64),

    /// Elements nested deeper than [`MAX_DEPTH`]
    #[error("element nesting exceeds {MAX_DEPTH} levels at byte {0}")]
    TooDeep(u64),
}

impl ParseError {
    fn syntax(position: u64, message: impl Display) -> Self {
        Self::Syntax {
            position,
            message: message.to_string(),
        }
    }
}

/// Parse a complete document and return its root element
///
/// # Errors
/// Returns [`ParseError`] for unbalanced or otherwise malformed markup.
pub fn parse(xml: &str) -> Result<XmlElement, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => return Err(ParseError::syntax(reader.buffer_position() as u64, e)),
        };
        let position = reader.buffer_position() as u64;

        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(ParseError::TrailingContent(position));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::TooDeep(position));
                }
                stack.push(open_element(&start, position)?);
            }
            Event::Empty(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::TooDeep(position));
                }
                let element = open_element(&start, position)?;
                close_element(&mut stack, &mut root, element, position)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::syntax(position, "end tag without start tag"))?;
                close_element(&mut stack, &mut root, element, position)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| ParseError::syntax(position, e))?;
                push_text(&mut stack, &text, position)?;
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data)
                    .map_err(|e| ParseError::syntax(position, e))?;
                push_text(&mut stack, text, position)?;
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    let body = std::str::from_utf8(&comment)
                        .map_err(|e| ParseError::syntax(position, e))?;
                    parent.children.push(XmlNode::Comment(body.to_string()));
                }
            }
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::Unclosed(open.name));
    }
    root.ok_or(ParseError::NoRootElement)
}

fn open_element(start: &BytesStart<'_>, position: u64) -> Result<XmlElement, ParseError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| ParseError::syntax(position, e))?
        .to_string();

    let mut attributes = IndexMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::syntax(position, e))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| ParseError::syntax(position, e))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ParseError::syntax(position, e))?
            .into_owned();
        attributes.insert(key, value);
    }

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn close_element(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
    position: u64,
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(ParseError::TrailingContent(position)),
    }
    Ok(())
}

fn push_text(stack: &mut [XmlElement], text: &str, position: u64) -> Result<(), ParseError> {
    if text.is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            // Adjacent runs (text, then CDATA) merge into one node
            if let Some(XmlNode::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(XmlNode::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(ParseError::syntax(position, "text outside root element")),
    }
}
