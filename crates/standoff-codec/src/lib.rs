//! Standoff Codec
//!
//! Converts hierarchical markup into flat text plus span tags, and back.
//!
//! # Core Concepts
//!
//! - [`OffsetCounter`]: running position in bytes, UTF-16 units or codepoints
//! - [`XmlElement`]: parsed element tree ([`parse`] builds one per call)
//! - [`flatten`]: element tree to [`Flattened`] text and [`Tag`]s
//! - [`reconstruct`] / [`reconstruct_subtree`]: tags and text back to a tree
//! - [`FieldMapping`]: XPath-driven body selection and side fields
//!
//! # Example
//!
//! ```rust
//! use standoff_codec::{flatten, parse, reconstruct, OffsetUnit};
//!
//! let root = parse("<p>Hello, <b>world</b>!</p>").unwrap();
//! let flat = flatten(&root, OffsetUnit::Codepoint);
//! assert_eq!(flat.text, "Hello, world!");
//!
//! let back = reconstruct(&flat.text, &flat.tags, flat.unit).unwrap();
//! assert_eq!(back, root);
//! ```

#![warn(unreachable_pub)]

mod flatten;
mod mapping;
mod offset;
mod reconstruct;
mod tree;
mod xpath;

pub use flatten::{flatten, CommentMark, Flattened, Flattener, Tag};
pub use mapping::{FieldMapping, FieldSpec, MappedDocument, MappingError, MappingSpec, NamespaceBinding};
pub use offset::{ByteCounter, CodepointCounter, OffsetCounter, OffsetUnit, UnknownUnit, Utf16Counter};
pub use reconstruct::{reconstruct, reconstruct_subtree, slice, ReconstructError};
pub use tree::{
    declared_prefix, parse, split_qname, ParseError, XmlElement, XmlNode, MAX_DEPTH, XML_NAMESPACE, XMLNS,
};
pub use xpath::{Selected, XPath, XPathError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
