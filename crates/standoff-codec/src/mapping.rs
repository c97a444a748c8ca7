//! Field mapping
//!
//! Provides [`FieldMapping`], a declarative list of `(name, type, xpath)`
//! fields. The first field selects the body element that gets flattened;
//! the rest extract one scalar value each.

use crate::tree::XmlElement;
use crate::xpath::{XPath, XPathError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

static FIELD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// One mapped field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name in the document record
    pub name: String,
    /// Index type of the field, e.g. `text`, `keyword`, `date`
    #[serde(rename = "type")]
    pub field_type: String,
    /// Expression selecting the field's value
    pub xpath: String,
}

impl FieldSpec {
    /// Create a field
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            xpath: xpath.into(),
        }
    }
}

/// Namespace prefix available to field expressions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceBinding {
    /// Prefix used in expressions
    pub prefix: String,
    /// Namespace URI
    pub url: String,
}

/// Serializable mapping definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingSpec {
    /// Fields; the first selects the body
    pub fields: Vec<FieldSpec>,
    /// Prefix bindings for the expressions
    pub namespaces: Vec<NamespaceBinding>,
    /// Reject documents where a field has no value
    pub strict: bool,
}

impl Default for MappingSpec {
    fn default() -> Self {
        Self {
            fields: vec![FieldSpec::new("body", "text", "/*")],
            namespaces: Vec::new(),
            strict: true,
        }
    }
}

impl MappingSpec {
    /// With an additional field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// With a namespace binding
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, prefix: impl Into<String>, url: impl Into<String>) -> Self {
        self.namespaces.push(NamespaceBinding {
            prefix: prefix.into(),
            url: url.into(),
        });
        self
    }

    /// With strictness
    #[inline]
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Mapping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// Mapping has no fields
    #[error("mapping must have at least one field")]
    NoFields,

    /// Two fields share a name
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    /// Field name is not usable as a record key
    #[error("invalid field name '{0}'")]
    InvalidFieldName(String),

    /// Field expression failed to compile
    #[error("field '{field}': {source}")]
    InvalidXPath {
        field: String,
        #[source]
        source: XPathError,
    },

    /// Field expression selected nothing
    #[error("no value for field '{0}'")]
    NoValue(String),

    /// Body expression selected an attribute or text node
    #[error("body field '{0}' does not select an element")]
    BodyNotElement(String),
}

#[derive(Debug, Clone)]
struct CompiledField {
    spec: FieldSpec,
    xpath: XPath,
}

/// A validated mapping, ready to apply
#[derive(Debug, Clone)]
pub struct FieldMapping {
    fields: Vec<CompiledField>,
    strict: bool,
}

/// Result of applying a mapping to a document
#[derive(Debug)]
pub struct MappedDocument<'d> {
    /// Name of the body field
    pub body_field: String,
    /// Element selected as body
    pub body: &'d XmlElement,
    /// Values of the remaining fields that matched
    pub fields: BTreeMap<String, String>,
}

impl FieldMapping {
    /// Validate and compile a mapping
    ///
    /// # Errors
    /// Fails on an empty field list, duplicate or malformed field names, or
    /// an expression that does not compile.
    pub fn new(spec: &MappingSpec) -> Result<Self, MappingError> {
        if spec.fields.is_empty() {
            return Err(MappingError::NoFields);
        }

        let namespaces: BTreeMap<String, String> = spec
            .namespaces
            .iter()
            .map(|ns| (ns.prefix.clone(), ns.url.clone()))
            .collect();

        let mut fields: Vec<CompiledField> = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            if !FIELD_NAME.is_match(&field.name) {
                return Err(MappingError::InvalidFieldName(field.name.clone()));
            }
            if fields.iter().any(|f| f.spec.name == field.name) {
                return Err(MappingError::DuplicateField(field.name.clone()));
            }
            let xpath = XPath::compile(&field.xpath, &namespaces).map_err(|source| {
                MappingError::InvalidXPath {
                    field: field.name.clone(),
                    source,
                }
            })?;
            fields.push(CompiledField {
                spec: field.clone(),
                xpath,
            });
        }

        Ok(Self {
            fields,
            strict: spec.strict,
        })
    }

    /// Name of the body field
    #[must_use]
    pub fn body_field(&self) -> &str {
        &self.fields[0].spec.name
    }

    /// Field definitions in order
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().map(|f| &f.spec)
    }

    /// Whether missing field values are errors
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Select the body element and extract the remaining fields
    ///
    /// # Errors
    /// [`MappingError::NoValue`] when the body, or in strict mode any other
    /// field, selects nothing; [`MappingError::BodyNotElement`] when the
    /// body expression selects an attribute or text node.
    pub fn apply<'d>(&self, root: &'d XmlElement) -> Result<MappedDocument<'d>, MappingError> {
        let body_spec = &self.fields[0];
        let body = match body_spec.xpath.select_first(root) {
            None => return Err(MappingError::NoValue(body_spec.spec.name.clone())),
            Some(selected) => selected
                .as_element()
                .ok_or_else(|| MappingError::BodyNotElement(body_spec.spec.name.clone()))?,
        };

        let mut values = BTreeMap::new();
        for field in &self.fields[1..] {
            match field.xpath.select_first(root) {
                Some(selected) => {
                    values.insert(field.spec.name.clone(), selected.string_value());
                }
                None if self.strict => return Err(MappingError::NoValue(field.spec.name.clone())),
                None => {
                    tracing::warn!(field = %field.spec.name, xpath = %field.xpath, "no value for field");
                }
            }
        }

        Ok(MappedDocument {
            body_field: body_spec.spec.name.clone(),
            body,
            fields: values,
        })
    }

    /// Index schema for documents produced by this mapping
    #[must_use]
    pub fn schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.spec.name.clone(), json!({ "type": f.spec.field_type })))
            .collect();
        json!({
            "_all": { "enabled": true },
            "dynamic": "strict",
            "properties": properties,
        })
    }
}
