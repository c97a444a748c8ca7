//! Store configuration
//!
//! Provides [`StoreConfig`], loadable from TOML with every key optional:
//!
//! ```toml
//! offset_unit = "utf16"
//! search_limit = 10000
//! blob_root = "/var/lib/standoff/originals"
//! lock_timeout_ms = 1000
//!
//! [mapping]
//! strict = true
//! fields = [
//!     { name = "body", type = "text", xpath = "/tei:TEI/tei:text" },
//!     { name = "title", type = "keyword", xpath = "//tei:title" },
//! ]
//! namespaces = [{ prefix = "tei", url = "http://www.tei-c.org/ns/1.0" }]
//! ```

use serde::{Deserialize, Serialize};
use standoff_codec::{FieldMapping, MappingError, MappingSpec, OffsetUnit};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default maximum hits per search
pub const DEFAULT_SEARCH_LIMIT: usize = 10_000;

/// Default bucket lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1000;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this structure
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Mapping section does not validate
    #[error("invalid mapping: {0}")]
    Mapping(#[from] MappingError),

    /// Value out of range
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Annotation store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Unit for tag offsets produced by XML ingestion
    pub offset_unit: OffsetUnit,

    /// Maximum hits per index search
    pub search_limit: usize,

    /// Directory for verbatim originals; none keeps no originals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_root: Option<PathBuf>,

    /// Bucket lock timeout in milliseconds
    pub lock_timeout_ms: u64,

    /// Field mapping for XML documents
    pub mapping: MappingSpec,
}

impl StoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Malformed TOML or an invalid value.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// Unreadable file, malformed TOML or an invalid value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), unit = %config.offset_unit, "loaded configuration");
        Ok(config)
    }

    /// Check values and compile the mapping
    ///
    /// # Errors
    /// Zero search limit or an invalid mapping.
    pub fn validate(&self) -> Result<FieldMapping, ConfigError> {
        if self.search_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "search_limit",
                reason: "must be positive".to_string(),
            });
        }
        Ok(FieldMapping::new(&self.mapping)?)
    }

    /// Bucket lock timeout
    #[inline]
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Set the offset unit
    #[inline]
    #[must_use]
    pub fn with_offset_unit(mut self, unit: OffsetUnit) -> Self {
        self.offset_unit = unit;
        self
    }

    /// Set the search limit
    #[inline]
    #[must_use]
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// Keep originals under `root`
    #[inline]
    #[must_use]
    pub fn with_blob_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.blob_root = Some(root.into());
        self
    }

    /// Set the bucket lock timeout
    #[inline]
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the field mapping
    #[inline]
    #[must_use]
    pub fn with_mapping(mut self, mapping: MappingSpec) -> Self {
        self.mapping = mapping;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            offset_unit: OffsetUnit::default(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            blob_root: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            mapping: MappingSpec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.offset_unit, OffsetUnit::Codepoint);
        assert_eq!(config.lock_timeout(), Duration::from_secs(1));
        assert_eq!(config.validate().unwrap().body_field(), "body");
    }

    #[test]
    fn parses_full_file() {
        let config = StoreConfig::from_toml_str(
            r#"
            offset_unit = "utf16"
            search_limit = 50
            blob_root = "/tmp/originals"
            lock_timeout_ms = 250

            [mapping]
            strict = false
            fields = [
                { name = "text", type = "text", xpath = "/tei:TEI/tei:text" },
                { name = "title", type = "keyword", xpath = "//tei:title" },
            ]
            namespaces = [{ prefix = "tei", url = "http://www.tei-c.org/ns/1.0" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.offset_unit, OffsetUnit::Utf16);
        assert_eq!(config.search_limit, 50);
        assert_eq!(config.blob_root, Some(PathBuf::from("/tmp/originals")));
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert!(!config.mapping.strict);
        assert_eq!(config.validate().unwrap().body_field(), "text");
    }

    #[test]
    fn rejects_bad_mapping() {
        let err = StoreConfig::from_toml_str(
            r#"
            [mapping]
            fields = [{ name = "body", type = "text", xpath = "/a[" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Mapping(_)));
    }

    #[test]
    fn rejects_zero_limit() {
        let err = StoreConfig::new().with_search_limit(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "search_limit", .. }));
    }
}
