//! Error types for the annotation store
//!
//! Provides [`StoreError`], wrapping codec, blob and index failures, and
//! [`ErrorKind`], the coarse taxonomy callers branch on.

use crate::index::{Collection, IndexError};
use standoff_blob::{BlobError, IdentifierError};
use standoff_codec::{MappingError, ParseError, ReconstructError};

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown id or target
    NotFound,
    /// Duplicate id or conflicting modification
    Conflict,
    /// Malformed or inconsistent input
    BadRequest,
    /// Lock wait exceeded
    Timeout,
    /// Unexpected backend failure
    Internal,
}

/// Main store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Input markup is not well-formed
    #[error("malformed xml: {0}")]
    Parse(#[from] ParseError),

    /// Field mapping could not be applied
    #[error("mapping failed: {0}")]
    Mapping(#[from] MappingError),

    /// Stored tags do not form a tree
    #[error("reconstruction failed: {0}")]
    Reconstruct(#[from] ReconstructError),

    /// Id rejected
    #[error("invalid id: {0}")]
    InvalidId(#[from] IdentifierError),

    /// Blob store failure
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Backing index failure
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Inconsistent request
    #[error("{0}")]
    BadRequest(String),

    /// Unknown id or target
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflicting state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored record does not decode
    #[error("corrupt record '{id}' in {collection}: {reason}")]
    Corrupt {
        collection: Collection,
        id: String,
        reason: String,
    },
}

impl StoreError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) | Self::Mapping(_) | Self::InvalidId(_) | Self::BadRequest(_) => {
                ErrorKind::BadRequest
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Blob(e) => match e {
                BlobError::InvalidId(_) => ErrorKind::BadRequest,
                BlobError::NotFound { .. } => ErrorKind::NotFound,
                BlobError::AlreadyExists { .. } => ErrorKind::Conflict,
                BlobError::Timeout { .. } => ErrorKind::Timeout,
                BlobError::Io { .. } => ErrorKind::Internal,
            },
            Self::Reconstruct(_) | Self::Index(_) | Self::Corrupt { .. } => ErrorKind::Internal,
        }
    }

    /// Check if the operation may succeed when retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blob(e) => e.is_retryable(),
            Self::Index(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if the error means an unknown id
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn classifies_layers() {
        let parse = standoff_codec::parse("<a>").unwrap_err();
        assert_eq!(StoreError::from(parse).kind(), ErrorKind::BadRequest);

        let exists = BlobError::AlreadyExists { id: "x".into() };
        assert_eq!(StoreError::from(exists).kind(), ErrorKind::Conflict);

        let timeout = BlobError::Timeout {
            bucket: standoff_blob::Bucket::of("x"),
            timeout: Duration::from_millis(1),
        };
        let err = StoreError::from(timeout);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());

        let index = StoreError::from(IndexError::Backend("boom".into()));
        assert_eq!(index.kind(), ErrorKind::Internal);
        assert!(!index.is_retryable());
        assert!(StoreError::NotFound("x".into()).is_not_found());
    }
}
