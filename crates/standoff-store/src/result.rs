//! Operation results
//!
//! Mutating store operations report a [`PutResult`] instead of failing:
//! the affected id, a [`Status`] and an optional message.

use crate::error::{ErrorKind, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Outcome of a mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Resource created
    Created,
    /// Operation applied, or nothing needed doing
    Ok,
    /// Requested state already held
    NoContent,
    /// Malformed or inconsistent input
    BadRequest,
    /// Unknown id or target
    NotFound,
    /// Duplicate id or conflicting modification
    Conflict,
    /// Lock wait exceeded
    Timeout,
    /// Unexpected backend failure
    Internal,
}

impl Status {
    /// HTTP status code for the outcome
    #[inline]
    #[must_use]
    pub const fn http_code(self) -> u16 {
        match self {
            Self::Created => 201,
            Self::Ok => 200,
            Self::NoContent => 204,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Timeout => 503,
            Self::Internal => 500,
        }
    }

    /// Whether the outcome is a success
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Ok | Self::NoContent)
    }
}

impl From<ErrorKind> for Status {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::Conflict => Self::Conflict,
            ErrorKind::BadRequest => Self::BadRequest,
            ErrorKind::Timeout => Self::Timeout,
            ErrorKind::Internal => Self::Internal,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Ok => "ok",
            Self::NoContent => "no content",
            Self::BadRequest => "bad request",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Internal => "internal error",
        };
        write!(f, "{} {name}", self.http_code())
    }
}

/// Id, status and message of a mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    /// Affected id, when one is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Outcome
    pub status: Status,
    /// Detail for failures and partial successes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PutResult {
    /// Success or failure without a message
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, status: Status) -> Self {
        Self {
            id: Some(id.into()),
            status,
            message: None,
        }
    }

    /// `201 Created`
    #[inline]
    #[must_use]
    pub fn created(id: impl Into<String>) -> Self {
        Self::new(id, Status::Created)
    }

    /// `200 Ok`
    #[inline]
    #[must_use]
    pub fn ok(id: impl Into<String>) -> Self {
        Self::new(id, Status::Ok)
    }

    /// `204 No Content`
    #[inline]
    #[must_use]
    pub fn no_content(id: impl Into<String>) -> Self {
        Self::new(id, Status::NoContent)
    }

    /// Failure with a message
    #[must_use]
    pub fn failure(id: Option<&str>, status: Status, message: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            status,
            message: Some(message.into()),
        }
    }

    /// Failure derived from an error
    #[must_use]
    pub fn from_error(id: Option<&str>, error: &StoreError) -> Self {
        Self::failure(id, error.kind().into(), error.to_string())
    }

    /// Attach a message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether the operation succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl Display for PutResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(id) = &self.id {
            write!(f, " [{id}]")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_codes() {
        assert_eq!(Status::Created.http_code(), 201);
        assert_eq!(Status::NoContent.http_code(), 204);
        assert_eq!(Status::Conflict.http_code(), 409);
        assert_eq!(Status::Timeout.http_code(), 503);
        assert!(Status::NoContent.is_success());
        assert!(!Status::NotFound.is_success());
    }

    #[test]
    fn failure_from_error_kind() {
        let err = StoreError::NotFound("target 'x'".to_string());
        let result = PutResult::from_error(None, &err);
        assert_eq!(result.status, Status::NotFound);
        assert_eq!(result.id, None);
        assert_eq!(result.to_string(), "404 not found: not found: target 'x'");
    }

    #[test]
    fn serializes_status_snake_case() {
        let value = serde_json::to_value(PutResult::no_content("a")).unwrap();
        assert_eq!(value, serde_json::json!({"id": "a", "status": "no_content"}));
    }
}
