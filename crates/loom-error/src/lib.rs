// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for Manuscript Loom.
//!
//! Two layers live here. [`TransportError`] classifies outbound-call
//! failures and drives retry decisions. [`LoomError`] is the orchestrator's
//! surfaced error: a stable [`ErrorCode`] tag, a message, and ordered
//! diagnostic detail pairs, with the HTTP mapping each code carries.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TransportClass
// ---------------------------------------------------------------------------

/// Classification of an outbound-call failure.
///
/// The transport layer retries only [`Transient`](Self::Transient) and
/// [`RemoteUnavailable`](Self::RemoteUnavailable) failures; everything else
/// surfaces to the caller on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportClass {
    /// A failure that may succeed on retry (timeout, 5xx, throttling).
    Transient,
    /// The request itself is invalid and will never succeed (schema parse
    /// failure, 4xx validation rejection).
    PermanentInvalid,
    /// Credentials were rejected (401/403).
    Unauthorized,
    /// The remote resource does not exist (404).
    NotFound,
    /// The remote host is unreachable or the circuit breaker is open.
    RemoteUnavailable,
}

impl TransportClass {
    /// Returns `true` if a call failing with this class may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RemoteUnavailable)
    }

    /// Stable lowercase tag used in logs and error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::PermanentInvalid => "permanent_invalid",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::RemoteUnavailable => "remote_unavailable",
        }
    }
}

impl fmt::Display for TransportClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// A classified failure from a transport client.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{class}: {message}")]
pub struct TransportError {
    /// Retry classification.
    pub class: TransportClass,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new(class: TransportClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// A transient failure (retryable).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TransportClass::Transient, message)
    }

    /// A permanently invalid request (never retried).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(TransportClass::PermanentInvalid, message)
    }

    /// An authorization failure.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(TransportClass::Unauthorized, message)
    }

    /// A missing remote resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportClass::NotFound, message)
    }

    /// An unreachable remote host.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportClass::RemoteUnavailable, message)
    }

    /// Returns `true` if the failure may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request validation errors.
    Validation,
    /// Missing resources.
    NotFound,
    /// Authentication / authorization errors.
    Auth,
    /// Capacity and availability errors.
    Capacity,
    /// Workflow stage failures.
    Stage,
    /// Domain invariant violations.
    Domain,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCategory {
    /// Stable lowercase tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Auth => "auth",
            Self::Capacity => "capacity",
            Self::Stage => "stage",
            Self::Domain => "domain",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases. A code fully determines
/// its category and the HTTP status the API surface answers with; both
/// come from one [`profile`](Self::profile) table so they cannot drift
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// The request body is malformed or missing required fields.
    ValidationFailed,
    /// A submission arrived without a project id.
    MissingProject,

    // -- NotFound --
    /// The referenced project does not exist.
    ProjectNotFound,
    /// The referenced job does not exist.
    JobNotFound,
    /// The referenced ingestion does not exist.
    IngestionNotFound,

    // -- Auth --
    /// Credentials were missing or rejected.
    Unauthorized,

    // -- Capacity --
    /// The submission queue is full.
    ServiceBusy,
    /// A backing service (graph store, model server) is unreachable.
    ServiceUnavailable,

    // -- Stage --
    /// A workflow stage failed; the message names the stage and cause.
    StageFailed,
    /// The job was cancelled before completion.
    JobCancelled,

    // -- Domain --
    /// A claim status transition violated the allowed table.
    ClaimTransitionInvalid,
    /// A job status transition violated the status DAG.
    JobTransitionInvalid,
    /// An artifact manifest referenced a claim that does not exist.
    ManifestInvalid,

    // -- Config --
    /// A required environment variable is missing or invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// The category and HTTP status for every code, in one table.
    fn profile(&self) -> (ErrorCategory, u16) {
        use ErrorCategory as C;
        match self {
            Self::ValidationFailed => (C::Validation, 400),
            Self::MissingProject => (C::Validation, 400),
            Self::ProjectNotFound => (C::NotFound, 404),
            Self::JobNotFound => (C::NotFound, 404),
            Self::IngestionNotFound => (C::NotFound, 404),
            Self::Unauthorized => (C::Auth, 401),
            Self::ServiceBusy => (C::Capacity, 503),
            Self::ServiceUnavailable => (C::Capacity, 503),
            Self::StageFailed => (C::Stage, 500),
            Self::JobCancelled => (C::Stage, 500),
            Self::ClaimTransitionInvalid => (C::Domain, 409),
            Self::JobTransitionInvalid => (C::Domain, 409),
            Self::ManifestInvalid => (C::Domain, 409),
            Self::ConfigInvalid => (C::Config, 500),
            Self::Internal => (C::Internal, 500),
        }
    }

    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.profile().0
    }

    /// HTTP status this code maps to at the API surface.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.profile().1
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"PROJECT_NOT_FOUND"`), matching the serde wire tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::MissingProject => "MISSING_PROJECT",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::IngestionNotFound => "INGESTION_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ServiceBusy => "SERVICE_BUSY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::StageFailed => "STAGE_FAILED",
            Self::JobCancelled => "JOB_CANCELLED",
            Self::ClaimTransitionInvalid => "CLAIM_TRANSITION_INVALID",
            Self::JobTransitionInvalid => "JOB_TRANSITION_INVALID",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// Build a [`LoomError`] with this code and the given message.
    pub fn with(self, message: impl Into<String>) -> LoomError {
        LoomError::new(self, message)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LoomError
// ---------------------------------------------------------------------------

/// The orchestrator's surfaced error: a code, a message, and ordered
/// diagnostic detail pairs.
///
/// Details are plain strings rendered at attach time, in insertion order,
/// so an error formats the same way every time it is logged or serialized.
///
/// ```
/// use loom_error::ErrorCode;
///
/// let err = ErrorCode::ServiceUnavailable
///     .with("graph store unreachable")
///     .detail("host", "graph.internal")
///     .detail("attempts", 3);
/// assert_eq!(
///     err.to_string(),
///     "SERVICE_UNAVAILABLE: graph store unreachable (host=graph.internal; attempts=3)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoomError {
    code: ErrorCode,
    message: String,
    details: Vec<(String, String)>,
}

impl LoomError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Append one diagnostic detail pair.
    ///
    /// The value is rendered through [`fmt::Display`] immediately.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    /// The stable code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The diagnostic detail pairs, in insertion order.
    #[must_use]
    pub fn details(&self) -> &[(String, String)] {
        &self.details
    }

    /// Shorthand for `self.code().category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// JSON shape used by the API surface and logs.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "code": self.code.as_str(),
            "error": self.message,
        });
        if !self.details.is_empty() {
            let details: serde_json::Map<String, serde_json::Value> = self
                .details
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            body["details"] = serde_json::Value::Object(details);
        }
        body
    }
}

impl fmt::Display for LoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)?;
        let mut pairs = self.details.iter();
        if let Some((key, value)) = pairs.next() {
            write!(f, " ({key}={value}")?;
            for (key, value) in pairs {
                write!(f, "; {key}={value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoomError {}

impl From<TransportError> for LoomError {
    fn from(err: TransportError) -> Self {
        let code = match err.class {
            TransportClass::Unauthorized => ErrorCode::Unauthorized,
            TransportClass::RemoteUnavailable => ErrorCode::ServiceUnavailable,
            _ => ErrorCode::Internal,
        };
        code.with(err.message).detail("class", err.class)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::ValidationFailed,
        ErrorCode::MissingProject,
        ErrorCode::ProjectNotFound,
        ErrorCode::JobNotFound,
        ErrorCode::IngestionNotFound,
        ErrorCode::Unauthorized,
        ErrorCode::ServiceBusy,
        ErrorCode::ServiceUnavailable,
        ErrorCode::StageFailed,
        ErrorCode::JobCancelled,
        ErrorCode::ClaimTransitionInvalid,
        ErrorCode::JobTransitionInvalid,
        ErrorCode::ManifestInvalid,
        ErrorCode::ConfigInvalid,
        ErrorCode::Internal,
    ];

    #[test]
    fn error_codes_are_unique() {
        let tags: HashSet<&str> = ALL_CODES.iter().map(|c| c.as_str()).collect();
        assert_eq!(tags.len(), ALL_CODES.len());
    }

    #[test]
    fn error_codes_serialize_as_screaming_snake_case() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn every_code_has_a_sane_profile() {
        for code in ALL_CODES {
            let status = code.http_status();
            assert!((400..=599).contains(&status), "{code}: {status}");
            assert!(!code.category().as_str().is_empty());
        }
    }

    #[test]
    fn validation_codes_map_to_400() {
        assert_eq!(ErrorCode::MissingProject.http_status(), 400);
        assert_eq!(ErrorCode::ValidationFailed.http_status(), 400);
    }

    #[test]
    fn not_found_codes_map_to_404() {
        assert_eq!(ErrorCode::ProjectNotFound.http_status(), 404);
        assert_eq!(ErrorCode::JobNotFound.http_status(), 404);
        assert_eq!(ErrorCode::IngestionNotFound.http_status(), 404);
    }

    #[test]
    fn capacity_codes_map_to_503() {
        assert_eq!(ErrorCode::ServiceBusy.http_status(), 503);
        assert_eq!(ErrorCode::ServiceUnavailable.http_status(), 503);
    }

    #[test]
    fn only_transient_and_unavailable_are_retryable() {
        assert!(TransportClass::Transient.is_retryable());
        assert!(TransportClass::RemoteUnavailable.is_retryable());
        assert!(!TransportClass::PermanentInvalid.is_retryable());
        assert!(!TransportClass::Unauthorized.is_retryable());
        assert!(!TransportClass::NotFound.is_retryable());
    }

    #[test]
    fn transport_error_display_includes_class() {
        let err = TransportError::permanent("invalid_schema");
        assert_eq!(err.to_string(), "permanent_invalid: invalid_schema");
    }

    #[test]
    fn loom_error_display_renders_details_in_order() {
        let err = ErrorCode::StageFailed
            .with("cartographer: invalid_schema")
            .detail("stage", "cartographer")
            .detail("attempt", 1);
        assert_eq!(
            err.to_string(),
            "STAGE_FAILED: cartographer: invalid_schema (stage=cartographer; attempt=1)"
        );
    }

    #[test]
    fn loom_error_without_details_has_no_parenthetical() {
        let err = ErrorCode::JobNotFound.with("no such job");
        assert_eq!(err.to_string(), "JOB_NOT_FOUND: no such job");
    }

    #[test]
    fn transport_error_converts_with_class_detail() {
        let err: LoomError = TransportError::unavailable("connect refused").into();
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        assert_eq!(
            err.details(),
            &[("class".to_string(), "remote_unavailable".to_string())]
        );
    }

    #[test]
    fn unauthorized_transport_keeps_its_code() {
        let err: LoomError = TransportError::unauthorized("bad token").into();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn to_json_carries_code_message_and_details() {
        let err = ErrorCode::ServiceBusy
            .with("submission queue is full")
            .detail("capacity", 256);
        let json = err.to_json();
        assert_eq!(json["code"], "SERVICE_BUSY");
        assert_eq!(json["error"], "submission queue is full");
        assert_eq!(json["details"]["capacity"], "256");
    }

    #[test]
    fn to_json_omits_empty_details() {
        let json = ErrorCode::Internal.with("boom").to_json();
        assert!(json.get("details").is_none());
    }
}
