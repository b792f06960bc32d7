// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire types and the API error envelope.
//!
//! Every response flows through these shapes so field presence is stable
//! even when stages produced nothing.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use loom_core::{JobRecord, JobResult, JobStatus};
use loom_error::{ErrorCode, LoomError};
use loom_jobstore::JobStoreError;
use loom_registry::RegistryError;
use loom_runtime::SubmitError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// JSON body for `POST /workflow/submit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitBody {
    /// Owning project id; required.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Inline document text.
    #[serde(default)]
    pub text: Option<String>,
    /// Path to a PDF already on disk.
    #[serde(default)]
    pub pdf_path: Option<String>,
    /// Rigor override for this job.
    #[serde(default)]
    pub rigor_level: Option<loom_core::RigorLevel>,
    /// Per-submission deadline override, in seconds.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

/// Response body for an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// The created job.
    pub job_id: Uuid,
    /// The ingestion handle, when the submission carried a document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_id: Option<Uuid>,
}

/// Response body for `GET /workflow/status/{job_id}`.
///
/// Never carries the result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    /// Job status.
    pub status: JobStatus,
    /// Progress percent in `[0, 100]`.
    pub progress_pct: u8,
    /// Stage currently executing (or last executed).
    pub current_stage: Option<String>,
    /// When a worker picked the job up.
    pub started_at: Option<DateTime<Utc>>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
    /// Error message for failed/cancelled jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&JobRecord> for StatusBody {
    fn from(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            progress_pct: record.progress_pct,
            current_stage: record.current_stage.clone(),
            started_at: record.started_at,
            updated_at: record.updated_at,
            error: record.error.clone(),
        }
    }
}

/// Response body for a SUCCEEDED `GET /workflow/result/{job_id}`.
///
/// `result.extracted_json.triples` is always present, empty or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBody {
    /// Job status (always SUCCEEDED here).
    pub status: JobStatus,
    /// The normalized result.
    #[serde(flatten)]
    pub result: JobResult,
}

/// Structured API error returned on failure.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// The underlying taxonomy error (code, message, details).
    pub error: LoomError,
    /// Optional `Retry-After` hint, in seconds.
    pub retry_after: Option<u32>,
}

impl ApiError {
    /// Create an error from a taxonomy code, deriving the HTTP status.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::from_error(code.with(message))
    }

    /// Wrap a [`LoomError`], deriving the HTTP status from its code.
    pub fn from_error(error: LoomError) -> Self {
        Self {
            status: StatusCode::from_u16(error.code().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            error,
            retry_after: None,
        }
    }

    /// 400 — the submission had no project id.
    pub fn missing_project() -> Self {
        Self::new(ErrorCode::MissingProject, "project_id is required")
    }

    /// 404 — unknown project.
    pub fn project_not_found(id: &str) -> Self {
        Self::new(ErrorCode::ProjectNotFound, format!("project {id} not found"))
    }

    /// 404 — unknown job.
    pub fn job_not_found(id: Uuid) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("job {id} not found"))
    }

    /// 503 — the submission queue is full; retry after a drain.
    pub fn busy() -> Self {
        let mut err = Self::new(ErrorCode::ServiceBusy, "submission queue is full");
        err.retry_after = Some(1);
        err
    }

    /// 500 with an explicit status override (terminal job errors).
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(self.error.to_json());
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::project_not_found(&id.to_string()),
            RegistryError::Invalid(msg) => ApiError::new(ErrorCode::ValidationFailed, msg),
            RegistryError::Unavailable(cause) => ApiError::from_error(cause.into()),
        }
    }
}

impl From<JobStoreError> for ApiError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => ApiError::job_not_found(id),
            JobStoreError::Terminal(id) => ApiError::new(
                ErrorCode::JobTransitionInvalid,
                format!("job {id} already finished"),
            ),
            JobStoreError::CasMismatch { .. } | JobStoreError::InvalidTransition { .. } => {
                ApiError::new(ErrorCode::JobTransitionInvalid, err.to_string())
            }
            JobStoreError::Unavailable(cause) => ApiError::from_error(cause.into()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Busy => ApiError::busy(),
            SubmitError::Closed => {
                ApiError::new(ErrorCode::ServiceUnavailable, "worker pool is shut down")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_never_includes_result() {
        let record = JobRecord::pending(Uuid::nil(), None, json!({}));
        let body = StatusBody::from(&record);
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["progress_pct"], 0);
    }

    #[test]
    fn api_error_codes_drive_status() {
        assert_eq!(ApiError::missing_project().status, StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::project_not_found("p1").status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::busy().status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::busy().retry_after, Some(1));
    }

    #[test]
    fn result_body_flattens_the_normalized_result() {
        let body = ResultBody {
            status: JobStatus::Succeeded,
            result: JobResult::normalized(Vec::new(), None),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["extracted_json"]["triples"], json!([]));
        assert_eq!(json["status"], "SUCCEEDED");
    }
}
