// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ingestions: the user-facing progress handle for one uploaded document.
//!
//! An ingestion is decoupled from the backing job id; it is created when a
//! document is uploaded and can outlive the job-id assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User-visible ingestion state, mapped from job progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestionState {
    /// Waiting for a worker.
    Queued,
    /// The document is being converted to text.
    Extracting,
    /// Claims are being proposed and verified.
    Mapping,
    /// Claims are being verified and audited.
    Verifying,
    /// The workflow finished and artifacts were written.
    Completed,
    /// The workflow failed; `error` carries the message.
    Failed,
}

impl IngestionState {
    /// Returns `true` for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Cheap structural summary computed right after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstGlance {
    /// Page count.
    pub pages: u32,
    /// Number of tables detected.
    pub tables_detected: u32,
    /// Number of figures detected.
    pub figures_detected: u32,
    /// Fraction of page area carrying running text, in `[0, 1]`.
    pub text_density: f64,
}

/// Extraction confidence derived from the first-glance summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Dense, well-structured text.
    High,
    /// Mixed content.
    Medium,
    /// Sparse or image-heavy document.
    Low,
}

/// The progress record for one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingestion {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Original filename.
    pub filename: String,
    /// SHA-256 of the uploaded bytes.
    pub content_hash: String,
    /// Current state.
    pub state: IngestionState,
    /// Progress percent in `[0, 100]`.
    pub progress_pct: u8,
    /// Structural summary, available once extraction ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_glance: Option<FirstGlance>,
    /// Extraction confidence, available once extraction ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Failure message when `state == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backing job id, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Ingestion {
    /// Create a queued ingestion for an uploaded document.
    #[must_use]
    pub fn queued(project_id: Uuid, filename: impl Into<String>, content_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            filename: filename.into(),
            content_hash: content_hash.into(),
            state: IngestionState::Queued,
            progress_pct: 0,
            first_glance: None,
            confidence: None,
            error: None,
            job_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_ingestion_starts_at_zero() {
        let ing = Ingestion::queued(Uuid::nil(), "paper.pdf", "hash");
        assert_eq!(ing.state, IngestionState::Queued);
        assert_eq!(ing.progress_pct, 0);
        assert!(ing.job_id.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(IngestionState::Completed.is_terminal());
        assert!(IngestionState::Failed.is_terminal());
        assert!(!IngestionState::Mapping.is_terminal());
    }

    #[test]
    fn state_serializes_with_variant_names() {
        assert_eq!(
            serde_json::to_string(&IngestionState::Extracting).unwrap(),
            "\"Extracting\""
        );
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let ing = Ingestion::queued(Uuid::nil(), "a.pdf", "h");
        let json = serde_json::to_value(&ing).unwrap();
        assert!(json.get("first_glance").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("job_id").is_none());
    }
}
