// SPDX-License-Identifier: MIT OR Apache-2.0
//! Submission payloads and the immutable initial-state snapshot.
//!
//! At submit time the orchestrator captures the request payload together
//! with a snapshot of the owning project into [`InitialState`]. In-flight
//! jobs are unaffected by later project edits; replays are deterministic.

use crate::project::{Project, RigorLevel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to an uploaded file staged on the orchestrator's filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRef {
    /// Original filename.
    pub filename: String,
    /// SHA-256 of the uploaded bytes.
    pub content_hash: String,
    /// Where the staged bytes live.
    pub stored_path: String,
}

/// The request half of a job's initial state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitPayload {
    /// Inline document text, when submitted as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Path to a PDF already on disk, when submitted as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    /// Staged multipart upload, when one was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadRef>,
    /// Rigor override for this job only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rigor_level: Option<RigorLevel>,
    /// Per-submission deadline override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
    /// Ingestion handle created for the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_id: Option<Uuid>,
}

impl SubmitPayload {
    /// Returns `true` when the submission carries a document to extract
    /// (upload or pdf path), so the ingest stage must run.
    #[must_use]
    pub fn has_document(&self) -> bool {
        self.upload.is_some() || self.pdf_path.is_some()
    }
}

/// The full immutable snapshot recorded on the job at submit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    /// The request payload.
    pub request: SubmitPayload,
    /// Snapshot of the owning project.
    pub project_context: Project,
}

impl InitialState {
    /// Effective rigor for this job: the per-submission override when given,
    /// else the project snapshot's rigor.
    #[must_use]
    pub fn rigor(&self) -> RigorLevel {
        self.request.rigor_level.unwrap_or(self.project_context.rigor)
    }
}
