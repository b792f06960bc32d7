// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-core
//!
//! Domain model for the Manuscript Loom orchestrator.
//!
//! Responsibilities:
//! - entity types (project, ingestion, job, claim, block, manifest)
//! - status ontologies with validated transition tables
//! - stable JSON shapes shared by the API surface and persistence
//! - result normalization (`extracted_json.triples` is always present)

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Manuscript blocks produced by the drafter.
pub mod block;
/// Claims (triples) with provenance and conflict records.
pub mod claim;
/// Ingestion progress handles.
pub mod ingestion;
/// Job records, status DAG, and results.
pub mod job;
/// Artifact manifests written by the saver.
pub mod manifest;
/// Projects, rigor levels, and tone policies.
pub mod project;
/// Submission payloads and the immutable initial-state snapshot.
pub mod submission;

pub use block::{BlockStatus, ManuscriptBlock};
pub use claim::{
    CONFIDENCE_FLOOR, Claim, ClaimStatus, ConflictRecord, Provenance, SourcePointer, claim_key,
    stage_names,
};
pub use ingestion::{Confidence, FirstGlance, Ingestion, IngestionState};
pub use job::{ExtractedJson, JobRecord, JobResult, JobStatus};
pub use manifest::{ArtifactManifest, BlockStats, ManifestTotals, TableStats, UnitVerification};
pub use project::{CreateProject, Project, RigorLevel, SeedFile, ToneEnforcementMode, TonePolicy};
pub use submission::{InitialState, SubmitPayload, UploadRef};

use thiserror::Error;

/// Wire-contract version reported by the health endpoint.
pub const CONTRACT_VERSION: &str = "loom/v1";

/// Errors raised by domain constructors and transition validators.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Project payload failed validation.
    #[error("invalid project: {0}")]
    InvalidProject(String),

    /// A claim status transition violated the allowed table.
    #[error("claim transition {from:?} -> {to:?} not allowed for {actor}")]
    ClaimTransition {
        /// Status before the attempted transition.
        from: ClaimStatus,
        /// Requested status.
        to: ClaimStatus,
        /// Stage attempting the transition.
        actor: String,
    },

    /// A job status transition violated the status DAG.
    #[error("job transition {from:?} -> {to:?} not allowed")]
    JobTransition {
        /// Status before the attempted transition.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// An artifact manifest referenced a claim absent from the claim set.
    #[error("manifest references unknown claim {0}")]
    ManifestDanglingClaim(String),
}
