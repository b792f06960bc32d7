// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job records, the status DAG, and normalized results.

use crate::claim::Claim;
use crate::manifest::ArtifactManifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a job.
///
/// Transitions form a DAG; once terminal, a job's fields are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Recorded but not yet enqueued.
    Pending,
    /// Waiting in the submission queue.
    Queued,
    /// A worker is executing stages.
    Running,
    /// All stages completed; `result` is populated.
    Succeeded,
    /// A stage failed; `error` is populated.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobStatus {
    /// Returns `true` if this status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns the set of statuses that are valid successors of `self`.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[Self::Queued, Self::Cancelled],
            Self::Queued => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Succeeded, Self::Failed, Self::Cancelled],
            Self::Succeeded | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Ordinal position along the DAG, used to assert monotonicity.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Running => 2,
            Self::Succeeded | Self::Failed | Self::Cancelled => 3,
        }
    }
}

/// The canonical claim container every consumer can rely on.
///
/// `triples` is always serialized, even when empty; polling consumers see
/// `extracted_json.triples` regardless of what stages produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedJson {
    /// Claims produced by the workflow (possibly empty, never missing).
    #[serde(default)]
    pub triples: Vec<Claim>,
}

/// Result payload of a SUCCEEDED job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Canonical claim shape; `triples` is always present.
    #[serde(default)]
    pub extracted_json: ExtractedJson,
    /// Artifact manifest written by the saver, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_manifest: Option<ArtifactManifest>,
}

impl JobResult {
    /// Build a normalized result from stage output.
    #[must_use]
    pub fn normalized(claims: Vec<Claim>, manifest: Option<ArtifactManifest>) -> Self {
        Self {
            extracted_json: ExtractedJson { triples: claims },
            artifact_manifest: manifest,
        }
    }
}

/// Persistent per-job state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Associated ingestion, when the submission carried an upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_id: Option<Uuid>,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Name of the stage currently executing (or last executed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    /// Progress percent in `[0, 100]`, non-decreasing within a status.
    pub progress_pct: u8,
    /// Request payload plus project-context snapshot, fixed at submit time.
    pub initial_state: Value,
    /// Result; populated only on SUCCEEDED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Error message; populated only on FAILED (or "cancelled").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When a worker picked the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a PENDING record with the given immutable initial state.
    #[must_use]
    pub fn pending(project_id: Uuid, ingestion_id: Option<Uuid>, initial_state: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            ingestion_id,
            status: JobStatus::Pending,
            current_stage: None,
            progress_pct: 0,
            initial_state,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_status_serializes_as_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&JobStatus::Pending).unwrap(), "\"PENDING\"");
        assert_eq!(
            serde_json::to_string(&JobStatus::Succeeded).unwrap(),
            "\"SUCCEEDED\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn pending_can_reach_queued_or_cancelled() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn running_can_reach_all_terminals() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Succeeded));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn rank_is_monotone_along_the_dag() {
        assert!(JobStatus::Pending.rank() < JobStatus::Queued.rank());
        assert!(JobStatus::Queued.rank() < JobStatus::Running.rank());
        assert!(JobStatus::Running.rank() < JobStatus::Failed.rank());
        assert_eq!(JobStatus::Succeeded.rank(), JobStatus::Cancelled.rank());
    }

    #[test]
    fn empty_result_still_serializes_triples() {
        let result = JobResult::normalized(Vec::new(), None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["extracted_json"]["triples"], json!([]));
    }

    #[test]
    fn result_without_triples_field_deserializes_to_empty() {
        let result: JobResult = serde_json::from_value(json!({"extracted_json": {}})).unwrap();
        assert!(result.extracted_json.triples.is_empty());
    }

    #[test]
    fn pending_record_has_no_result_or_error() {
        let rec = JobRecord::pending(Uuid::nil(), None, json!({"request": {}}));
        assert_eq!(rec.status, JobStatus::Pending);
        assert!(rec.result.is_none());
        assert!(rec.error.is_none());
        assert_eq!(rec.progress_pct, 0);
    }

    #[test]
    fn record_json_roundtrip() {
        let rec = JobRecord::pending(Uuid::nil(), Some(Uuid::nil()), json!({"k": "v"}));
        let s = serde_json::to_string(&rec).unwrap();
        let back: JobRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(back, rec);
    }
}
