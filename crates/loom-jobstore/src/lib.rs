// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-jobstore
//!
//! Atomic per-job state machine. The in-process map is the source of truth
//! for status; every mutation is written through to the graph store's
//! `jobs` collection as a point-in-time snapshot. Status transitions are
//! compare-and-swap along the job DAG; per-job broadcast channels feed the
//! status stream endpoint.
//!
//! Durability: [`JobStore::create_job`] persists before returning its id,
//! so a consumer may poll immediately. Later snapshot writes are
//! write-through; a store outage is logged and does not wedge a running
//! job, because the in-memory record stays authoritative.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use loom_core::{JobRecord, JobResult, JobStatus};
use loom_transport::{GraphStore, OpContext, TransportError, collections};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

/// Deadline applied to each snapshot write against the graph store.
const PERSIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Broadcast capacity per job; slow stream consumers may lag and resync
/// from the next snapshot.
const CHANNEL_CAPACITY: usize = 64;

/// Errors returned by job-store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// The referenced job does not exist.
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// A compare-and-swap failed: the job is not in the expected status.
    #[error("job {id}: expected status {expected:?}, found {actual:?}")]
    CasMismatch {
        /// The job.
        id: Uuid,
        /// Status the caller expected.
        expected: JobStatus,
        /// Status actually recorded.
        actual: JobStatus,
    },

    /// The requested transition is not an edge of the status DAG.
    #[error("job {id}: transition {from:?} -> {to:?} not allowed")]
    InvalidTransition {
        /// The job.
        id: Uuid,
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// The job is already terminal and immutable.
    #[error("job {0} is terminal")]
    Terminal(Uuid),

    /// The graph store could not persist the record.
    #[error("job store unavailable: {0}")]
    Unavailable(#[from] TransportError),
}

/// Field updates applied alongside a transition.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    /// New current-stage name.
    pub current_stage: Option<String>,
    /// New progress percent.
    pub progress_pct: Option<u8>,
}

struct Entry {
    record: JobRecord,
    tx: broadcast::Sender<JobRecord>,
    cancel_requested: bool,
}

/// Atomic, streaming job store.
pub struct JobStore {
    graph: Arc<dyn GraphStore>,
    inner: RwLock<HashMap<Uuid, Entry>>,
}

impl JobStore {
    /// Create a store writing snapshots through to `graph`.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Create a PENDING job. The snapshot is durable before the id returns.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::Unavailable`] when the durable write fails; no job
    /// is recorded in that case.
    pub async fn create_job(
        &self,
        project_id: Uuid,
        ingestion_id: Option<Uuid>,
        initial_state: Value,
    ) -> Result<Uuid, JobStoreError> {
        let record = JobRecord::pending(project_id, ingestion_id, initial_state);
        let id = record.id;
        self.persist(&record).await?;
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.inner.write().await.insert(
            id,
            Entry {
                record,
                tx,
                cancel_requested: false,
            },
        );
        debug!(target: "loom.jobstore", job_id = %id, "job created");
        Ok(id)
    }

    /// Compare-and-swap status transition with an optional field patch.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::CasMismatch`] when the current status differs from
    /// `from`, [`JobStoreError::InvalidTransition`] when `from -> to` is not
    /// a DAG edge.
    pub async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<JobRecord, JobStoreError> {
        let record = {
            let mut inner = self.inner.write().await;
            let entry = inner.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            if entry.record.status != from {
                return Err(JobStoreError::CasMismatch {
                    id,
                    expected: from,
                    actual: entry.record.status,
                });
            }
            if !from.can_transition_to(to) {
                return Err(JobStoreError::InvalidTransition { id, from, to });
            }
            let now = Utc::now();
            entry.record.status = to;
            if let Some(stage) = patch.current_stage {
                entry.record.current_stage = Some(stage);
            }
            if let Some(pct) = patch.progress_pct {
                entry.record.progress_pct = pct.min(100);
            }
            if to == JobStatus::Running && entry.record.started_at.is_none() {
                entry.record.started_at = Some(now);
            }
            if to.is_terminal() {
                entry.record.finished_at = Some(now);
            }
            entry.record.updated_at = now;
            let snapshot = entry.record.clone();
            let _ = entry.tx.send(snapshot.clone());
            snapshot
        };
        self.persist_best_effort(&record).await;
        Ok(record)
    }

    /// Record sub-progress for a RUNNING job.
    ///
    /// Progress is clamped to be non-decreasing; a stale lower value is
    /// ignored rather than rejected.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::CasMismatch`] when the job is not RUNNING.
    pub async fn set_progress(
        &self,
        id: Uuid,
        stage: &str,
        progress_pct: u8,
    ) -> Result<JobRecord, JobStoreError> {
        let record = {
            let mut inner = self.inner.write().await;
            let entry = inner.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            if entry.record.status != JobStatus::Running {
                return Err(JobStoreError::CasMismatch {
                    id,
                    expected: JobStatus::Running,
                    actual: entry.record.status,
                });
            }
            entry.record.current_stage = Some(stage.to_string());
            entry.record.progress_pct = entry.record.progress_pct.max(progress_pct.min(100));
            entry.record.updated_at = Utc::now();
            let snapshot = entry.record.clone();
            let _ = entry.tx.send(snapshot.clone());
            snapshot
        };
        self.persist_best_effort(&record).await;
        Ok(record)
    }

    /// Record the result and move RUNNING → SUCCEEDED.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::CasMismatch`] when the job is not RUNNING.
    pub async fn set_result(&self, id: Uuid, result: JobResult) -> Result<JobRecord, JobStoreError> {
        let record = {
            let mut inner = self.inner.write().await;
            let entry = inner.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            if entry.record.status != JobStatus::Running {
                return Err(JobStoreError::CasMismatch {
                    id,
                    expected: JobStatus::Running,
                    actual: entry.record.status,
                });
            }
            let now = Utc::now();
            entry.record.status = JobStatus::Succeeded;
            entry.record.progress_pct = 100;
            entry.record.result = Some(result);
            entry.record.finished_at = Some(now);
            entry.record.updated_at = now;
            let snapshot = entry.record.clone();
            let _ = entry.tx.send(snapshot.clone());
            snapshot
        };
        self.persist_best_effort(&record).await;
        Ok(record)
    }

    /// Record an error and move any non-terminal status → FAILED.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::Terminal`] when the job already finished.
    pub async fn set_error(&self, id: Uuid, message: &str) -> Result<JobRecord, JobStoreError> {
        let record = {
            let mut inner = self.inner.write().await;
            let entry = inner.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            if entry.record.status.is_terminal() {
                return Err(JobStoreError::Terminal(id));
            }
            let now = Utc::now();
            entry.record.status = JobStatus::Failed;
            entry.record.error = Some(message.to_string());
            entry.record.finished_at = Some(now);
            entry.record.updated_at = now;
            let snapshot = entry.record.clone();
            let _ = entry.tx.send(snapshot.clone());
            snapshot
        };
        self.persist_best_effort(&record).await;
        Ok(record)
    }

    /// Write the client's cancellation intent.
    ///
    /// PENDING and QUEUED jobs cancel immediately; a RUNNING job keeps the
    /// flag, which the active stage observes at its next suspension point.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::Terminal`] when the job already finished.
    pub async fn request_cancel(&self, id: Uuid) -> Result<JobRecord, JobStoreError> {
        let (record, finalize) = {
            let mut inner = self.inner.write().await;
            let entry = inner.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            if entry.record.status.is_terminal() {
                return Err(JobStoreError::Terminal(id));
            }
            entry.cancel_requested = true;
            let finalize = matches!(entry.record.status, JobStatus::Pending | JobStatus::Queued);
            (entry.record.clone(), finalize)
        };
        if finalize {
            return self.mark_cancelled(id).await;
        }
        Ok(record)
    }

    /// Move a non-terminal job to CANCELLED with error `"cancelled"`.
    ///
    /// # Errors
    ///
    /// [`JobStoreError::Terminal`] when the job already finished.
    pub async fn mark_cancelled(&self, id: Uuid) -> Result<JobRecord, JobStoreError> {
        let record = {
            let mut inner = self.inner.write().await;
            let entry = inner.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
            if entry.record.status.is_terminal() {
                return Err(JobStoreError::Terminal(id));
            }
            let now = Utc::now();
            entry.record.status = JobStatus::Cancelled;
            entry.record.error = Some("cancelled".to_string());
            entry.record.finished_at = Some(now);
            entry.record.updated_at = now;
            let snapshot = entry.record.clone();
            let _ = entry.tx.send(snapshot.clone());
            snapshot
        };
        self.persist_best_effort(&record).await;
        Ok(record)
    }

    /// Whether a client asked this job to cancel.
    pub async fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .get(&id)
            .is_some_and(|e| e.cancel_requested)
    }

    /// Point-in-time snapshot of a job.
    pub async fn read(&self, id: Uuid) -> Option<JobRecord> {
        self.inner.read().await.get(&id).map(|e| e.record.clone())
    }

    /// Subscribe to a job's status stream.
    ///
    /// Returns the current snapshot (replayed immediately) plus a receiver
    /// of subsequent snapshots. For a job already terminal the receiver
    /// yields nothing further.
    pub async fn subscribe(&self, id: Uuid) -> Option<(JobRecord, broadcast::Receiver<JobRecord>)> {
        let inner = self.inner.read().await;
        let entry = inner.get(&id)?;
        Some((entry.record.clone(), entry.tx.subscribe()))
    }

    async fn persist(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let cx = OpContext::with_timeout(PERSIST_TIMEOUT);
        let doc = serde_json::to_value(record)
            .map_err(|e| TransportError::permanent(format!("encode job: {e}")))?;
        self.graph
            .put_doc(&cx, collections::JOBS, &record.id.to_string(), doc)
            .await?;
        Ok(())
    }

    async fn persist_best_effort(&self, record: &JobRecord) {
        if let Err(err) = self.persist(record).await {
            warn!(
                target: "loom.jobstore",
                job_id = %record.id,
                error = %err,
                "snapshot write failed; in-memory record stays authoritative"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_transport::MemoryGraphStore;
    use serde_json::json;

    fn store() -> (Arc<JobStore>, Arc<MemoryGraphStore>) {
        let graph = Arc::new(MemoryGraphStore::new());
        (Arc::new(JobStore::new(graph.clone())), graph)
    }

    async fn running_job(store: &JobStore) -> Uuid {
        let id = store
            .create_job(Uuid::nil(), None, json!({"request": {}}))
            .await
            .unwrap();
        store
            .transition(id, JobStatus::Pending, JobStatus::Queued, JobPatch::default())
            .await
            .unwrap();
        store
            .transition(id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn create_job_is_durable_before_returning() {
        let (store, graph) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let cx = OpContext::with_timeout(Duration::from_secs(1));
        let doc = graph
            .get_doc(&cx, collections::JOBS, &id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["status"], "PENDING");
    }

    #[tokio::test]
    async fn create_job_fails_when_store_is_down() {
        let (store, graph) = store();
        graph.fail_with(TransportError::unavailable("down"));
        let err = store.create_job(Uuid::nil(), None, json!({})).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn cas_mismatch_is_rejected() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let err = store
            .transition(id, JobStatus::Running, JobStatus::Succeeded, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::CasMismatch { .. }));
    }

    #[tokio::test]
    async fn non_dag_transition_is_rejected() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let err = store
            .transition(id, JobStatus::Pending, JobStatus::Succeeded, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn progress_is_monotonic_within_running() {
        let (store, _) = store();
        let id = running_job(&store).await;
        store.set_progress(id, "cartographer", 40).await.unwrap();
        let rec = store.set_progress(id, "cartographer", 25).await.unwrap();
        assert_eq!(rec.progress_pct, 40);
        let rec = store.set_progress(id, "verifier", 55).await.unwrap();
        assert_eq!(rec.progress_pct, 55);
        assert_eq!(rec.current_stage.as_deref(), Some("verifier"));
    }

    #[tokio::test]
    async fn set_result_requires_running() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let err = store.set_result(id, JobResult::default()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::CasMismatch { .. }));
    }

    #[tokio::test]
    async fn set_result_completes_the_job() {
        let (store, _) = store();
        let id = running_job(&store).await;
        let rec = store.set_result(id, JobResult::default()).await.unwrap();
        assert_eq!(rec.status, JobStatus::Succeeded);
        assert_eq!(rec.progress_pct, 100);
        assert!(rec.finished_at.is_some());
    }

    #[tokio::test]
    async fn terminal_jobs_are_immutable() {
        let (store, _) = store();
        let id = running_job(&store).await;
        store.set_result(id, JobResult::default()).await.unwrap();
        assert!(matches!(
            store.set_error(id, "late failure").await,
            Err(JobStoreError::Terminal(_))
        ));
        assert!(matches!(
            store.request_cancel(id).await,
            Err(JobStoreError::Terminal(_))
        ));
    }

    #[tokio::test]
    async fn set_error_fails_any_non_terminal_job() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let rec = store.set_error(id, "cartographer: invalid_schema").await.unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("cartographer: invalid_schema"));
    }

    #[tokio::test]
    async fn cancel_of_queued_job_is_immediate() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let rec = store.request_cancel(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Cancelled);
        assert_eq!(rec.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn cancel_of_running_job_sets_intent_only() {
        let (store, _) = store();
        let id = running_job(&store).await;
        let rec = store.request_cancel(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Running);
        assert!(store.is_cancel_requested(id).await);
    }

    #[tokio::test]
    async fn subscribers_replay_then_follow() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let (snapshot, mut rx) = store.subscribe(id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);

        store
            .transition(id, JobStatus::Pending, JobStatus::Queued, JobPatch::default())
            .await
            .unwrap();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn status_rank_never_regresses_for_a_reader() {
        let (store, _) = store();
        let id = store.create_job(Uuid::nil(), None, json!({})).await.unwrap();
        let (snapshot, mut rx) = store.subscribe(id).await.unwrap();

        store
            .transition(id, JobStatus::Pending, JobStatus::Queued, JobPatch::default())
            .await
            .unwrap();
        store
            .transition(id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
            .await
            .unwrap();
        store.set_progress(id, "drafter", 90).await.unwrap();
        store.set_result(id, JobResult::default()).await.unwrap();

        let mut last_rank = snapshot.status.rank();
        let mut last_pct = snapshot.progress_pct;
        while let Ok(update) = rx.try_recv() {
            assert!(update.status.rank() >= last_rank);
            if update.status.rank() == last_rank {
                assert!(update.progress_pct >= last_pct);
            }
            last_rank = update.status.rank();
            last_pct = update.progress_pct;
        }
        assert_eq!(last_rank, JobStatus::Succeeded.rank());
    }

    #[tokio::test]
    async fn snapshot_write_failure_does_not_wedge_the_job() {
        let (store, graph) = store();
        let id = running_job(&store).await;
        graph.fail_with(TransportError::unavailable("down"));
        // Mutation still succeeds against the in-memory record.
        let rec = store.set_progress(id, "critic", 75).await.unwrap();
        assert_eq!(rec.progress_pct, 75);
    }
}
