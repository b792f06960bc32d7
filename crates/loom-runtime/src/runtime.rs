// SPDX-License-Identifier: MIT OR Apache-2.0
//! The stage executor: runs a job's fixed stage sequence to a terminal
//! status.
//!
//! Rather than carrying stage flow in coroutine continuations, the runtime
//! iterates a list of stage handles and records the current-stage name in
//! the job store after each transition; each stage is testable in
//! isolation and a crash leaves a recoverable snapshot behind.

use crate::services::Services;
use crate::stage::{ProgressReporter, Stage, StageContext, StageError};
use crate::stages;
use crate::state::WorkState;
use loom_core::{InitialState, JobResult, JobStatus};
use loom_jobstore::{JobPatch, JobStore};
use loom_transport::{CancellationReason, OpContext, StopSignal};
use loom_telemetry::STAGE_COMPLETED;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Poll interval for the client cancellation-intent flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Executes the fixed stage sequence for one job at a time.
pub struct StageRuntime {
    services: Arc<Services>,
    store: Arc<JobStore>,
    default_deadline: Duration,
}

impl StageRuntime {
    /// Create a runtime over the given services and job store.
    #[must_use]
    pub fn new(services: Arc<Services>, store: Arc<JobStore>, default_deadline: Duration) -> Self {
        Self {
            services,
            store,
            default_deadline,
        }
    }

    /// The job store this runtime records into.
    #[must_use]
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// The stage sequence for a submission: ingest runs only when the
    /// request carries a document to extract.
    #[must_use]
    pub fn stages_for(initial: &InitialState) -> Vec<Arc<dyn Stage>> {
        let mut sequence: Vec<Arc<dyn Stage>> = Vec::with_capacity(6);
        if initial.request.has_document() {
            sequence.push(Arc::new(stages::IngestStage));
        }
        sequence.push(Arc::new(stages::CartographerStage));
        sequence.push(Arc::new(stages::VerifierStage));
        sequence.push(Arc::new(stages::CriticStage));
        sequence.push(Arc::new(stages::DrafterStage));
        sequence.push(Arc::new(stages::SaverStage));
        sequence
    }

    /// Execute a queued job to a terminal status.
    ///
    /// Never returns an error: every outcome is recorded in the job store.
    pub async fn execute(&self, job_id: Uuid) {
        let Some(record) = self.store.read(job_id).await else {
            warn!(target: "loom.runtime", job_id = %job_id, "job vanished before execution");
            return;
        };

        let initial: InitialState = match serde_json::from_value(record.initial_state.clone()) {
            Ok(state) => state,
            Err(err) => {
                let _ = self
                    .store
                    .set_error(job_id, &format!("runtime: invalid initial state: {err}"))
                    .await;
                return;
            }
        };

        // A cancellation that raced the queue wins before any work starts.
        if self.store.is_cancel_requested(job_id).await {
            let _ = self.store.mark_cancelled(job_id).await;
            return;
        }

        if self
            .store
            .transition(job_id, JobStatus::Queued, JobStatus::Running, JobPatch::default())
            .await
            .is_err()
        {
            // Already cancelled or otherwise moved on; nothing to run.
            return;
        }

        let deadline_secs = initial.request.deadline_secs;
        let deadline = Instant::now()
            + deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_deadline);
        let stop = StopSignal::new();

        // Bridge the store's cancellation-intent flag onto the signal the
        // stages observe at each suspension point.
        let monitor = {
            let store = Arc::clone(&self.store);
            let stop = stop.clone();
            tokio::spawn(async move {
                loop {
                    if stop.is_stopped() {
                        break;
                    }
                    if store.is_cancel_requested(job_id).await {
                        stop.trigger(CancellationReason::ClientRequested);
                        break;
                    }
                    tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                }
            })
        };

        let sequence = Self::stages_for(&initial);
        let ingestion_id = initial.request.ingestion_id;
        let mut cx = StageContext {
            job_id,
            initial,
            state: WorkState::default(),
            services: Arc::clone(&self.services),
            op: OpContext::new(deadline, stop.clone()),
            progress: ProgressReporter::new(Arc::clone(&self.store), job_id, "queued", (0, 0)),
        };

        let mut failed = false;
        for stage in &sequence {
            let name = stage.name();
            let window = stage.window();
            let _ = self.store.set_progress(job_id, name, window.0).await;
            cx.progress = ProgressReporter::new(Arc::clone(&self.store), job_id, name, window);

            let started = Instant::now();
            let outcome = tokio::select! {
                res = stage.run(&mut cx) => res,
                _ = tokio::time::sleep_until(deadline) => {
                    stop.trigger(CancellationReason::Deadline);
                    Err(StageError::Transport(loom_error::TransportError::transient(
                        "deadline exceeded",
                    )))
                }
                _ = stop.stopped() => Err(StageError::Cancelled),
            };

            match outcome {
                Ok(()) => {
                    let _ = self.store.set_progress(job_id, name, window.1).await;
                    self.services.telemetry.record(
                        STAGE_COMPLETED,
                        [
                            ("job_id", json!(job_id)),
                            ("stage", json!(name)),
                            ("duration_ms", json!(started.elapsed().as_millis() as u64)),
                        ],
                    );
                }
                Err(StageError::Cancelled) => {
                    info!(target: "loom.runtime", job_id = %job_id, stage = name, "job cancelled");
                    let _ = self.store.mark_cancelled(job_id).await;
                    stages::fail_ingestion(&self.services, ingestion_id, "cancelled").await;
                    failed = true;
                    break;
                }
                Err(err) => {
                    let message = format!("{name}: {}", err.message());
                    warn!(target: "loom.runtime", job_id = %job_id, error = %message, "stage failed");
                    let _ = self.store.set_error(job_id, &message).await;
                    stages::fail_ingestion(&self.services, ingestion_id, &message).await;
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            let result = JobResult::normalized(
                std::mem::take(&mut cx.state.claims),
                cx.state.manifest.take(),
            );
            let _ = self.store.set_result(job_id, result).await;
            info!(target: "loom.runtime", job_id = %job_id, "job succeeded");
        }

        monitor.abort();
        let _ = monitor.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::{CreateProject, Project, SubmitPayload};
    use loom_telemetry::TelemetrySink;
    use loom_transport::{
        HashEmbedder, MemoryGraphStore, MemoryVectorStore, PlainTextExtractor, ScriptedDraft,
        ScriptedLogic, TransportError,
    };

    fn project() -> Project {
        Project::create(CreateProject {
            title: "t".into(),
            thesis: "Retreat accelerated".into(),
            research_questions: vec!["Why?".into()],
            ..CreateProject::default()
        })
        .unwrap()
    }

    fn initial(text: &str) -> InitialState {
        InitialState {
            request: SubmitPayload {
                text: Some(text.into()),
                ..SubmitPayload::default()
            },
            project_context: project(),
        }
    }

    async fn queued_job(store: &JobStore, initial: &InitialState) -> Uuid {
        let id = store
            .create_job(
                initial.project_context.id,
                None,
                serde_json::to_value(initial).unwrap(),
            )
            .await
            .unwrap();
        store
            .transition(id, JobStatus::Pending, JobStatus::Queued, JobPatch::default())
            .await
            .unwrap();
        id
    }

    fn runtime_with_logic(logic: ScriptedLogic) -> (StageRuntime, Arc<JobStore>) {
        let graph = Arc::new(MemoryGraphStore::new());
        let store = Arc::new(JobStore::new(graph.clone()));
        let services = Arc::new(Services {
            logic: Arc::new(logic),
            draft: Arc::new(ScriptedDraft::always("Drafted prose [@src1].")),
            embedder: Arc::new(HashEmbedder::new(16)),
            extractor: Arc::new(PlainTextExtractor),
            graph,
            vectors: Arc::new(MemoryVectorStore::new()),
            telemetry: TelemetrySink::new(),
            artifact_root: std::env::temp_dir().join("loom-runtime-tests"),
        });
        (
            StageRuntime::new(services, Arc::clone(&store), Duration::from_secs(30)),
            store,
        )
    }

    #[test]
    fn ingest_runs_only_for_document_submissions() {
        let with_text = initial("plain text");
        let names: Vec<&str> = StageRuntime::stages_for(&with_text)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec!["cartographer", "verifier", "critic", "drafter", "saver"]
        );

        let mut with_pdf = initial("");
        with_pdf.request.text = None;
        with_pdf.request.pdf_path = Some("/tmp/x.pdf".into());
        let names: Vec<&str> = StageRuntime::stages_for(&with_pdf)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names.first(), Some(&"ingest_pdf"));
        assert_eq!(names.len(), 6);
    }

    #[tokio::test]
    async fn empty_extraction_still_succeeds_with_empty_triples() {
        let (runtime, store) = runtime_with_logic(ScriptedLogic::always(r#"{"triples": []}"#));
        let init = initial("Some document text.");
        let id = queued_job(&store, &init).await;

        runtime.execute(id).await;

        let rec = store.read(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Succeeded);
        assert_eq!(rec.progress_pct, 100);
        let result = rec.result.unwrap();
        assert!(result.extracted_json.triples.is_empty());
    }

    #[tokio::test]
    async fn permanent_cartographer_failure_names_the_stage() {
        let (runtime, store) = runtime_with_logic(
            ScriptedLogic::always("unused").then(Ok("this is not json".into())),
        );
        let init = initial("Some document text.");
        let id = queued_job(&store, &init).await;

        runtime.execute(id).await;

        let rec = store.read(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("cartographer: invalid_schema"));
        // No downstream stage ran, so no manifest was produced.
        assert!(rec.result.is_none());
    }

    #[tokio::test]
    async fn unavailable_logic_server_fails_the_job_with_classification() {
        let logic = ScriptedLogic::default().then(Err(TransportError::unavailable("logic down")));
        let (runtime, store) = runtime_with_logic(logic);
        let init = initial("text");
        let id = queued_job(&store, &init).await;

        runtime.execute(id).await;

        let rec = store.read(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        let error = rec.error.unwrap();
        assert!(error.starts_with("cartographer:"), "{error}");
        assert!(error.contains("logic down"), "{error}");
    }

    #[tokio::test]
    async fn cancellation_intent_before_pickup_cancels_without_running() {
        let (runtime, store) = runtime_with_logic(ScriptedLogic::always(r#"{"triples": []}"#));
        let init = initial("text");
        let id = queued_job(&store, &init).await;
        store.request_cancel(id).await.unwrap();

        runtime.execute(id).await;

        let rec = store.read(id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Cancelled);
        assert_eq!(rec.error.as_deref(), Some("cancelled"));
    }
}
