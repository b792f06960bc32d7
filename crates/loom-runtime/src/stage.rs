// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`Stage`] trait, stage errors, and coalesced progress reporting.

use crate::services::Services;
use crate::state::WorkState;
use async_trait::async_trait;
use loom_core::{InitialState, Project, RigorLevel};
use loom_error::TransportError;
use loom_jobstore::JobStore;
use loom_transport::OpContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Minimum interval between persisted sub-progress writes per job.
///
/// Stage-boundary writes bypass this; only intra-stage updates coalesce.
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Failure of a single stage.
#[derive(Debug)]
pub enum StageError {
    /// The job's stop signal fired.
    Cancelled,
    /// A transport call failed; the classification is preserved.
    Transport(TransportError),
    /// A domain-level failure (bad state, invariant violation).
    Invalid(String),
}

impl StageError {
    /// The message recorded on the job, without the stage prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Cancelled => "cancelled".to_string(),
            Self::Transport(err) => err.message.clone(),
            Self::Invalid(msg) => msg.clone(),
        }
    }
}

impl From<TransportError> for StageError {
    fn from(err: TransportError) -> Self {
        // Transport calls surface observed cancellation as a transient
        // "cancelled" failure; fold it back into the cancel path.
        if err.message == "cancelled" {
            StageError::Cancelled
        } else {
            StageError::Transport(err)
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Coalesced sub-progress writer for one stage of one job.
///
/// Linearly interpolates the stage's `[lo, hi]` window over the reported
/// fraction and persists at most one write per
/// [`PROGRESS_MIN_INTERVAL`].
pub struct ProgressReporter {
    store: Arc<JobStore>,
    job_id: Uuid,
    stage: &'static str,
    lo: u8,
    hi: u8,
    last_write: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    /// Create a reporter for one stage window.
    #[must_use]
    pub fn new(store: Arc<JobStore>, job_id: Uuid, stage: &'static str, window: (u8, u8)) -> Self {
        Self {
            store,
            job_id,
            stage,
            lo: window.0,
            hi: window.1.max(window.0),
            last_write: Mutex::new(None),
        }
    }

    /// Map a stage-local fraction in `[0, 1]` onto the window.
    #[must_use]
    pub fn interpolate(&self, fraction: f64) -> u8 {
        let f = fraction.clamp(0.0, 1.0);
        let span = f64::from(self.hi - self.lo);
        self.lo + (span * f).round() as u8
    }

    /// Report sub-progress; writes are coalesced to at most four per second.
    pub async fn report(&self, fraction: f64) {
        {
            let mut last = self.last_write.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < PROGRESS_MIN_INTERVAL {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        let pct = self.interpolate(fraction);
        let _ = self.store.set_progress(self.job_id, self.stage, pct).await;
    }
}

/// Everything a stage needs: identity, snapshot, state, services, context.
pub struct StageContext {
    /// The job being executed.
    pub job_id: Uuid,
    /// Immutable submit-time snapshot (request + project context).
    pub initial: InitialState,
    /// Mutable state bag shared along the stage sequence.
    pub state: WorkState,
    /// Injected outbound dependencies.
    pub services: Arc<Services>,
    /// Deadline and cancellation for every outbound call.
    pub op: OpContext,
    /// Coalesced sub-progress writer for the current stage.
    pub progress: ProgressReporter,
}

impl StageContext {
    /// The project snapshot taken at submit time.
    #[must_use]
    pub fn project(&self) -> &Project {
        &self.initial.project_context
    }

    /// Effective rigor for this job.
    #[must_use]
    pub fn rigor(&self) -> RigorLevel {
        self.initial.rigor()
    }

    /// Bail out if the stop signal has been observed.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Cancelled`] once the signal fired.
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.op.stop.is_stopped() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A single specialist step in the workflow.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name as recorded in job status and error messages.
    fn name(&self) -> &'static str;

    /// Expected progress window `[lo, hi]` within the job's 0–100 range.
    fn window(&self) -> (u8, u8);

    /// Execute the stage against the shared context.
    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError>;
}
