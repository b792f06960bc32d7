// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed-size worker pool over a bounded FIFO submission queue.
//!
//! Workers are parallel across jobs; within a job, stages run strictly
//! sequentially in [`StageRuntime::execute`]. Queue overflow is signalled
//! at reservation time so a rejected submission records no job.

use crate::runtime::StageRuntime;
use loom_transport::{CancellationReason, StopSignal};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Submission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is at capacity; retry after a drain.
    #[error("submission queue is full")]
    Busy,
    /// The pool has shut down.
    #[error("worker pool is closed")]
    Closed,
}

/// A reserved queue slot.
///
/// Reserve before creating the job so an overflow rejects the submission
/// without recording anything; send the id once the job exists.
#[derive(Debug)]
pub struct SubmitPermit<'a> {
    permit: mpsc::Permit<'a, Uuid>,
}

impl SubmitPermit<'_> {
    /// Enqueue the job id into the reserved slot.
    pub fn send(self, job_id: Uuid) {
        self.permit.send(job_id);
    }
}

/// Fixed-size worker pool consuming job ids from a bounded queue.
pub struct WorkerPool {
    tx: mpsc::Sender<Uuid>,
    shutdown: StopSignal,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` workers over a queue of `capacity` entries.
    #[must_use]
    pub fn spawn(runtime: Arc<StageRuntime>, workers: usize, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Uuid>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = StopSignal::new();

        let mut handles = Vec::with_capacity(workers.max(1));
        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let runtime = Arc::clone(&runtime);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job_id = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            job = guard.recv() => job,
                            _ = shutdown.stopped() => None,
                        }
                    };
                    let Some(job_id) = job_id else { break };
                    debug!(target: "loom.worker", worker_id, job_id = %job_id, "job picked up");
                    runtime.execute(job_id).await;
                }
                debug!(target: "loom.worker", worker_id, "worker stopped");
            }));
        }

        info!(target: "loom.worker", workers, capacity, "worker pool started");
        Arc::new(Self {
            tx,
            shutdown,
            handles: Mutex::new(handles),
        })
    }

    /// Reserve a queue slot, failing fast when the queue is full.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Busy`] at capacity, [`SubmitError::Closed`] after
    /// shutdown.
    pub fn try_reserve(&self) -> Result<SubmitPermit<'_>, SubmitError> {
        match self.tx.try_reserve() {
            Ok(permit) => Ok(SubmitPermit { permit }),
            Err(mpsc::error::TrySendError::Full(())) => Err(SubmitError::Busy),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SubmitError::Closed),
        }
    }

    /// Stop accepting work and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.shutdown.trigger(CancellationReason::Shutdown);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use loom_jobstore::JobStore;
    use loom_telemetry::TelemetrySink;
    use loom_transport::{
        HashEmbedder, MemoryGraphStore, MemoryVectorStore, PlainTextExtractor, ScriptedDraft,
        ScriptedLogic,
    };
    use std::time::Duration;

    fn test_runtime() -> (Arc<StageRuntime>, Arc<JobStore>) {
        let graph = Arc::new(MemoryGraphStore::new());
        let store = Arc::new(JobStore::new(graph.clone()));
        let services = Arc::new(Services {
            logic: Arc::new(ScriptedLogic::always(r#"{"triples": []}"#)),
            draft: Arc::new(ScriptedDraft::always("prose")),
            embedder: Arc::new(HashEmbedder::new(8)),
            extractor: Arc::new(PlainTextExtractor),
            graph,
            vectors: Arc::new(MemoryVectorStore::new()),
            telemetry: TelemetrySink::new(),
            artifact_root: std::env::temp_dir().join("loom-worker-tests"),
        });
        let runtime = Arc::new(StageRuntime::new(
            services,
            Arc::clone(&store),
            Duration::from_secs(30),
        ));
        (runtime, store)
    }

    #[tokio::test]
    async fn reservation_fails_once_queue_is_full() {
        let (runtime, _) = test_runtime();
        // Zero workers would hang; use one worker and a one-slot queue,
        // then fill it faster than the worker drains.
        let pool = WorkerPool::spawn(runtime, 1, 1);

        // Hold a permit so the single slot is taken.
        let first = pool.try_reserve().unwrap();
        let second = pool.try_reserve();
        assert_eq!(second.unwrap_err(), SubmitError::Busy);

        // Draining the slot permits one more reservation.
        drop(first);
        assert!(pool.try_reserve().is_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let (runtime, _) = test_runtime();
        let pool = WorkerPool::spawn(runtime, 2, 4);
        pool.shutdown().await;
        // All receivers are gone once the workers stop.
        assert_eq!(pool.try_reserve().unwrap_err(), SubmitError::Closed);
    }
}
