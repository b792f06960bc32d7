// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-runtime
//!
//! Orchestration layer: executes the fixed stage sequence
//! `[ingest_pdf?, cartographer, verifier, critic, drafter, saver]` for each
//! job on a fixed-size worker pool.
//!
//! Responsibilities:
//! - run stages strictly sequentially per job, parallel across jobs
//! - persist progress at every stage boundary and on coalesced sub-progress
//! - translate stage failures into `"{stage}: {cause}"` job errors
//! - observe cancellation at every suspension point
//! - enforce the per-job deadline

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The stage executor.
pub mod runtime;
/// Injected service bundle handed to every stage.
pub mod services;
/// The [`Stage`](stage::Stage) trait, stage errors, and progress reporting.
pub mod stage;
/// The six specialist stages.
pub mod stages;
/// The mutable state bag threaded through a job's stages.
pub mod state;
/// Fixed-size worker pool over a bounded submission queue.
pub mod worker;

/// Re-export of the stop-signal primitives used across the runtime.
pub use loom_transport::cancel::{CancellationReason, StopSignal};

pub use runtime::StageRuntime;
pub use services::Services;
pub use stage::{ProgressReporter, Stage, StageContext, StageError};
pub use state::WorkState;
pub use worker::{SubmitError, SubmitPermit, WorkerPool};
