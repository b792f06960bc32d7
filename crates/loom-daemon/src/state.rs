// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared daemon state: the injected services bundle plus the stores and
//! worker pool every handler reaches through.

use loom_core::RigorLevel;
use loom_jobstore::JobStore;
use loom_registry::ProjectRegistry;
use loom_runtime::{Services, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// State handed to every request handler.
pub struct AppState {
    /// Project registry.
    pub registry: ProjectRegistry,
    /// Job store (the only source of truth for job status).
    pub jobs: Arc<JobStore>,
    /// Worker pool consuming the submission queue.
    pub pool: Arc<WorkerPool>,
    /// Outbound dependencies (also used by the health probe).
    pub services: Arc<Services>,
    /// Rigor applied to projects created without one.
    pub default_rigor: RigorLevel,
    /// Staging directory for multipart uploads.
    pub upload_root: PathBuf,
    /// Process start, for the health uptime field.
    pub started_at: Instant,
}
