// SPDX-License-Identifier: MIT OR Apache-2.0
//! The injected service bundle handed to every stage.
//!
//! All outbound dependencies are dependency-injected here; there is no
//! module-level singleton for transport clients, the job store, or the
//! registry. Tests substitute the in-memory stand-ins from
//! `loom_transport::memory`.

use loom_telemetry::TelemetrySink;
use loom_transport::{DraftModel, Embedder, GraphStore, LogicModel, PdfExtractor, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Outbound dependencies shared by all stages of a job.
#[derive(Clone)]
pub struct Services {
    /// Logic server (constrained structured generation).
    pub logic: Arc<dyn LogicModel>,
    /// Draft server (free-form prose).
    pub draft: Arc<dyn DraftModel>,
    /// Embed server.
    pub embedder: Arc<dyn Embedder>,
    /// External PDF extractor.
    pub extractor: Arc<dyn PdfExtractor>,
    /// Graph store (documents and edges).
    pub graph: Arc<dyn GraphStore>,
    /// Vector store (claim embeddings).
    pub vectors: Arc<dyn VectorStore>,
    /// Telemetry sink.
    pub telemetry: TelemetrySink,
    /// Filesystem root for artifact copies.
    pub artifact_root: PathBuf,
}
