// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-daemon
//!
//! HTTP surface of the orchestrator: workflow submission and tracking,
//! the projects API, ingestion status, and health.

#![deny(unsafe_code)]

/// Wire types and the API error envelope.
pub mod api;
/// Project endpoints.
pub mod projects;
/// Shared request-handler state.
pub mod state;
/// Workflow endpoints.
pub mod workflow;

pub use api::{ApiError, ResultBody, StatusBody, SubmitBody, SubmitResponse};
pub use state::AppState;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use loom_transport::OpContext;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

/// Per-component probe deadline for the health endpoint.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the Axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflow/submit", post(workflow::submit))
        .route("/workflow/status/{job_id}", get(workflow::job_status))
        .route(
            "/workflow/status/{job_id}/stream",
            get(workflow::job_status_stream),
        )
        .route("/workflow/result/{job_id}", get(workflow::job_result))
        .route("/workflow/cancel/{job_id}", post(workflow::cancel_job))
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/{project_id}",
            get(projects::get_project)
                .patch(projects::patch_project)
                .delete(projects::delete_project),
        )
        .route(
            "/api/projects/{project_id}/jobs",
            get(projects::project_jobs),
        )
        .route(
            "/api/projects/{project_id}/manifests",
            get(projects::project_manifests),
        )
        .route(
            "/api/projects/{project_id}/ingest/{ingestion_id}/status",
            get(workflow::ingestion_status),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cx = OpContext::with_timeout(PROBE_TIMEOUT);
    let mut components = BTreeMap::new();
    components.insert(
        "graph_store",
        up_or_down(state.services.graph.ping(&cx).await.is_ok()),
    );
    components.insert(
        "vector_store",
        up_or_down(state.services.vectors.ping(&cx).await.is_ok()),
    );
    components.insert(
        "logic_server",
        up_or_down(state.services.logic.probe(&cx).await.is_ok()),
    );
    components.insert(
        "draft_server",
        up_or_down(state.services.draft.probe(&cx).await.is_ok()),
    );
    components.insert(
        "embed_server",
        up_or_down(state.services.embedder.probe(&cx).await.is_ok()),
    );

    let degraded = components.values().any(|v| *v == "down");
    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "contract_version": loom_core::CONTRACT_VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "components": components,
        "telemetry": state.services.telemetry.counters(),
    }))
}

fn up_or_down(up: bool) -> &'static str {
    if up { "up" } else { "down" }
}
