// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project endpoints: CRUD, filtered listing, the hub view, per-project
//! jobs and manifests.

use crate::api::{ApiError, StatusBody};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use loom_core::{CreateProject, Project, RigorLevel};
use loom_registry::{HubView, ProjectFilter, ProjectPatch, ProjectStatus, ProjectSummary};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Query parameters for `GET /api/projects`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `hub` switches to the partitioned hub view.
    #[serde(default)]
    pub view: Option<String>,
    /// Substring match over title and thesis.
    #[serde(default)]
    pub query: Option<String>,
    /// Comma-separated tag intersection.
    #[serde(default)]
    pub tags: Option<String>,
    /// Rigor equality.
    #[serde(default)]
    pub rigor: Option<RigorLevel>,
    /// Derived-status equality.
    #[serde(default)]
    pub status: Option<ProjectStatus>,
    /// Window start.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Window end.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl ListQuery {
    fn into_filter(self) -> ProjectFilter {
        ProjectFilter {
            query: self.query,
            tags: self
                .tags
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            rigor: self.rigor,
            status: self.status,
            since: self.since,
            until: self.until,
        }
    }
}

/// `POST /api/projects`.
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(mut payload): Json<CreateProject>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    if payload.rigor.is_none() {
        payload.rigor = Some(state.default_rigor);
    }
    let project = state.registry.create(payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /api/projects` and `GET /api/projects?view=hub`.
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let hub = query.view.as_deref() == Some("hub");
    let filter = query.into_filter();
    if hub {
        let view: HubView = state.registry.hub(&filter).await?;
        Ok(Json(view).into_response())
    } else {
        let projects: Vec<ProjectSummary> = state.registry.list(&filter).await?;
        Ok(Json(projects).into_response())
    }
}

/// `GET /api/projects/{id}`.
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.registry.get(id).await?))
}

/// `PATCH /api/projects/{id}`.
pub async fn patch_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProjectPatch>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.registry.update(id, patch).await?))
}

/// `DELETE /api/projects/{id}`.
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for `GET /api/projects/{id}/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    /// Maximum number of jobs returned (default 20).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One row of the per-project job listing.
#[derive(Debug, serde::Serialize)]
pub struct JobListEntry {
    /// Job id.
    pub job_id: Uuid,
    /// Status summary.
    #[serde(flatten)]
    pub status: StatusBody,
}

/// `GET /api/projects/{id}/jobs`: recent jobs, most recent first.
pub async fn project_jobs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<JobListEntry>>, ApiError> {
    // 404 for unknown projects, like every other per-project route.
    state.registry.get(id).await?;
    let jobs = state
        .registry
        .jobs_for(id, query.limit.unwrap_or(20))
        .await?;
    Ok(Json(
        jobs.iter()
            .map(|record| JobListEntry {
                job_id: record.id,
                status: StatusBody::from(record),
            })
            .collect(),
    ))
}

/// `GET /api/projects/{id}/manifests`: persisted artifact manifests.
pub async fn project_manifests(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Value>>, ApiError> {
    state.registry.get(id).await?;
    Ok(Json(state.registry.manifests_for(id).await?))
}
