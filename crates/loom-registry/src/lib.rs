// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-registry
//!
//! Project registry over the graph store: CRUD, filtered listing, the hub
//! view, seed-file maintenance, and rigor mutation. Projects are
//! process-independent; every mutation is persisted before returning.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use loom_core::{CreateProject, DomainError, JobRecord, JobStatus, Project, RigorLevel, TonePolicy};
use loom_transport::{GraphStore, OpContext, TransportError, collections};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Deadline applied to each registry operation against the graph store.
const OP_TIMEOUT: Duration = Duration::from_secs(10);

/// How recent a project's latest job must be to count as active in the hub.
const HUB_ACTIVE_WINDOW_DAYS: i64 = 30;

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested project does not exist.
    #[error("project {0} not found")]
    NotFound(Uuid),

    /// The payload failed domain validation.
    #[error("invalid payload: {0}")]
    Invalid(String),

    /// The graph store rejected or could not serve the operation.
    #[error("registry store unavailable: {0}")]
    Unavailable(#[from] TransportError),
}

impl From<DomainError> for RegistryError {
    fn from(err: DomainError) -> Self {
        RegistryError::Invalid(err.to_string())
    }
}

/// Partial update for `PATCH /api/projects/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New thesis; must be non-empty when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thesis: Option<String>,
    /// Replacement research questions; must be non-empty when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_questions: Option<Vec<String>>,
    /// Replacement anti-scope list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_scope: Option<Vec<String>>,
    /// New target journal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_journal: Option<String>,
    /// New rigor level; affects only subsequently submitted jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rigor: Option<RigorLevel>,
    /// New tone policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_policy: Option<TonePolicy>,
    /// Replacement tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Derived processing status of a project, from its latest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// A job is pending, queued, or running.
    Processing,
    /// The latest job succeeded.
    Completed,
    /// The latest job failed or was cancelled.
    Failed,
    /// No jobs yet.
    Idle,
}

/// A project together with its derived status for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    /// The project document.
    #[serde(flatten)]
    pub project: Project,
    /// Derived status from the latest job.
    pub status: ProjectStatus,
    /// Creation time of the latest job, when any exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_job_at: Option<DateTime<Utc>>,
}

/// Filter for `GET /api/projects`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectFilter {
    /// Substring match over title and thesis (case-insensitive).
    #[serde(default)]
    pub query: Option<String>,
    /// Tag intersection: every listed tag must be present.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Rigor equality.
    #[serde(default)]
    pub rigor: Option<RigorLevel>,
    /// Derived-status equality.
    #[serde(default)]
    pub status: Option<ProjectStatus>,
    /// Only projects created at or after this instant.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only projects created at or before this instant.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

/// The hub view: projects partitioned into active and archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubView {
    /// Projects with a recent job or one currently processing.
    pub active: Vec<ProjectSummary>,
    /// Everything else.
    pub archived: Vec<ProjectSummary>,
}

/// Project registry backed by the graph store.
#[derive(Clone)]
pub struct ProjectRegistry {
    graph: Arc<dyn GraphStore>,
}

impl ProjectRegistry {
    /// Create a registry over the given graph store.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    fn cx() -> OpContext {
        OpContext::with_timeout(OP_TIMEOUT)
    }

    /// Create and persist a project.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Invalid`] on a bad payload,
    /// [`RegistryError::Unavailable`] when the store is down.
    pub async fn create(&self, payload: CreateProject) -> Result<Project, RegistryError> {
        let project = Project::create(payload)?;
        self.persist(&project).await?;
        info!(target: "loom.registry", id = %project.id, title = %project.title, "project created");
        Ok(project)
    }

    /// Fetch a project by id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when absent.
    pub async fn get(&self, id: Uuid) -> Result<Project, RegistryError> {
        let doc = self
            .graph
            .get_doc(&Self::cx(), collections::PROJECTS, &id.to_string())
            .await?
            .ok_or(RegistryError::NotFound(id))?;
        serde_json::from_value(doc).map_err(|e| RegistryError::Invalid(e.to_string()))
    }

    /// List projects matching the filter, newest first.
    pub async fn list(&self, filter: &ProjectFilter) -> Result<Vec<ProjectSummary>, RegistryError> {
        let jobs = self.all_jobs().await?;
        let docs = self.graph.list_docs(&Self::cx(), collections::PROJECTS).await?;
        let mut out = Vec::new();
        for doc in docs {
            let project: Project = match serde_json::from_value(doc) {
                Ok(p) => p,
                Err(err) => {
                    debug!(target: "loom.registry", error = %err, "skipping undecodable project doc");
                    continue;
                }
            };
            let summary = summarize(project, &jobs);
            if filter_matches(filter, &summary) {
                out.push(summary);
            }
        }
        out.sort_by(|a, b| b.project.created_at.cmp(&a.project.created_at));
        Ok(out)
    }

    /// The hub view: active (recent or processing) vs archived.
    pub async fn hub(&self, filter: &ProjectFilter) -> Result<HubView, RegistryError> {
        let cutoff = Utc::now() - ChronoDuration::days(HUB_ACTIVE_WINDOW_DAYS);
        let mut active = Vec::new();
        let mut archived = Vec::new();
        for summary in self.list(filter).await? {
            let recent = summary.last_job_at.is_some_and(|t| t >= cutoff);
            if recent || summary.status == ProjectStatus::Processing {
                active.push(summary);
            } else {
                archived.push(summary);
            }
        }
        Ok(HubView { active, archived })
    }

    /// Register a seed file under a project, idempotent by content hash.
    ///
    /// Returns the updated project. The write completes before returning,
    /// so a job snapshot taken afterwards sees the new entry.
    pub async fn add_seed_file(
        &self,
        id: Uuid,
        filename: &str,
        content_hash: &str,
    ) -> Result<Project, RegistryError> {
        let mut project = self.get(id).await?;
        if project.add_seed_file(filename, content_hash) {
            self.persist(&project).await?;
            debug!(target: "loom.registry", id = %id, filename, "seed file registered");
        }
        Ok(project)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Invalid`] when the patch would empty the thesis or
    /// research questions.
    pub async fn update(&self, id: Uuid, patch: ProjectPatch) -> Result<Project, RegistryError> {
        let mut project = self.get(id).await?;
        if let Some(title) = patch.title {
            project.title = title;
        }
        if let Some(thesis) = patch.thesis {
            if thesis.trim().is_empty() {
                return Err(RegistryError::Invalid("thesis must not be empty".into()));
            }
            project.thesis = thesis;
        }
        if let Some(questions) = patch.research_questions {
            if questions.iter().all(|q| q.trim().is_empty()) {
                return Err(RegistryError::Invalid(
                    "at least one research question is required".into(),
                ));
            }
            project.research_questions = questions;
        }
        if let Some(anti_scope) = patch.anti_scope {
            project.anti_scope = anti_scope;
        }
        if let Some(journal) = patch.target_journal {
            project.target_journal = Some(journal);
        }
        if let Some(rigor) = patch.rigor {
            project.set_rigor(rigor);
        }
        if let Some(tone) = patch.tone_policy {
            project.tone_policy = tone;
        }
        if let Some(tags) = patch.tags {
            project.tags = tags;
        }
        project.updated_at = Utc::now();
        self.persist(&project).await?;
        Ok(project)
    }

    /// Set the rigor level. In-flight jobs keep their snapshot.
    pub async fn update_rigor(&self, id: Uuid, rigor: RigorLevel) -> Result<Project, RegistryError> {
        self.update(
            id,
            ProjectPatch {
                rigor: Some(rigor),
                ..ProjectPatch::default()
            },
        )
        .await
    }

    /// Delete a project document. Claims and blocks stay, keyed by project.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when absent.
    pub async fn delete(&self, id: Uuid) -> Result<(), RegistryError> {
        let existed = self
            .graph
            .delete_doc(&Self::cx(), collections::PROJECTS, &id.to_string())
            .await?;
        if existed {
            info!(target: "loom.registry", id = %id, "project deleted");
            Ok(())
        } else {
            Err(RegistryError::NotFound(id))
        }
    }

    /// Recent job snapshots for a project, most recent first.
    pub async fn jobs_for(&self, id: Uuid, limit: usize) -> Result<Vec<JobRecord>, RegistryError> {
        let mut jobs: Vec<JobRecord> = self
            .all_jobs()
            .await?
            .into_iter()
            .filter(|j| j.project_id == id)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Artifact manifests indexed under a project.
    pub async fn manifests_for(&self, id: Uuid) -> Result<Vec<Value>, RegistryError> {
        let docs = self
            .graph
            .list_docs(&Self::cx(), collections::ARTIFACT_MANIFESTS)
            .await?;
        Ok(docs
            .into_iter()
            .filter(|doc| {
                doc.get("project_id").and_then(Value::as_str) == Some(id.to_string().as_str())
            })
            .collect())
    }

    async fn persist(&self, project: &Project) -> Result<(), RegistryError> {
        let doc = serde_json::to_value(project).map_err(|e| RegistryError::Invalid(e.to_string()))?;
        self.graph
            .put_doc(&Self::cx(), collections::PROJECTS, &project.id.to_string(), doc)
            .await?;
        Ok(())
    }

    async fn all_jobs(&self) -> Result<Vec<JobRecord>, RegistryError> {
        let docs = self.graph.list_docs(&Self::cx(), collections::JOBS).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect())
    }
}

fn summarize(project: Project, jobs: &[JobRecord]) -> ProjectSummary {
    let mut latest: Option<&JobRecord> = None;
    for job in jobs.iter().filter(|j| j.project_id == project.id) {
        if latest.is_none_or(|l| job.created_at > l.created_at) {
            latest = Some(job);
        }
    }
    let processing = jobs
        .iter()
        .any(|j| j.project_id == project.id && !j.status.is_terminal());
    let status = if processing {
        ProjectStatus::Processing
    } else {
        match latest.map(|j| j.status) {
            Some(JobStatus::Succeeded) => ProjectStatus::Completed,
            Some(JobStatus::Failed | JobStatus::Cancelled) => ProjectStatus::Failed,
            Some(_) => ProjectStatus::Processing,
            None => ProjectStatus::Idle,
        }
    };
    ProjectSummary {
        last_job_at: latest.map(|j| j.created_at),
        project,
        status,
    }
}

fn filter_matches(filter: &ProjectFilter, summary: &ProjectSummary) -> bool {
    let project = &summary.project;
    if let Some(query) = &filter.query {
        let q = query.to_lowercase();
        if !project.title.to_lowercase().contains(&q) && !project.thesis.to_lowercase().contains(&q)
        {
            return false;
        }
    }
    if !filter.tags.iter().all(|t| project.tags.contains(t)) {
        return false;
    }
    if let Some(rigor) = filter.rigor {
        if project.rigor != rigor {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if summary.status != status {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if project.created_at < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if project.created_at > until {
            return false;
        }
    }
    true
}
