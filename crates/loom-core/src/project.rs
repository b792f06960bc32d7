// SPDX-License-Identifier: MIT OR Apache-2.0
//! Projects: the research context every job runs under.

use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Project-scoped mode controlling tone rewrite and precision strictness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigorLevel {
    /// Looser tone and precision rules; drafts are not rewritten.
    #[default]
    Exploratory,
    /// Strict tone and precision rules; hard-banned terms are rewritten.
    Conservative,
}

/// How the tone policy reacts to a hard-banned term in a draft block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneEnforcementMode {
    /// Record a tone flag but leave the text untouched.
    #[default]
    Warn,
    /// Rewrite the offending passage (conservative rigor only).
    Rewrite,
}

/// Tone policy applied by the drafter and audited by the critic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TonePolicy {
    /// Enforcement mode for hard-banned terms.
    #[serde(default)]
    pub mode: ToneEnforcementMode,
    /// Terms that must never appear in conservative prose.
    #[serde(default)]
    pub hard_ban: Vec<String>,
}

/// A seed file registered under a project, deduplicated by content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedFile {
    /// Original filename as uploaded.
    pub filename: String,
    /// SHA-256 of the file contents (lowercase hex).
    pub content_hash: String,
    /// When the file was first registered.
    pub added_at: DateTime<Utc>,
}

/// A research project: the context snapshot injected into every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier.
    pub id: Uuid,
    /// Short display title.
    pub title: String,
    /// The thesis statement driving claim extraction.
    pub thesis: String,
    /// Ordered research questions.
    pub research_questions: Vec<String>,
    /// Topics explicitly out of scope for this project.
    #[serde(default)]
    pub anti_scope: Vec<String>,
    /// Target journal label, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_journal: Option<String>,
    /// Seed files registered under the project.
    #[serde(default)]
    pub seed_files: Vec<SeedFile>,
    /// Rigor level; affects only jobs submitted after a change.
    #[serde(default)]
    pub rigor: RigorLevel,
    /// Tone policy for drafting.
    #[serde(default)]
    pub tone_policy: TonePolicy,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProject {
    /// Short display title.
    pub title: String,
    /// The thesis statement; must be non-empty.
    pub thesis: String,
    /// Ordered research questions; must be non-empty.
    pub research_questions: Vec<String>,
    /// Topics explicitly out of scope.
    #[serde(default)]
    pub anti_scope: Vec<String>,
    /// Target journal label.
    #[serde(default)]
    pub target_journal: Option<String>,
    /// Rigor level (defaults to exploratory).
    #[serde(default)]
    pub rigor: Option<RigorLevel>,
    /// Tone policy (defaults to warn with no bans).
    #[serde(default)]
    pub tone_policy: Option<TonePolicy>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Project {
    /// Construct a project from a creation payload, enforcing invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidProject`] when the thesis is empty or
    /// no research questions are given.
    pub fn create(payload: CreateProject) -> Result<Self, DomainError> {
        if payload.thesis.trim().is_empty() {
            return Err(DomainError::InvalidProject("thesis must not be empty".into()));
        }
        if payload.research_questions.iter().all(|q| q.trim().is_empty()) {
            return Err(DomainError::InvalidProject(
                "at least one research question is required".into(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            title: payload.title,
            thesis: payload.thesis,
            research_questions: payload
                .research_questions
                .into_iter()
                .filter(|q| !q.trim().is_empty())
                .collect(),
            anti_scope: payload.anti_scope,
            target_journal: payload.target_journal,
            seed_files: Vec::new(),
            rigor: payload.rigor.unwrap_or_default(),
            tone_policy: payload.tone_policy.unwrap_or_default(),
            tags: payload.tags,
            created_at: now,
            updated_at: now,
        })
    }

    /// Register a seed file, deduplicated by content hash.
    ///
    /// Returns `true` when a new entry was appended, `false` when the hash
    /// was already present (the registration is idempotent).
    pub fn add_seed_file(&mut self, filename: impl Into<String>, content_hash: impl Into<String>) -> bool {
        let content_hash = content_hash.into();
        if self.seed_files.iter().any(|f| f.content_hash == content_hash) {
            return false;
        }
        self.seed_files.push(SeedFile {
            filename: filename.into(),
            content_hash,
            added_at: Utc::now(),
        });
        self.updated_at = Utc::now();
        true
    }

    /// Set the rigor level. In-flight jobs keep their snapshot.
    pub fn set_rigor(&mut self, rigor: RigorLevel) {
        self.rigor = rigor;
        self.updated_at = Utc::now();
    }
}
