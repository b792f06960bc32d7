// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manuscript blocks produced by the drafter.

use crate::project::RigorLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Editorial status of a manuscript block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Freshly drafted, pending review.
    #[default]
    Draft,
    /// Accepted into the manuscript.
    Accepted,
    /// Replaced by a newer version.
    Superseded,
}

/// A drafted manuscript block, traceable to its supporting claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManuscriptBlock {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Drafted prose.
    pub text: String,
    /// Keys of the claims supporting this block.
    pub claim_ids: Vec<String>,
    /// Citation keys appearing in the text.
    #[serde(default)]
    pub citation_keys: Vec<String>,
    /// Editorial status.
    #[serde(default)]
    pub status: BlockStatus,
    /// Monotonic version, starting at 1.
    pub version: u32,
    /// Rigor level snapshot at drafting time.
    pub rigor: RigorLevel,
    /// Drafting timestamp.
    pub created_at: DateTime<Utc>,
}

impl ManuscriptBlock {
    /// Create a version-1 draft block.
    #[must_use]
    pub fn draft(
        project_id: Uuid,
        text: impl Into<String>,
        claim_ids: Vec<String>,
        citation_keys: Vec<String>,
        rigor: RigorLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            text: text.into(),
            claim_ids,
            citation_keys,
            status: BlockStatus::Draft,
            version: 1,
            rigor,
            created_at: Utc::now(),
        }
    }

    /// Word count of the block text.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
