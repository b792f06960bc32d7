// SPDX-License-Identifier: MIT OR Apache-2.0
//! Artifact manifests: the terminal per-job summary of produced blocks,
//! tables, and figures.

use crate::DomainError;
use crate::block::ManuscriptBlock;
use crate::claim::Claim;
use crate::project::RigorLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Per-block statistics recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    /// Block identifier.
    pub block_id: Uuid,
    /// Word count of the block text.
    pub word_count: usize,
    /// Number of citation keys in the block.
    pub citation_count: usize,
    /// Tone findings recorded by the critic or drafter.
    #[serde(default)]
    pub tone_flags: Vec<String>,
    /// Keys of the claims supporting this block.
    pub supporting_claims: Vec<String>,
}

/// Outcome of the unit-consistency check on a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitVerification {
    /// Units were checked and consistent.
    Verified,
    /// No unit check ran.
    #[default]
    Unchecked,
    /// Units were inconsistent.
    Mismatch,
}

/// Per-table statistics recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Table caption or positional label.
    pub label: String,
    /// Precision findings (e.g. over-precise decimals).
    #[serde(default)]
    pub precision_flags: Vec<String>,
    /// Unit-verification status.
    #[serde(default)]
    pub units: UnitVerification,
}

/// Aggregate totals across the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestTotals {
    /// Number of blocks.
    pub blocks: usize,
    /// Total words across blocks.
    pub words: usize,
    /// Total citations across blocks.
    pub citations: usize,
    /// Distinct supporting claims across blocks.
    pub supporting_claims: usize,
}

/// The terminal per-job artifact summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Owning job.
    pub job_id: Uuid,
    /// Owning project (for listing).
    pub project_id: Uuid,
    /// Per-block statistics.
    pub blocks: Vec<BlockStats>,
    /// Per-table statistics.
    #[serde(default)]
    pub tables: Vec<TableStats>,
    /// Visual artifact references (figure files, plots).
    #[serde(default)]
    pub visuals: Vec<String>,
    /// Aggregate totals.
    pub totals: ManifestTotals,
    /// Rigor level snapshot at save time.
    pub rigor: RigorLevel,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

impl ArtifactManifest {
    /// Build a manifest from drafted blocks and audit output.
    #[must_use]
    pub fn build(
        job_id: Uuid,
        project_id: Uuid,
        blocks: &[ManuscriptBlock],
        tables: Vec<TableStats>,
        visuals: Vec<String>,
        rigor: RigorLevel,
        tone_flags: &[(Uuid, String)],
    ) -> Self {
        let block_stats: Vec<BlockStats> = blocks
            .iter()
            .map(|b| BlockStats {
                block_id: b.id,
                word_count: b.word_count(),
                citation_count: b.citation_keys.len(),
                tone_flags: tone_flags
                    .iter()
                    .filter(|(id, _)| *id == b.id)
                    .map(|(_, flag)| flag.clone())
                    .collect(),
                supporting_claims: b.claim_ids.clone(),
            })
            .collect();

        let distinct: HashSet<&str> = block_stats
            .iter()
            .flat_map(|b| b.supporting_claims.iter().map(String::as_str))
            .collect();
        let totals = ManifestTotals {
            blocks: block_stats.len(),
            words: block_stats.iter().map(|b| b.word_count).sum(),
            citations: block_stats.iter().map(|b| b.citation_count).sum(),
            supporting_claims: distinct.len(),
        };

        Self {
            job_id,
            project_id,
            blocks: block_stats,
            tables,
            visuals,
            totals,
            rigor,
            created_at: Utc::now(),
        }
    }

    /// Check that every referenced claim key exists in the claim set.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ManifestDanglingClaim`] naming the first
    /// missing key.
    pub fn validate_against(&self, claims: &[Claim]) -> Result<(), DomainError> {
        let known: HashSet<&str> = claims.iter().map(|c| c.id.as_str()).collect();
        for block in &self.blocks {
            for key in &block.supporting_claims {
                if !known.contains(key.as_str()) {
                    return Err(DomainError::ManifestDanglingClaim(key.clone()));
                }
            }
        }
        Ok(())
    }
}
