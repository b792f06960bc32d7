// SPDX-License-Identifier: MIT OR Apache-2.0
//! Claims: subject-predicate-object assertions with evidence and provenance.
//!
//! A claim's status and provenance form an append-only history. The allowed
//! transitions are a fixed table keyed by the acting stage; once a claim is
//! Flagged, acceptance requires an explicit provenance override.

use crate::DomainError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Canonical stage names recorded in claim provenance.
pub mod stage_names {
    /// The extraction stage.
    pub const INGEST: &str = "Ingest";
    /// The claim-proposal stage.
    pub const CARTOGRAPHER: &str = "Cartographer";
    /// The claim-verification stage.
    pub const VERIFIER: &str = "Verifier";
    /// The conflict/policy audit stage.
    pub const CRITIC: &str = "Critic";
    /// The manuscript-drafting stage.
    pub const DRAFTER: &str = "Drafter";
    /// The artifact-persistence stage.
    pub const SAVER: &str = "Saver";
}

/// Lifecycle state of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimStatus {
    /// Emitted by the cartographer, not yet verified.
    Proposed,
    /// Verified against its evidence.
    Accepted,
    /// Flagged by the critic; carries a conflict record.
    Flagged,
    /// Verification was inconclusive below the confidence floor.
    NeedsReview,
}

/// Verification confidence floor: inconclusive verdicts below this are
/// marked NeedsReview rather than left Proposed.
pub const CONFIDENCE_FLOOR: f64 = 0.5;

impl ClaimStatus {
    /// Returns `true` if `actor` may move a claim from `self` to `next`.
    ///
    /// Flagged → Accepted is never allowed through this table; it requires
    /// [`Claim::apply_override`] so the override lands in provenance.
    #[must_use]
    pub fn can_transition_to(&self, next: ClaimStatus, actor: &str) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, next, actor),
            (Proposed, Accepted, stage_names::VERIFIER)
                | (Proposed, NeedsReview, stage_names::VERIFIER)
                | (Proposed, Flagged, stage_names::CRITIC)
                | (Accepted, Flagged, stage_names::CRITIC)
        )
    }
}

/// Which stages touched a claim, in order of the workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Stage that proposed the claim.
    #[serde(default)]
    pub proposed_by: Option<String>,
    /// Stage that verified the claim.
    #[serde(default)]
    pub verified_by: Option<String>,
    /// Stage that flagged the claim.
    #[serde(default)]
    pub flagged_by: Option<String>,
    /// Actor that overrode a flag (human reviewer or critic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_by: Option<String>,
}

/// Where in the source document a claim's evidence lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePointer {
    /// Content hash of the source document.
    pub doc_hash: String,
    /// 1-based page number.
    pub page: u32,
    /// Bounding box `[x0, y0, x1, y1]` in page coordinates, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Evidence snippet quoted from the page.
    pub snippet: String,
}

/// A structured explanation of two competing claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Human-readable conflict summary.
    pub summary: String,
    /// Source pointers for both sides of the conflict.
    pub sources: [SourcePointer; 2],
    /// The competing claim texts.
    pub competing: [String; 2],
}

/// A subject-predicate-object assertion with evidence and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Upsert key: hash of `(project_id, subject, predicate, object)`.
    pub id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// Subject phrase.
    pub subject: String,
    /// Predicate phrase.
    pub predicate: String,
    /// Object phrase.
    pub object: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Evidence snippet supporting the claim.
    pub evidence: String,
    /// Where the evidence lives in the source.
    pub source: SourcePointer,
    /// Lifecycle state.
    pub status: ClaimStatus,
    /// Which stages touched the claim.
    pub provenance: Provenance,
    /// Research question this claim answers, if linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_question: Option<String>,
    /// Citation keys attached by the drafter.
    #[serde(default)]
    pub citation_keys: Vec<String>,
    /// Conflict record; non-null whenever the claim is Flagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictRecord>,
}

/// Compute the upsert key for a claim: SHA-256 over the project id and the
/// whitespace-trimmed, lowercased triple.
#[must_use]
pub fn claim_key(project_id: Uuid, subject: &str, predicate: &str, object: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    for part in [subject, predicate, object] {
        hasher.update(part.trim().to_lowercase().as_bytes());
        hasher.update(b"|");
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl Claim {
    /// Construct a freshly proposed claim.
    #[must_use]
    pub fn proposed(
        project_id: Uuid,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: f64,
        evidence: impl Into<String>,
        source: SourcePointer,
    ) -> Self {
        let subject = subject.into();
        let predicate = predicate.into();
        let object = object.into();
        Self {
            id: claim_key(project_id, &subject, &predicate, &object),
            project_id,
            subject,
            predicate,
            object,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
            source,
            status: ClaimStatus::Proposed,
            provenance: Provenance {
                proposed_by: Some(stage_names::CARTOGRAPHER.to_string()),
                ..Provenance::default()
            },
            research_question: None,
            citation_keys: Vec::new(),
            conflict: None,
        }
    }

    /// Apply a status transition from the given stage, recording provenance.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ClaimTransition`] when the transition is not in
    /// the allowed table, or when flagging without a conflict record.
    pub fn apply_transition(
        &mut self,
        to: ClaimStatus,
        actor: &str,
        conflict: Option<ConflictRecord>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to, actor) {
            return Err(DomainError::ClaimTransition {
                from: self.status,
                to,
                actor: actor.to_string(),
            });
        }
        match to {
            ClaimStatus::Accepted => self.provenance.verified_by = Some(actor.to_string()),
            ClaimStatus::Flagged => {
                let conflict = conflict.ok_or(DomainError::ClaimTransition {
                    from: self.status,
                    to,
                    actor: actor.to_string(),
                })?;
                self.provenance.flagged_by = Some(actor.to_string());
                self.conflict = Some(conflict);
            }
            ClaimStatus::NeedsReview | ClaimStatus::Proposed => {}
        }
        self.status = to;
        Ok(())
    }

    /// Accept a Flagged claim with an explicit provenance override.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ClaimTransition`] when the claim is not Flagged.
    pub fn apply_override(&mut self, actor: &str) -> Result<(), DomainError> {
        if self.status != ClaimStatus::Flagged {
            return Err(DomainError::ClaimTransition {
                from: self.status,
                to: ClaimStatus::Accepted,
                actor: actor.to_string(),
            });
        }
        self.provenance.override_by = Some(actor.to_string());
        self.status = ClaimStatus::Accepted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Claim {
        Claim::proposed(
            Uuid::nil(),
            "glacier X",
            "retreated by",
            "120 m",
            0.7,
            "Glacier X retreated by 120 m between 2000 and 2010.",
            SourcePointer {
                doc_hash: "h".into(),
                page: 3,
                bbox: None,
                snippet: "retreated by 120 m".into(),
            },
        )
    }

    fn conflict() -> ConflictRecord {
        ConflictRecord {
            summary: "competing retreat estimates".into(),
            sources: [SourcePointer::default(), SourcePointer::default()],
            competing: ["120 m".into(), "80 m".into()],
        }
    }

    #[test]
    fn proposed_claim_records_cartographer() {
        let c = sample();
        assert_eq!(c.status, ClaimStatus::Proposed);
        assert_eq!(c.provenance.proposed_by.as_deref(), Some("Cartographer"));
        assert!(c.provenance.verified_by.is_none());
    }

    #[test]
    fn claim_key_is_case_and_whitespace_insensitive() {
        let a = claim_key(Uuid::nil(), "Glacier X", "retreated by", "120 m");
        let b = claim_key(Uuid::nil(), "  glacier x ", "Retreated By", "120 M");
        assert_eq!(a, b);
    }

    #[test]
    fn claim_key_differs_across_projects() {
        let a = claim_key(Uuid::nil(), "s", "p", "o");
        let b = claim_key(Uuid::new_v4(), "s", "p", "o");
        assert_ne!(a, b);
    }

    #[test]
    fn verifier_accepts_proposed() {
        let mut c = sample();
        c.apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
            .unwrap();
        assert_eq!(c.status, ClaimStatus::Accepted);
        assert_eq!(c.provenance.verified_by.as_deref(), Some("Verifier"));
    }

    #[test]
    fn critic_cannot_accept() {
        let mut c = sample();
        let err = c
            .apply_transition(ClaimStatus::Accepted, stage_names::CRITIC, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::ClaimTransition { .. }));
        assert_eq!(c.status, ClaimStatus::Proposed);
    }

    #[test]
    fn flagging_requires_conflict_record() {
        let mut c = sample();
        c.apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
            .unwrap();
        assert!(
            c.apply_transition(ClaimStatus::Flagged, stage_names::CRITIC, None)
                .is_err()
        );
        c.apply_transition(ClaimStatus::Flagged, stage_names::CRITIC, Some(conflict()))
            .unwrap();
        assert_eq!(c.status, ClaimStatus::Flagged);
        assert!(c.conflict.is_some());
        assert_eq!(c.provenance.flagged_by.as_deref(), Some("Critic"));
    }

    #[test]
    fn flagged_to_accepted_requires_override() {
        let mut c = sample();
        c.apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
            .unwrap();
        c.apply_transition(ClaimStatus::Flagged, stage_names::CRITIC, Some(conflict()))
            .unwrap();
        assert!(!c.status.can_transition_to(ClaimStatus::Accepted, stage_names::VERIFIER));
        c.apply_override("reviewer:ada").unwrap();
        assert_eq!(c.status, ClaimStatus::Accepted);
        assert_eq!(c.provenance.override_by.as_deref(), Some("reviewer:ada"));
    }

    #[test]
    fn override_rejected_when_not_flagged() {
        let mut c = sample();
        assert!(c.apply_override("reviewer").is_err());
    }

    #[test]
    fn status_serializes_with_variant_names() {
        assert_eq!(
            serde_json::to_string(&ClaimStatus::Accepted).unwrap(),
            "\"Accepted\""
        );
        assert_eq!(
            serde_json::to_string(&ClaimStatus::NeedsReview).unwrap(),
            "\"NeedsReview\""
        );
    }

    #[test]
    fn confidence_is_clamped() {
        let c = Claim::proposed(
            Uuid::nil(),
            "s",
            "p",
            "o",
            1.7,
            "e",
            SourcePointer::default(),
        );
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn claim_json_roundtrip() {
        let mut c = sample();
        c.apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
            .unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let back: Claim = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
