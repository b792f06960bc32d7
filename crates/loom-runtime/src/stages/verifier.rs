// SPDX-License-Identifier: MIT OR Apache-2.0
//! Verifier stage: check every Proposed claim against its evidence.
//!
//! A pass marks the claim Accepted with the verifier in provenance; an
//! inconclusive verdict leaves it Proposed, or NeedsReview when the
//! verdict confidence falls below the floor.

use super::{persist_claim, update_ingestion};
use crate::stage::{Stage, StageContext, StageError};
use async_trait::async_trait;
use loom_core::{CONFIDENCE_FLOOR, ClaimStatus, IngestionState, stage_names};
use loom_transport::{GenerateRequest, SamplingParams, parse_schema};
use serde::Deserialize;
use tracing::debug;

/// Regex constraint sent to the logic server for verification verdicts.
pub const VERDICT_SCHEMA_REGEX: &str =
    r#"\{"supported":\s*(true|false),\s*"confidence":\s*[0-9.]+\}"#;

#[derive(Debug, Deserialize)]
struct Verdict {
    supported: bool,
    confidence: f64,
}

/// Verifies proposed claims against their quoted evidence.
pub struct VerifierStage;

#[async_trait]
impl Stage for VerifierStage {
    fn name(&self) -> &'static str {
        "verifier"
    }

    fn window(&self) -> (u8, u8) {
        (50, 70)
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        update_ingestion(cx, |ing| ing.state = IngestionState::Verifying).await;

        let proposed: Vec<usize> = cx
            .state
            .claims
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == ClaimStatus::Proposed)
            .map(|(i, _)| i)
            .collect();
        let total = proposed.len().max(1);

        for (done, idx) in proposed.into_iter().enumerate() {
            cx.check_cancelled()?;
            let prompt = {
                let claim = &cx.state.claims[idx];
                format!(
                    "Does the quoted evidence support the claim?\n\
                     Claim: {} {} {}\n\
                     Evidence: \"{}\"\n\
                     Answer as JSON: {{\"supported\": bool, \"confidence\": 0..1}}",
                    claim.subject, claim.predicate, claim.object, claim.evidence
                )
            };
            let raw = cx
                .services
                .logic
                .generate(
                    &cx.op,
                    GenerateRequest {
                        prompt,
                        schema_regex: Some(VERDICT_SCHEMA_REGEX.to_string()),
                        sampling: SamplingParams::default(),
                    },
                )
                .await?;
            let verdict: Verdict = parse_schema(&raw)?;

            let claim = &mut cx.state.claims[idx];
            if verdict.supported && verdict.confidence >= CONFIDENCE_FLOOR {
                claim
                    .apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
                    .map_err(|e| StageError::Invalid(e.to_string()))?;
                claim.confidence = verdict.confidence;
            } else if verdict.confidence < CONFIDENCE_FLOOR {
                claim
                    .apply_transition(ClaimStatus::NeedsReview, stage_names::VERIFIER, None)
                    .map_err(|e| StageError::Invalid(e.to_string()))?;
            }
            // Supported but borderline stays Proposed for a later pass.

            let claim = cx.state.claims[idx].clone();
            persist_claim(cx, &claim).await?;
            cx.progress.report((done + 1) as f64 / total as f64).await;
        }

        debug!(
            target: "loom.stages",
            job_id = %cx.job_id,
            accepted = cx.state.claims.iter().filter(|c| c.status == ClaimStatus::Accepted).count(),
            "verification complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parses_from_constrained_output() {
        let v: Verdict = parse_schema(r#"{"supported": true, "confidence": 0.92}"#).unwrap();
        assert!(v.supported);
        assert!(v.confidence > 0.9);
    }
}
