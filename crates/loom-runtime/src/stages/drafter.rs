// SPDX-License-Identifier: MIT OR Apache-2.0
//! Drafter stage: produce manuscript blocks from accepted claims.
//!
//! One block per research question, each recording its supporting claim
//! ids. The tone rewrite pass runs only under the conjunction: rigor is
//! conservative AND the tone policy mode is rewrite AND a hard-banned term
//! is present. Citation tokens survive a rewrite verbatim; a rewrite that
//! drops one is discarded.

use super::citation_tokens;
use crate::stage::{Stage, StageContext, StageError};
use async_trait::async_trait;
use loom_core::{Claim, ClaimStatus, ManuscriptBlock, RigorLevel, ToneEnforcementMode};
use loom_transport::{ChatRequest, SamplingParams, collections};
use tracing::debug;

/// Drafts manuscript blocks from the accepted claim set.
pub struct DrafterStage;

#[async_trait]
impl Stage for DrafterStage {
    fn name(&self) -> &'static str {
        "drafter"
    }

    fn window(&self) -> (u8, u8) {
        (80, 92)
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        let accepted: Vec<Claim> = cx
            .state
            .claims
            .iter()
            .filter(|c| c.status == ClaimStatus::Accepted)
            .cloned()
            .collect();
        if accepted.is_empty() {
            debug!(target: "loom.stages", job_id = %cx.job_id, "no accepted claims; nothing to draft");
            return Ok(());
        }

        let questions = cx.project().research_questions.clone();
        let rigor = cx.rigor();
        let total = questions.len().max(1);

        for (i, question) in questions.iter().enumerate() {
            cx.check_cancelled()?;
            let supporting: Vec<&Claim> = accepted
                .iter()
                .filter(|c| {
                    c.research_question
                        .as_deref()
                        .is_none_or(|q| q == question.as_str())
                })
                .collect();
            if supporting.is_empty() {
                continue;
            }

            let prompt = draft_prompt(question, &supporting, rigor);
            let mut text = cx
                .services
                .draft
                .chat(
                    &cx.op,
                    ChatRequest {
                        system: Some(format!(
                            "You draft precise scholarly prose for: {}",
                            cx.project().thesis
                        )),
                        prompt,
                        sampling: SamplingParams::default(),
                    },
                )
                .await?;

            if let Some(term) = rewrite_trigger(cx, &text) {
                text = rewrite_for_tone(cx, text, &term).await?;
            }

            let citations = citation_tokens(&text);
            let block = ManuscriptBlock::draft(
                cx.project().id,
                text,
                supporting.iter().map(|c| c.id.clone()).collect(),
                citations,
                rigor,
            );
            let doc = serde_json::to_value(&block)
                .map_err(|e| StageError::Invalid(format!("encode block: {e}")))?;
            cx.services
                .graph
                .put_doc(
                    &cx.op,
                    collections::MANUSCRIPT_BLOCKS,
                    &block.id.to_string(),
                    doc,
                )
                .await?;
            cx.state.blocks.push(block);
            cx.progress.report((i + 1) as f64 / total as f64).await;
        }

        debug!(
            target: "loom.stages",
            job_id = %cx.job_id,
            blocks = cx.state.blocks.len(),
            "drafting complete"
        );
        Ok(())
    }
}

/// The tone-rewrite gate: conservative rigor AND rewrite mode AND a
/// hard-banned term actually present in the text.
fn rewrite_trigger(cx: &StageContext, text: &str) -> Option<String> {
    if cx.rigor() != RigorLevel::Conservative {
        return None;
    }
    if cx.project().tone_policy.mode != ToneEnforcementMode::Rewrite {
        return None;
    }
    let lower = text.to_lowercase();
    cx.project()
        .tone_policy
        .hard_ban
        .iter()
        .find(|term| lower.contains(&term.to_lowercase()))
        .cloned()
}

/// Rewrite a block to remove a banned term, preserving citation tokens.
///
/// If the rewrite loses or reorders any citation token, the original text
/// is kept and the block is flagged instead.
async fn rewrite_for_tone(
    cx: &mut StageContext,
    original: String,
    term: &str,
) -> Result<String, StageError> {
    let rewritten = cx
        .services
        .draft
        .chat(
            &cx.op,
            ChatRequest {
                system: None,
                prompt: format!(
                    "Rewrite the passage to avoid the term \"{term}\" while \
                     keeping every citation token (like [@key]) verbatim and \
                     in place.\n---\n{original}"
                ),
                sampling: SamplingParams::default(),
            },
        )
        .await?;

    if citation_tokens(&rewritten) == citation_tokens(&original) {
        Ok(rewritten)
    } else {
        debug!(target: "loom.stages", job_id = %cx.job_id, "rewrite dropped citations; keeping original");
        Ok(original)
    }
}

fn draft_prompt(question: &str, supporting: &[&Claim], rigor: RigorLevel) -> String {
    let claims = supporting
        .iter()
        .map(|c| {
            format!(
                "- {} {} {} (evidence: \"{}\")",
                c.subject, c.predicate, c.object, c.evidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Draft one manuscript paragraph answering the research question \
         below, using only the listed claims. Cite sources as [@key].\n\
         Rigor: {rigor:?}\n\
         Question: {question}\n\
         Claims:\n{claims}"
    )
}
