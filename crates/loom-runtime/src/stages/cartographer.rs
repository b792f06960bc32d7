// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cartographer stage: propose claims from the document text.
//!
//! Calls the logic server with the project context bundled into the prompt
//! and a triples schema constraint. Every produced triple starts Proposed
//! with the cartographer in provenance, carries a source pointer to the
//! best-matching page, and is upserted into the graph store under the
//! project.

use super::{persist_claim, update_ingestion};
use crate::stage::{Stage, StageContext, StageError};
use async_trait::async_trait;
use loom_core::{Claim, IngestionState, SourcePointer};
use loom_transport::{GenerateRequest, SamplingParams, parse_schema};
use serde::Deserialize;
use tracing::debug;

/// Sliding-window size over the document text, in characters.
const WINDOW_CHARS: usize = 6000;

/// Overlap between consecutive windows.
const WINDOW_OVERLAP: usize = 500;

/// Regex constraint sent to the logic server for triple extraction.
pub const TRIPLES_SCHEMA_REGEX: &str =
    r#"\{"triples":\s*\[(\{"subject":"[^"]+","predicate":"[^"]+","object":"[^"]+"[^}]*\},?\s*)*\]\}"#;

#[derive(Debug, Deserialize)]
struct TriplesPayload {
    triples: Vec<RawTriple>,
}

#[derive(Debug, Deserialize)]
struct RawTriple {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    question: Option<usize>,
}

/// Proposes claims from the document under the project context.
pub struct CartographerStage;

#[async_trait]
impl Stage for CartographerStage {
    fn name(&self) -> &'static str {
        "cartographer"
    }

    fn window(&self) -> (u8, u8) {
        (20, 50)
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        update_ingestion(cx, |ing| ing.state = IngestionState::Mapping).await;

        let text = cx
            .state
            .document_text
            .clone()
            .or_else(|| cx.initial.request.text.clone())
            .unwrap_or_default();
        if text.trim().is_empty() {
            debug!(target: "loom.stages", job_id = %cx.job_id, "no document text; nothing to map");
            return Ok(());
        }
        if cx.state.document_text.is_none() {
            // Inline text submissions skip ingest; make the text visible to
            // downstream snippet lookups.
            cx.state.document_text = Some(text.clone());
        }

        let doc_hash = cx.state.doc_hash.clone().unwrap_or_else(|| "inline".into());
        let windows = windows_over(&text);
        let total = windows.len();
        for (i, window) in windows.into_iter().enumerate() {
            cx.check_cancelled()?;
            let prompt = build_prompt(cx, window);
            let raw = cx
                .services
                .logic
                .generate(
                    &cx.op,
                    GenerateRequest {
                        prompt,
                        schema_regex: Some(TRIPLES_SCHEMA_REGEX.to_string()),
                        sampling: SamplingParams::default(),
                    },
                )
                .await?;
            let payload: TriplesPayload = parse_schema(&raw)?;

            for raw in payload.triples {
                let evidence = raw.evidence.unwrap_or_default();
                let page = raw
                    .page
                    .or_else(|| cx.state.page_of_snippet(&evidence))
                    .unwrap_or(1);
                let mut claim = Claim::proposed(
                    cx.project().id,
                    raw.subject,
                    raw.predicate,
                    raw.object,
                    raw.confidence.unwrap_or(0.5),
                    evidence.clone(),
                    SourcePointer {
                        doc_hash: doc_hash.clone(),
                        page,
                        bbox: None,
                        snippet: evidence,
                    },
                );
                claim.research_question = raw
                    .question
                    .and_then(|idx| cx.project().research_questions.get(idx).cloned());

                // Upserts collapse duplicates across windows and jobs.
                if let Some(existing) = cx.state.claims.iter_mut().find(|c| c.id == claim.id) {
                    existing.confidence = existing.confidence.max(claim.confidence);
                    continue;
                }
                persist_claim(cx, &claim).await?;
                cx.state.claims.push(claim);
            }
            cx.progress.report((i + 1) as f64 / total as f64).await;
        }

        debug!(
            target: "loom.stages",
            job_id = %cx.job_id,
            claims = cx.state.claims.len(),
            "cartography complete"
        );
        Ok(())
    }
}

fn windows_over(text: &str) -> Vec<&str> {
    if text.len() <= WINDOW_CHARS {
        return vec![text];
    }
    let mut out = Vec::new();
    let step = WINDOW_CHARS - WINDOW_OVERLAP;
    let mut start = 0;
    while start < text.len() {
        let end = (start + WINDOW_CHARS).min(text.len());
        // Align to char boundaries; byte arithmetic may land mid-codepoint.
        let start_aligned = ceil_char_boundary(text, start);
        let end_aligned = ceil_char_boundary(text, end);
        if start_aligned < end_aligned {
            out.push(&text[start_aligned..end_aligned]);
        }
        if end == text.len() {
            break;
        }
        start += step;
    }
    out
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn build_prompt(cx: &StageContext, window: &str) -> String {
    let project = cx.project();
    let questions = project
        .research_questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{i}. {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    let anti_scope = if project.anti_scope.is_empty() {
        "(none)".to_string()
    } else {
        project.anti_scope.join("; ")
    };
    format!(
        "Extract factual subject-predicate-object claims from the document \
         excerpt below.\n\
         Thesis: {thesis}\n\
         Research questions:\n{questions}\n\
         Out of scope: {anti_scope}\n\
         Rigor: {rigor:?}\n\
         Answer as JSON: {{\"triples\": [{{\"subject\", \"predicate\", \
         \"object\", \"confidence\", \"evidence\", \"page\", \"question\"}}]}}\n\
         ---\n{window}",
        thesis = project.thesis,
        rigor = cx.rigor(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_window() {
        let text = "short document";
        assert_eq!(windows_over(text), vec![text]);
    }

    #[test]
    fn long_text_windows_overlap() {
        let text = "a".repeat(15_000);
        let windows = windows_over(&text);
        assert!(windows.len() >= 2);
        assert!(windows.iter().all(|w| w.len() <= WINDOW_CHARS));
        let covered: usize = windows.iter().map(|w| w.len()).sum();
        // Overlap means total coverage exceeds the text length.
        assert!(covered > text.len());
    }

    #[test]
    fn windows_respect_char_boundaries() {
        let text = "é".repeat(8_000);
        let windows = windows_over(&text);
        // Slicing mid-codepoint would have panicked above.
        assert!(!windows.is_empty());
    }

    #[test]
    fn triples_payload_parses_optional_fields() {
        let payload: TriplesPayload = parse_schema(
            r#"{"triples": [{"subject": "s", "predicate": "p", "object": "o", "confidence": 0.8, "evidence": "because", "page": 2}]}"#,
        )
        .unwrap();
        assert_eq!(payload.triples.len(), 1);
        assert_eq!(payload.triples[0].page, Some(2));
        assert!(payload.triples[0].question.is_none());
    }
}
