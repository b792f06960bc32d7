// SPDX-License-Identifier: MIT OR Apache-2.0
//! The six specialist stages.
//!
//! Each stage is thin: it invokes transport clients and mutates the shared
//! state bag. Stage-to-stage coordination lives in the runtime, not here.

mod cartographer;
mod critic;
mod drafter;
mod ingest;
mod saver;
mod verifier;

pub use cartographer::CartographerStage;
pub use critic::CriticStage;
pub use drafter::DrafterStage;
pub use ingest::IngestStage;
pub use saver::SaverStage;
pub use verifier::VerifierStage;

use crate::services::Services;
use crate::stage::{StageContext, StageError};
use loom_core::{Claim, Ingestion, IngestionState};
use loom_transport::{OpContext, collections};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Persist one claim document under its upsert key.
pub(crate) async fn persist_claim(cx: &StageContext, claim: &Claim) -> Result<(), StageError> {
    let doc = serde_json::to_value(claim)
        .map_err(|e| StageError::Invalid(format!("encode claim: {e}")))?;
    cx.services
        .graph
        .put_doc(&cx.op, collections::CLAIMS, &claim.id, doc)
        .await?;
    Ok(())
}

/// Read-modify-write the job's ingestion record, when one exists.
///
/// Ingestion updates are user-facing progress, not job state; a failed
/// update is logged and swallowed so it cannot fail the stage.
pub(crate) async fn update_ingestion<F>(cx: &StageContext, mutate: F)
where
    F: FnOnce(&mut Ingestion),
{
    let Some(ingestion_id) = cx.initial.request.ingestion_id else {
        return;
    };
    apply_ingestion_update(&cx.services, &cx.op, ingestion_id, mutate).await;
}

/// Mark a job's ingestion Failed with the given message.
///
/// Called by the runtime on stage failure or cancellation; uses its own
/// short context because the job context may already be expired.
pub(crate) async fn fail_ingestion(services: &Services, ingestion_id: Option<Uuid>, error: &str) {
    let Some(ingestion_id) = ingestion_id else {
        return;
    };
    let op = OpContext::with_timeout(Duration::from_secs(5));
    apply_ingestion_update(services, &op, ingestion_id, |ing| {
        ing.state = IngestionState::Failed;
        ing.error = Some(error.to_string());
    })
    .await;
}

async fn apply_ingestion_update<F>(services: &Services, op: &OpContext, id: Uuid, mutate: F)
where
    F: FnOnce(&mut Ingestion),
{
    let doc = match services
        .graph
        .get_doc(op, collections::INGESTIONS, &id.to_string())
        .await
    {
        Ok(Some(doc)) => doc,
        Ok(None) => return,
        Err(err) => {
            warn!(target: "loom.stages", ingestion_id = %id, error = %err, "ingestion read failed");
            return;
        }
    };
    let mut ingestion: Ingestion = match serde_json::from_value(doc) {
        Ok(ing) => ing,
        Err(err) => {
            warn!(target: "loom.stages", ingestion_id = %id, error = %err, "ingestion decode failed");
            return;
        }
    };
    mutate(&mut ingestion);
    ingestion.updated_at = chrono::Utc::now();
    let doc = match serde_json::to_value(&ingestion) {
        Ok(doc) => doc,
        Err(_) => return,
    };
    if let Err(err) = services
        .graph
        .put_doc(op, collections::INGESTIONS, &id.to_string(), doc)
        .await
    {
        warn!(target: "loom.stages", ingestion_id = %id, error = %err, "ingestion write failed");
    }
}

/// Extract `[@key]` citation tokens from block text, in order, verbatim.
pub(crate) fn citation_tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'@' {
            if let Some(close) = text[i..].find(']') {
                let token = &text[i + 2..i + close];
                if !token.is_empty() && !token.contains(char::is_whitespace) {
                    out.push(token.to_string());
                }
                i += close + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_tokens_extracts_in_order() {
        let text = "Retreat accelerated [@smith2019], unlike earlier work [@jones2008].";
        assert_eq!(citation_tokens(text), vec!["smith2019", "jones2008"]);
    }

    #[test]
    fn citation_tokens_skips_malformed() {
        assert!(citation_tokens("no citations here").is_empty());
        assert!(citation_tokens("broken [@unclosed").is_empty());
        assert!(citation_tokens("[@has space]").is_empty());
    }
}
