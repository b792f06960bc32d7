// SPDX-License-Identifier: MIT OR Apache-2.0
//! Critic stage: policy audit, pairwise conflict detection, tone checks.
//!
//! Observe-only for job success: findings flag claims and annotate blocks
//! but never fail the job. Cancellation still propagates.

use super::{citation_tokens, persist_claim};
use crate::stage::{Stage, StageContext, StageError};
use async_trait::async_trait;
use loom_core::{Claim, ClaimStatus, ConflictRecord, RigorLevel, stage_names};
use loom_transport::{VectorIndex, collections};
use serde_json::json;
use tracing::{debug, warn};

/// Neighbourhood size for conflict lookups.
const CONFLICT_TOP_K: usize = 5;

/// Minimum cosine similarity before a neighbour is considered.
const CONFLICT_MIN_SCORE: f32 = 0.5;

/// Hedging vocabulary flagged in tone audits.
const HEDGE_TERMS: &[&str] = &["clearly", "obviously", "undoubtedly", "proves", "revolutionary"];

/// Audits accepted claims and drafted blocks.
pub struct CriticStage;

#[async_trait]
impl Stage for CriticStage {
    fn name(&self) -> &'static str {
        "critic"
    }

    fn window(&self) -> (u8, u8) {
        (70, 80)
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        match audit(cx).await {
            Ok(()) => Ok(()),
            Err(StageError::Cancelled) => Err(StageError::Cancelled),
            Err(err) => {
                // Findings are advisory; a broken audit must not fail the job.
                warn!(
                    target: "loom.stages",
                    job_id = %cx.job_id,
                    error = %err,
                    "critic audit aborted"
                );
                Ok(())
            }
        }
    }
}

async fn audit(cx: &mut StageContext) -> Result<(), StageError> {
    audit_policy(cx).await?;
    cx.progress.report(0.3).await;
    audit_conflicts(cx).await?;
    cx.progress.report(0.8).await;
    audit_tone(cx);
    audit_tables(cx);
    Ok(())
}

/// Flag accepted claims that tread into the project's anti-scope.
async fn audit_policy(cx: &mut StageContext) -> Result<(), StageError> {
    let anti_scope: Vec<String> = cx
        .project()
        .anti_scope
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    if anti_scope.is_empty() {
        return Ok(());
    }

    let flagged: Vec<usize> = cx
        .state
        .claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.status == ClaimStatus::Accepted)
        .filter(|(_, c)| {
            let haystack =
                format!("{} {} {}", c.subject, c.object, c.evidence).to_lowercase();
            anti_scope.iter().any(|term| haystack.contains(term))
        })
        .map(|(i, _)| i)
        .collect();

    for idx in flagged {
        cx.check_cancelled()?;
        let term = {
            let claim = &cx.state.claims[idx];
            let haystack = format!("{} {} {}", claim.subject, claim.object, claim.evidence)
                .to_lowercase();
            anti_scope
                .iter()
                .find(|t| haystack.contains(*t))
                .cloned()
                .unwrap_or_default()
        };
        let conflict = {
            let claim = &cx.state.claims[idx];
            ConflictRecord {
                summary: format!("anti-scope violation: {term}"),
                sources: [claim.source.clone(), claim.source.clone()],
                competing: [triple_text(claim), term],
            }
        };
        let claim = &mut cx.state.claims[idx];
        claim
            .apply_transition(ClaimStatus::Flagged, stage_names::CRITIC, Some(conflict))
            .map_err(|e| StageError::Invalid(e.to_string()))?;
        let claim = cx.state.claims[idx].clone();
        persist_claim(cx, &claim).await?;
    }
    Ok(())
}

/// Embed accepted claims and flag pairwise conflicts found in the
/// vector neighbourhood.
///
/// The lookup reads a recent snapshot; claims added after the read may be
/// missed, which is acceptable.
async fn audit_conflicts(cx: &mut StageContext) -> Result<(), StageError> {
    let accepted: Vec<usize> = cx
        .state
        .claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.status == ClaimStatus::Accepted)
        .map(|(i, _)| i)
        .collect();
    if accepted.is_empty() {
        return Ok(());
    }

    let texts: Vec<String> = accepted
        .iter()
        .map(|&i| {
            let c = &cx.state.claims[i];
            format!("{} {}", c.subject, c.object)
        })
        .collect();
    let vectors = cx.services.embedder.embed(&cx.op, &texts).await?;

    // The index is opened at the embedder's declared dimension; the guard
    // rejects any vector that disagrees with it.
    let index = VectorIndex::open(
        &cx.op,
        cx.services.vectors.clone(),
        cx.services.graph.as_ref(),
        collections::CLAIMS,
        cx.services.embedder.dimension(),
    )
    .await?;

    for (&idx, vector) in accepted.iter().zip(vectors) {
        cx.check_cancelled()?;
        let (claim_id, payload) = {
            let claim = &cx.state.claims[idx];
            (
                claim.id.clone(),
                json!({
                    "project_id": claim.project_id,
                    "subject": claim.subject,
                    "predicate": claim.predicate,
                    "object": claim.object,
                }),
            )
        };

        let neighbours = index.query(&cx.op, &vector, CONFLICT_TOP_K).await?;
        index.upsert(&cx.op, &claim_id, vector, payload).await?;

        for neighbour in neighbours {
            if neighbour.id == claim_id || neighbour.score < CONFLICT_MIN_SCORE {
                continue;
            }
            let same_project = neighbour.payload.get("project_id").and_then(|v| v.as_str())
                == Some(cx.state.claims[idx].project_id.to_string().as_str());
            if !same_project {
                continue;
            }
            let n_subject = neighbour
                .payload
                .get("subject")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let n_predicate = neighbour
                .payload
                .get("predicate")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let n_object = neighbour
                .payload
                .get("object")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let claim = &cx.state.claims[idx];
            let competing = claim.subject.eq_ignore_ascii_case(n_subject)
                && claim.predicate.eq_ignore_ascii_case(n_predicate)
                && !claim.object.eq_ignore_ascii_case(n_object);
            if !competing {
                continue;
            }

            debug!(
                target: "loom.stages",
                job_id = %cx.job_id,
                claim = %claim_id,
                neighbour = %neighbour.id,
                "conflicting claims detected"
            );
            flag_conflict_pair(cx, idx, &neighbour.id, n_subject, n_predicate, n_object).await?;
            break;
        }
    }
    Ok(())
}

async fn flag_conflict_pair(
    cx: &mut StageContext,
    idx: usize,
    other_id: &str,
    n_subject: &str,
    n_predicate: &str,
    n_object: &str,
) -> Result<(), StageError> {
    let other_doc = cx
        .services
        .graph
        .get_doc(&cx.op, collections::CLAIMS, other_id)
        .await?;
    let mut other: Option<Claim> = other_doc.and_then(|doc| serde_json::from_value(doc).ok());

    let other_text = format!("{n_subject} {n_predicate} {n_object}");
    let other_source = other
        .as_ref()
        .map(|c| c.source.clone())
        .unwrap_or_default();

    let conflict = {
        let claim = &cx.state.claims[idx];
        ConflictRecord {
            summary: format!(
                "competing objects for \"{} {}\": \"{}\" vs \"{}\"",
                claim.subject, claim.predicate, claim.object, n_object
            ),
            sources: [claim.source.clone(), other_source],
            competing: [triple_text(claim), other_text],
        }
    };

    // Flag the local claim.
    {
        let claim = &mut cx.state.claims[idx];
        claim
            .apply_transition(ClaimStatus::Flagged, stage_names::CRITIC, Some(conflict.clone()))
            .map_err(|e| StageError::Invalid(e.to_string()))?;
    }
    let local = cx.state.claims[idx].clone();
    persist_claim(cx, &local).await?;

    // Flag the stored neighbour when it is still accepted.
    if let Some(stored) = other.as_mut() {
        if stored
            .apply_transition(ClaimStatus::Flagged, stage_names::CRITIC, Some(conflict.clone()))
            .is_ok()
        {
            let doc = serde_json::to_value(&*stored)
                .map_err(|e| StageError::Invalid(format!("encode claim: {e}")))?;
            cx.services
                .graph
                .put_doc(&cx.op, collections::CLAIMS, other_id, doc)
                .await?;
        }
    }

    // Conflicts are stored as edges between the two claim documents.
    cx.services
        .graph
        .put_edge(
            &cx.op,
            collections::CLAIM_EDGES,
            &local.id,
            other_id,
            json!({"summary": conflict.summary, "kind": "conflict"}),
        )
        .await?;
    Ok(())
}

/// Tone audit over drafted blocks, when any are present in the state bag.
fn audit_tone(cx: &mut StageContext) {
    let conservative = cx.rigor() == RigorLevel::Conservative;
    let bans: Vec<String> = cx
        .project()
        .tone_policy
        .hard_ban
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let mut flags = Vec::new();
    for block in &cx.state.blocks {
        let lower = block.text.to_lowercase();
        for term in HEDGE_TERMS {
            if lower.contains(term) {
                flags.push((block.id, format!("hedge: {term}")));
            }
        }
        if conservative {
            for term in &bans {
                if lower.contains(term) {
                    flags.push((block.id, format!("banned: {term}")));
                }
            }
        }
        let cited = citation_tokens(&block.text).len();
        if cited == 0 && !block.claim_ids.is_empty() {
            flags.push((block.id, "uncited claims".to_string()));
        }
    }
    cx.state.tone_flags.extend(flags);
}

/// Precision audit over detected tables.
fn audit_tables(cx: &mut StageContext) {
    let strict = cx.rigor() == RigorLevel::Conservative;
    let Some(text) = cx.state.document_text.as_deref() else {
        return;
    };
    let over_precise = text
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|tok| {
            tok.split_once('.')
                .is_some_and(|(_, frac)| frac.len() > 3 && frac.chars().all(|c| c.is_ascii_digit()))
        })
        .count();
    if over_precise == 0 {
        return;
    }
    for table in &mut cx.state.tables {
        table.precision_flags.push(format!(
            "{over_precise} over-precise value(s) in source{}",
            if strict { " (conservative rigor)" } else { "" }
        ));
    }
}

fn triple_text(claim: &Claim) -> String {
    format!("{} {} {}", claim.subject, claim.predicate, claim.object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::stage::ProgressReporter;
    use crate::state::WorkState;
    use loom_core::{
        CreateProject, InitialState, ManuscriptBlock, Project, SourcePointer, SubmitPayload,
        TonePolicy,
    };
    use loom_jobstore::JobStore;
    use loom_telemetry::TelemetrySink;
    use loom_transport::{
        HashEmbedder, MemoryGraphStore, MemoryVectorStore, OpContext, PlainTextExtractor,
        ScriptedDraft, ScriptedLogic,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn project(anti_scope: Vec<String>) -> Project {
        Project::create(CreateProject {
            title: "t".into(),
            thesis: "thesis".into(),
            research_questions: vec!["q".into()],
            anti_scope,
            tone_policy: Some(TonePolicy::default()),
            ..CreateProject::default()
        })
        .unwrap()
    }

    fn context(project: Project) -> (StageContext, Arc<MemoryGraphStore>) {
        let graph = Arc::new(MemoryGraphStore::new());
        let store = Arc::new(JobStore::new(graph.clone()));
        let services = Arc::new(Services {
            logic: Arc::new(ScriptedLogic::always("{}")),
            draft: Arc::new(ScriptedDraft::always("prose")),
            embedder: Arc::new(HashEmbedder::new(16)),
            extractor: Arc::new(PlainTextExtractor),
            graph: graph.clone(),
            vectors: Arc::new(MemoryVectorStore::new()),
            telemetry: TelemetrySink::new(),
            artifact_root: std::env::temp_dir().join("loom-critic-tests"),
        });
        let cx = StageContext {
            job_id: Uuid::new_v4(),
            initial: InitialState {
                request: SubmitPayload::default(),
                project_context: project,
            },
            state: WorkState::default(),
            services,
            op: OpContext::with_timeout(Duration::from_secs(10)),
            progress: ProgressReporter::new(store, Uuid::nil(), "critic", (70, 80)),
        };
        (cx, graph)
    }

    fn accepted_claim(project_id: Uuid, subject: &str, object: &str) -> Claim {
        let mut claim = Claim::proposed(
            project_id,
            subject,
            "measures",
            object,
            0.8,
            format!("{subject} measures {object}"),
            SourcePointer::default(),
        );
        claim
            .apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
            .unwrap();
        claim
    }

    #[tokio::test]
    async fn anti_scope_claims_are_flagged_with_conflict() {
        let project = project(vec!["speculation".into()]);
        let project_id = project.id;
        let (mut cx, _graph) = context(project);
        cx.state
            .claims
            .push(accepted_claim(project_id, "pure speculation", "120 m"));

        CriticStage.run(&mut cx).await.unwrap();

        let claim = &cx.state.claims[0];
        assert_eq!(claim.status, ClaimStatus::Flagged);
        let conflict = claim.conflict.as_ref().unwrap();
        assert!(conflict.summary.contains("anti-scope"), "{}", conflict.summary);
        assert_eq!(claim.provenance.flagged_by.as_deref(), Some("Critic"));
    }

    #[tokio::test]
    async fn competing_objects_flag_both_claims_and_write_an_edge() {
        let project = project(vec![]);
        let project_id = project.id;
        let (mut cx, graph) = context(project);

        // A previously persisted claim with the same subject+predicate and
        // a different object, already in the graph and vector stores.
        let other = accepted_claim(project_id, "glacier x retreat", "80 m");
        let doc = serde_json::to_value(&other).unwrap();
        cx.services
            .graph
            .put_doc(&cx.op, collections::CLAIMS, &other.id, doc)
            .await
            .unwrap();
        // Index the neighbour at the query point the critic will embed, so
        // the lookup is deterministic regardless of embedder geometry.
        let vec = cx
            .services
            .embedder
            .embed(&cx.op, &["glacier x retreat 120 m".into()])
            .await
            .unwrap();
        let index = VectorIndex::open(
            &cx.op,
            cx.services.vectors.clone(),
            cx.services.graph.as_ref(),
            collections::CLAIMS,
            16,
        )
        .await
        .unwrap();
        index
            .upsert(
                &cx.op,
                &other.id,
                vec.into_iter().next().unwrap(),
                json!({
                    "project_id": project_id,
                    "subject": "glacier x retreat",
                    "predicate": "measures",
                    "object": "80 m",
                }),
            )
            .await
            .unwrap();

        cx.state
            .claims
            .push(accepted_claim(project_id, "glacier x retreat", "120 m"));

        CriticStage.run(&mut cx).await.unwrap();

        let claim = &cx.state.claims[0];
        assert_eq!(claim.status, ClaimStatus::Flagged);
        assert!(claim.conflict.as_ref().unwrap().summary.contains("competing"));

        // The stored neighbour was flagged too, and the conflict landed as
        // an edge between the two claim documents.
        let stored = cx
            .services
            .graph
            .get_doc(&cx.op, collections::CLAIMS, &other.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["status"], "Flagged");
        assert_eq!(graph.edge_count(collections::CLAIM_EDGES), 1);
    }

    #[tokio::test]
    async fn critic_failures_do_not_fail_the_job() {
        let project = project(vec![]);
        let project_id = project.id;
        let (mut cx, graph) = context(project);
        cx.state
            .claims
            .push(accepted_claim(project_id, "subject", "object"));
        // Break the graph store so the conflict audit cannot persist.
        graph.fail_with(loom_error::TransportError::unavailable("down"));
        CriticStage.run(&mut cx).await.unwrap();
    }

    #[tokio::test]
    async fn tone_audit_flags_hedges_and_bans() {
        let mut project = project(vec![]);
        project.tone_policy.hard_ban = vec!["breakthrough".into()];
        project.rigor = RigorLevel::Conservative;
        let project_id = project.id;
        let (mut cx, _graph) = context(project);

        cx.state.blocks.push(ManuscriptBlock::draft(
            project_id,
            "This clearly shows a breakthrough result [@a1].",
            vec!["claim-1".into()],
            vec!["a1".into()],
            RigorLevel::Conservative,
        ));

        CriticStage.run(&mut cx).await.unwrap();

        let flags: Vec<&str> = cx.state.tone_flags.iter().map(|(_, f)| f.as_str()).collect();
        assert!(flags.iter().any(|f| f.contains("hedge: clearly")), "{flags:?}");
        assert!(flags.iter().any(|f| f.contains("banned: breakthrough")), "{flags:?}");
    }
}
