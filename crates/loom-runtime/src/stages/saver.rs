// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saver stage: persist the artifact manifest.
//!
//! Manifest persistence to the graph store and the filesystem copy are
//! best-effort: failures are telemetered, never fatal. Everything else in
//! this stage (building and validating the manifest) surfaces normally;
//! the saver must not silently succeed on a broken manifest.

use super::update_ingestion;
use crate::stage::{Stage, StageContext, StageError};
use async_trait::async_trait;
use loom_core::{ArtifactManifest, IngestionState};
use loom_telemetry::ARTIFACT_MANIFEST_FAILED;
use loom_transport::collections;
use serde_json::json;
use tracing::{debug, warn};

/// Persists the terminal artifact manifest.
pub struct SaverStage;

#[async_trait]
impl Stage for SaverStage {
    fn name(&self) -> &'static str {
        "saver"
    }

    fn window(&self) -> (u8, u8) {
        (92, 100)
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        let manifest = ArtifactManifest::build(
            cx.job_id,
            cx.project().id,
            &cx.state.blocks,
            cx.state.tables.clone(),
            cx.state.images.clone(),
            cx.rigor(),
            &cx.state.tone_flags,
        );
        // A manifest referencing unknown claims is a real failure.
        manifest
            .validate_against(&cx.state.claims)
            .map_err(|e| StageError::Invalid(e.to_string()))?;
        cx.progress.report(0.3).await;

        let doc = serde_json::to_value(&manifest)
            .map_err(|e| StageError::Invalid(format!("encode manifest: {e}")))?;
        if let Err(err) = cx
            .services
            .graph
            .put_doc(
                &cx.op,
                collections::ARTIFACT_MANIFESTS,
                &cx.job_id.to_string(),
                doc.clone(),
            )
            .await
        {
            warn!(
                target: "loom.stages",
                job_id = %cx.job_id,
                error = %err,
                "manifest persistence failed; job continues"
            );
            cx.services.telemetry.record(
                ARTIFACT_MANIFEST_FAILED,
                [
                    ("job_id", json!(cx.job_id)),
                    ("target", json!("graph")),
                    ("error", json!(err.to_string())),
                ],
            );
        }
        cx.progress.report(0.7).await;

        if let Err(err) = write_filesystem_copy(cx, &doc).await {
            cx.services.telemetry.record(
                ARTIFACT_MANIFEST_FAILED,
                [
                    ("job_id", json!(cx.job_id)),
                    ("target", json!("filesystem")),
                    ("error", json!(err)),
                ],
            );
        }

        update_ingestion(cx, |ing| {
            ing.state = IngestionState::Completed;
            ing.progress_pct = 100;
        })
        .await;

        debug!(target: "loom.stages", job_id = %cx.job_id, blocks = manifest.totals.blocks, "manifest saved");
        cx.state.manifest = Some(manifest);
        Ok(())
    }
}

/// Filesystem layout: `{root}/{project_id}/{job_id}/artifact_manifest.json`.
async fn write_filesystem_copy(
    cx: &StageContext,
    doc: &serde_json::Value,
) -> Result<(), String> {
    let dir = cx
        .services
        .artifact_root
        .join(cx.project().id.to_string())
        .join(cx.job_id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| format!("create {}: {e}", dir.display()))?;
    let path = dir.join("artifact_manifest.json");
    let bytes = serde_json::to_vec_pretty(doc).map_err(|e| e.to_string())?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| format!("write {}: {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::stage::ProgressReporter;
    use crate::state::WorkState;
    use loom_core::{
        Claim, ClaimStatus, CreateProject, InitialState, ManuscriptBlock, Project, RigorLevel,
        SourcePointer, SubmitPayload, stage_names,
    };
    use loom_jobstore::JobStore;
    use loom_telemetry::TelemetrySink;
    use loom_transport::{
        HashEmbedder, MemoryGraphStore, MemoryVectorStore, OpContext, PlainTextExtractor,
        ScriptedDraft, ScriptedLogic, TransportError,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn project() -> Project {
        Project::create(CreateProject {
            title: "t".into(),
            thesis: "thesis".into(),
            research_questions: vec!["q".into()],
            ..CreateProject::default()
        })
        .unwrap()
    }

    fn context(root: &std::path::Path) -> (StageContext, Arc<MemoryGraphStore>, TelemetrySink) {
        let graph = Arc::new(MemoryGraphStore::new());
        let store = Arc::new(JobStore::new(graph.clone()));
        let telemetry = TelemetrySink::new();
        let services = Arc::new(Services {
            logic: Arc::new(ScriptedLogic::always("{}")),
            draft: Arc::new(ScriptedDraft::always("prose")),
            embedder: Arc::new(HashEmbedder::new(8)),
            extractor: Arc::new(PlainTextExtractor),
            graph: graph.clone(),
            vectors: Arc::new(MemoryVectorStore::new()),
            telemetry: telemetry.clone(),
            artifact_root: root.to_path_buf(),
        });
        let cx = StageContext {
            job_id: Uuid::new_v4(),
            initial: InitialState {
                request: SubmitPayload::default(),
                project_context: project(),
            },
            state: WorkState::default(),
            services,
            op: OpContext::with_timeout(Duration::from_secs(10)),
            progress: ProgressReporter::new(store, Uuid::nil(), "saver", (92, 100)),
        };
        (cx, graph, telemetry)
    }

    fn accepted_claim(project_id: Uuid) -> Claim {
        let mut claim = Claim::proposed(
            project_id,
            "s",
            "p",
            "o",
            0.8,
            "evidence",
            SourcePointer::default(),
        );
        claim
            .apply_transition(ClaimStatus::Accepted, stage_names::VERIFIER, None)
            .unwrap();
        claim
    }

    #[tokio::test]
    async fn saves_manifest_to_graph_and_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut cx, _graph, _telemetry) = context(tmp.path());
        let claim = accepted_claim(cx.project().id);
        cx.state.blocks.push(ManuscriptBlock::draft(
            cx.project().id,
            "Prose [@a].",
            vec![claim.id.clone()],
            vec!["a".into()],
            RigorLevel::Exploratory,
        ));
        cx.state.claims.push(claim);

        SaverStage.run(&mut cx).await.unwrap();

        let manifest = cx.state.manifest.as_ref().unwrap();
        assert_eq!(manifest.totals.blocks, 1);
        let stored = cx
            .services
            .graph
            .get_doc(&cx.op, collections::ARTIFACT_MANIFESTS, &cx.job_id.to_string())
            .await
            .unwrap();
        assert!(stored.is_some());

        let path = tmp
            .path()
            .join(cx.project().id.to_string())
            .join(cx.job_id.to_string())
            .join("artifact_manifest.json");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn manifest_persistence_failure_is_telemetered_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut cx, graph, telemetry) = context(tmp.path());
        graph.fail_with(TransportError::unavailable("graph down"));

        SaverStage.run(&mut cx).await.unwrap();

        assert!(cx.state.manifest.is_some());
        assert!(telemetry.count(ARTIFACT_MANIFEST_FAILED) >= 1);
    }

    #[tokio::test]
    async fn dangling_claim_reference_fails_the_saver() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut cx, _graph, _telemetry) = context(tmp.path());
        cx.state.blocks.push(ManuscriptBlock::draft(
            cx.project().id,
            "Prose.",
            vec!["missing-claim".into()],
            vec![],
            RigorLevel::Exploratory,
        ));

        let err = SaverStage.run(&mut cx).await.unwrap_err();
        assert!(err.message().contains("missing-claim"), "{}", err.message());
    }
}
