// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ingest stage: PDF bytes to markdown, page map, and a first-glance
//! summary.
//!
//! Preview-only: the image list is not promised to stay addressable later;
//! downstream stages re-derive what they need from the text.

use super::update_ingestion;
use crate::stage::{Stage, StageContext, StageError};
use async_trait::async_trait;
use loom_core::{Confidence, FirstGlance, IngestionState, TableStats};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Rough character count of a dense text page.
const DENSE_PAGE_CHARS: f64 = 3000.0;

/// Converts the uploaded document into text and structural hints.
pub struct IngestStage;

#[async_trait]
impl Stage for IngestStage {
    fn name(&self) -> &'static str {
        "ingest_pdf"
    }

    fn window(&self) -> (u8, u8) {
        (2, 20)
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        let path = cx
            .initial
            .request
            .upload
            .as_ref()
            .map(|u| u.stored_path.clone())
            .or_else(|| cx.initial.request.pdf_path.clone())
            .ok_or_else(|| StageError::Invalid("no document attached".into()))?;

        update_ingestion(cx, |ing| {
            ing.state = IngestionState::Extracting;
            ing.job_id = Some(cx.job_id);
        })
        .await;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StageError::Invalid(format!("read {path}: {e}")))?;
        cx.progress.report(0.2).await;
        cx.check_cancelled()?;

        let extract = cx.services.extractor.extract(&cx.op, &bytes).await?;
        cx.progress.report(0.7).await;

        let doc_hash = match &cx.initial.request.upload {
            Some(upload) => upload.content_hash.clone(),
            None => {
                let digest = Sha256::digest(&bytes);
                digest.iter().map(|b| format!("{b:02x}")).collect()
            }
        };

        let glance = first_glance(&extract.markdown, extract.pages.len(), extract.images.len());
        let confidence = confidence_for(&glance);
        debug!(
            target: "loom.stages",
            job_id = %cx.job_id,
            pages = glance.pages,
            tables = glance.tables_detected,
            density = glance.text_density,
            "document extracted"
        );

        cx.state.tables = (0..glance.tables_detected)
            .map(|i| TableStats {
                label: format!("Table {}", i + 1),
                precision_flags: Vec::new(),
                units: Default::default(),
            })
            .collect();
        cx.state.document_text = Some(extract.markdown);
        cx.state.pages = extract.pages;
        cx.state.images = extract.images;
        cx.state.doc_hash = Some(doc_hash);

        update_ingestion(cx, |ing| {
            ing.first_glance = Some(glance.clone());
            ing.confidence = Some(confidence);
        })
        .await;

        Ok(())
    }
}

/// Count markdown tables: runs of consecutive `|`-prefixed lines.
fn table_count(markdown: &str) -> u32 {
    let mut tables = 0;
    let mut in_table = false;
    for line in markdown.lines() {
        let is_row = line.trim_start().starts_with('|');
        if is_row && !in_table {
            tables += 1;
        }
        in_table = is_row;
    }
    tables
}

fn first_glance(markdown: &str, pages: usize, images: usize) -> FirstGlance {
    let pages = pages.max(1);
    let density = (markdown.chars().count() as f64 / pages as f64 / DENSE_PAGE_CHARS).clamp(0.0, 1.0);
    FirstGlance {
        pages: pages as u32,
        tables_detected: table_count(markdown),
        figures_detected: images as u32,
        text_density: density,
    }
}

fn confidence_for(glance: &FirstGlance) -> Confidence {
    if glance.text_density >= 0.6 {
        Confidence::High
    } else if glance.text_density >= 0.25 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}
