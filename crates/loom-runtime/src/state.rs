// SPDX-License-Identifier: MIT OR Apache-2.0
//! The mutable state bag threaded through a job's stages.

use loom_core::{ArtifactManifest, Claim, ManuscriptBlock, TableStats};
use loom_transport::PageSpan;
use uuid::Uuid;

/// Shared mutable state a job's stages read and extend in sequence.
///
/// Each stage owns a slice of this bag: ingest fills the document fields,
/// the cartographer appends claims, the verifier and critic mutate claim
/// status, the drafter appends blocks, and the saver writes the manifest.
#[derive(Debug, Default)]
pub struct WorkState {
    /// Extracted (or inline) document text.
    pub document_text: Option<String>,
    /// Content hash of the source document.
    pub doc_hash: Option<String>,
    /// Page map over `document_text`.
    pub pages: Vec<PageSpan>,
    /// Extracted image references.
    pub images: Vec<String>,
    /// Tables detected in the document.
    pub tables: Vec<TableStats>,
    /// Claims, in proposal order.
    pub claims: Vec<Claim>,
    /// Drafted manuscript blocks.
    pub blocks: Vec<ManuscriptBlock>,
    /// Tone findings keyed by block id.
    pub tone_flags: Vec<(Uuid, String)>,
    /// The artifact manifest, once the saver built it.
    pub manifest: Option<ArtifactManifest>,
}

impl WorkState {
    /// The page containing byte `offset` of the document text, when known.
    #[must_use]
    pub fn page_of_offset(&self, offset: usize) -> Option<u32> {
        self.pages
            .iter()
            .find(|span| offset >= span.start && offset < span.end)
            .map(|span| span.page)
    }

    /// Locate `snippet` in the document text and return its page.
    #[must_use]
    pub fn page_of_snippet(&self, snippet: &str) -> Option<u32> {
        let text = self.document_text.as_deref()?;
        let needle = snippet.trim();
        if needle.is_empty() {
            return None;
        }
        text.find(needle).and_then(|off| self.page_of_offset(off))
    }
}
