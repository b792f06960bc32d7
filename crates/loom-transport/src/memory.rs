// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory stand-ins for every outbound dependency.
//!
//! These back the test suites and local runs without external services:
//! a document/edge store, a cosine vector store, scripted logic and draft
//! models, a deterministic hash embedder, and a plain-text extractor.

use crate::context::OpContext;
use crate::graph::GraphStore;
use crate::model::{
    ChatRequest, DraftModel, Embedder, GenerateRequest, LogicModel, PageSpan, PdfExtract,
    PdfExtractor,
};
use crate::vector::{VectorMatch, VectorStore};
use async_trait::async_trait;
use loom_error::TransportError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// MemoryGraphStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct EdgeRec {
    collection: String,
    from: String,
    to: String,
    payload: Value,
}

/// In-memory [`GraphStore`].
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    docs: Mutex<HashMap<(String, String), Value>>,
    edges: Mutex<Vec<EdgeRec>>,
    fail: Mutex<Option<TransportError>>,
}

impl MemoryGraphStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `err` (until cleared).
    pub fn fail_with(&self, err: TransportError) {
        *self.fail.lock().expect("fail lock poisoned") = Some(err);
    }

    /// Clear an injected failure.
    pub fn heal(&self) {
        *self.fail.lock().expect("fail lock poisoned") = None;
    }

    fn check_fail(&self) -> Result<(), TransportError> {
        match self.fail.lock().expect("fail lock poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of edges recorded in a collection.
    #[must_use]
    pub fn edge_count(&self, collection: &str) -> usize {
        self.edges
            .lock()
            .expect("edges lock poisoned")
            .iter()
            .filter(|e| e.collection == collection)
            .count()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn put_doc(
        &self,
        _cx: &OpContext,
        collection: &str,
        id: &str,
        doc: Value,
    ) -> Result<(), TransportError> {
        self.check_fail()?;
        self.docs
            .lock()
            .expect("docs lock poisoned")
            .insert((collection.to_string(), id.to_string()), doc);
        Ok(())
    }

    async fn get_doc(
        &self,
        _cx: &OpContext,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, TransportError> {
        self.check_fail()?;
        Ok(self
            .docs
            .lock()
            .expect("docs lock poisoned")
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn delete_doc(
        &self,
        _cx: &OpContext,
        collection: &str,
        id: &str,
    ) -> Result<bool, TransportError> {
        self.check_fail()?;
        Ok(self
            .docs
            .lock()
            .expect("docs lock poisoned")
            .remove(&(collection.to_string(), id.to_string()))
            .is_some())
    }

    async fn list_docs(&self, _cx: &OpContext, collection: &str) -> Result<Vec<Value>, TransportError> {
        self.check_fail()?;
        let docs = self.docs.lock().expect("docs lock poisoned");
        let mut out: Vec<(String, Value)> = docs
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, id), v)| (id.clone(), v.clone()))
            .collect();
        // Deterministic listing order.
        out.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(out.into_iter().map(|(_, v)| v).collect())
    }

    async fn put_edge(
        &self,
        _cx: &OpContext,
        collection: &str,
        from: &str,
        to: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        self.check_fail()?;
        let mut edges = self.edges.lock().expect("edges lock poisoned");
        edges.retain(|e| !(e.collection == collection && e.from == from && e.to == to));
        edges.push(EdgeRec {
            collection: collection.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            payload,
        });
        Ok(())
    }

    async fn ping(&self, _cx: &OpContext) -> Result<(), TransportError> {
        self.check_fail()
    }
}

// ---------------------------------------------------------------------------
// MemoryVectorStore
// ---------------------------------------------------------------------------

/// In-memory cosine [`VectorStore`].
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    points: Mutex<HashMap<(String, String), (Vec<f32>, Value)>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl MemoryVectorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        _cx: &OpContext,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Value,
    ) -> Result<(), TransportError> {
        self.points
            .lock()
            .expect("points lock poisoned")
            .insert((collection.to_string(), id.to_string()), (vector, payload));
        Ok(())
    }

    async fn query(
        &self,
        _cx: &OpContext,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, TransportError> {
        let points = self.points.lock().expect("points lock poisoned");
        let mut matches: Vec<VectorMatch> = points
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, id), (vec, payload))| VectorMatch {
                id: id.clone(),
                score: cosine(vector, vec),
                payload: payload.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn ping(&self, _cx: &OpContext) -> Result<(), TransportError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted model servers
// ---------------------------------------------------------------------------

/// Scripted [`LogicModel`]: pops queued responses, then falls back to a
/// default. Records every prompt for assertions.
#[derive(Default)]
pub struct ScriptedLogic {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLogic {
    /// A model that always answers `text`.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(text.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue one response (success or failure) ahead of the fallback.
    #[must_use]
    pub fn then(self, response: Result<String, TransportError>) -> Self {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(response);
        self
    }

    /// Prompts seen so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock poisoned").clone()
    }
}

#[async_trait]
impl LogicModel for ScriptedLogic {
    async fn generate(&self, cx: &OpContext, req: GenerateRequest) -> Result<String, TransportError> {
        if cx.stop.is_stopped() {
            return Err(TransportError::transient("cancelled"));
        }
        self.prompts
            .lock()
            .expect("prompts lock poisoned")
            .push(req.prompt);
        if let Some(queued) = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .pop_front()
        {
            return queued;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(TransportError::unavailable("no scripted response left")),
        }
    }
}

/// Scripted [`DraftModel`] with the same queue/fallback behavior.
#[derive(Default)]
pub struct ScriptedDraft {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedDraft {
    /// A model that always answers `text`.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(text.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue one response ahead of the fallback.
    #[must_use]
    pub fn then(self, response: Result<String, TransportError>) -> Self {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(response);
        self
    }

    /// Prompts seen so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock poisoned").clone()
    }
}

#[async_trait]
impl DraftModel for ScriptedDraft {
    async fn chat(&self, cx: &OpContext, req: ChatRequest) -> Result<String, TransportError> {
        if cx.stop.is_stopped() {
            return Err(TransportError::transient("cancelled"));
        }
        self.prompts
            .lock()
            .expect("prompts lock poisoned")
            .push(req.prompt);
        if let Some(queued) = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .pop_front()
        {
            return queued;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(TransportError::unavailable("no scripted response left")),
        }
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic [`Embedder`]: derives a unit vector from the SHA-256 of
/// the input text. Equal texts embed identically.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Create an embedder emitting `dim`-dimensional vectors.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
        let mut out = Vec::with_capacity(self.dim);
        for i in 0..self.dim {
            let byte = digest[i % digest.len()];
            // Spread bytes into [-1, 1], perturbed by position so the
            // vector is not periodic in the digest length.
            let v = f32::from(byte) / 127.5 - 1.0;
            out.push(v + (i as f32 * 1e-3));
        }
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, cx: &OpContext, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
        if cx.stop.is_stopped() {
            return Err(TransportError::transient("cancelled"));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn batch_hint(&self) -> usize {
        64
    }
}

// ---------------------------------------------------------------------------
// PlainTextExtractor
// ---------------------------------------------------------------------------

/// [`PdfExtractor`] stand-in that treats the bytes as UTF-8 text with
/// form-feed page breaks.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl PdfExtractor for PlainTextExtractor {
    async fn extract(&self, cx: &OpContext, bytes: &[u8]) -> Result<PdfExtract, TransportError> {
        if cx.stop.is_stopped() {
            return Err(TransportError::transient("cancelled"));
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        let mut pages = Vec::new();
        let mut start = 0usize;
        let mut page_no = 1u32;
        for chunk in text.split('\u{c}') {
            let end = start + chunk.len();
            pages.push(PageSpan {
                page: page_no,
                start,
                end,
            });
            // Skip the form feed itself.
            start = end + 1;
            page_no += 1;
        }
        let markdown = text.replace('\u{c}', "\n");
        Ok(PdfExtract {
            markdown,
            pages,
            images: Vec::new(),
        })
    }
}
