// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vector-store trait, HTTP implementation, and the dimension guard.
//!
//! The claim-embedding collection uses cosine distance at a fixed
//! dimension. The dimension is model-dependent, so [`VectorIndex`] records
//! it in a metadata document and rejects mismatched upserts before they
//! reach the store.

use crate::context::OpContext;
use crate::graph::{GraphStore, collections};
use crate::http::{classify_request_error, classify_status};
use async_trait::async_trait;
use loom_error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Embedding dimension of the production embed server, reported by
/// [`EmbedClient::dimension`](crate::http::EmbedClient) and recorded in
/// the claim collection's metadata document.
pub const EMBED_DIM: usize = 384;

/// One result of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Point identifier (claim key).
    pub id: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
    /// Payload stored alongside the vector.
    pub payload: Value,
}

/// A vector store with named collections and cosine similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a point.
    async fn upsert(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Value,
    ) -> Result<(), TransportError>;

    /// Return the `top_k` nearest neighbours of `vector`.
    async fn query(
        &self,
        cx: &OpContext,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, TransportError>;

    /// Cheap liveness probe.
    async fn ping(&self, cx: &OpContext) -> Result<(), TransportError>;
}

/// HTTP implementation of [`VectorStore`].
#[derive(Debug, Clone)]
pub struct HttpVectorStore {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    vector: &'a [f32],
    payload: &'a Value,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    vector: &'a [f32],
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    matches: Vec<VectorMatch>,
}

impl HttpVectorStore {
    /// Create a store client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send(
        &self,
        cx: &OpContext,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        cx.bounded(async {
            let resp = req
                .timeout(cx.remaining())
                .send()
                .await
                .map_err(|e| classify_request_error(&e))?;
            let status = resp.status();
            if status.is_success() {
                Ok(resp)
            } else {
                let text = resp.text().await.unwrap_or_default();
                Err(classify_status(status, &text))
            }
        })
        .await
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Value,
    ) -> Result<(), TransportError> {
        let url = format!("{}/collections/{collection}/points/{id}", self.base_url);
        let body = UpsertBody {
            vector: &vector,
            payload: &payload,
        };
        self.send(cx, self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn query(
        &self,
        cx: &OpContext,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, TransportError> {
        let url = format!("{}/collections/{collection}/query", self.base_url);
        let body = QueryBody { vector, top_k };
        let resp = self.send(cx, self.http.post(url).json(&body)).await?;
        let out: QueryResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::permanent(format!("decode failed: {e}")))?;
        Ok(out.matches)
    }

    async fn ping(&self, cx: &OpContext) -> Result<(), TransportError> {
        let url = format!("{}/health", self.base_url);
        self.send(cx, self.http.get(url)).await?;
        Ok(())
    }
}

/// Dimension-guarded view of one vector collection.
///
/// On creation the index records the collection's dimension in the graph
/// store's metadata collection; upserts with a different dimension are
/// rejected client-side as permanent failures.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    collection: String,
    dim: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("collection", &self.collection)
            .field("dim", &self.dim)
            .finish()
    }
}

impl VectorIndex {
    /// Open the index, recording (or checking) the dimension metadata.
    ///
    /// # Errors
    ///
    /// Returns a permanent error when the recorded dimension differs from
    /// `dim`, or a transport error when the metadata document cannot be
    /// read or written.
    pub async fn open(
        cx: &OpContext,
        store: Arc<dyn VectorStore>,
        graph: &dyn GraphStore,
        collection: &str,
        dim: usize,
    ) -> Result<Self, TransportError> {
        match graph.get_doc(cx, collections::VECTOR_META, collection).await? {
            Some(meta) => {
                let recorded = meta.get("dim").and_then(Value::as_u64).unwrap_or(0) as usize;
                if recorded != dim {
                    return Err(TransportError::permanent(format!(
                        "dimension mismatch for {collection}: recorded {recorded}, requested {dim}"
                    )));
                }
            }
            None => {
                graph
                    .put_doc(
                        cx,
                        collections::VECTOR_META,
                        collection,
                        json!({"collection": collection, "dim": dim, "metric": "cosine"}),
                    )
                    .await?;
            }
        }
        Ok(Self {
            store,
            collection: collection.to_string(),
            dim,
        })
    }

    /// The guarded dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Upsert a point after checking its dimension.
    ///
    /// # Errors
    ///
    /// Returns a permanent `dimension mismatch` error for wrong-sized
    /// vectors, or the underlying store error.
    pub async fn upsert(
        &self,
        cx: &OpContext,
        id: &str,
        vector: Vec<f32>,
        payload: Value,
    ) -> Result<(), TransportError> {
        if vector.len() != self.dim {
            return Err(TransportError::permanent(format!(
                "dimension mismatch: got {}, collection holds {}",
                vector.len(),
                self.dim
            )));
        }
        self.store
            .upsert(cx, &self.collection, id, vector, payload)
            .await
    }

    /// Nearest-neighbour query against the guarded collection.
    pub async fn query(
        &self,
        cx: &OpContext,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, TransportError> {
        self.store.query(cx, &self.collection, vector, top_k).await
    }
}
