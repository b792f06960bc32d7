// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph-store trait and HTTP implementation.
//!
//! The orchestrator consumes a document/edge interface: named collections
//! of JSON documents plus predicate-labelled edges between them. The
//! concrete store is an external collaborator behind this trait.

use crate::context::OpContext;
use crate::http::{classify_request_error, classify_status};
use async_trait::async_trait;
use loom_error::TransportError;
use serde_json::Value;

/// Collection names used by the orchestrator.
pub mod collections {
    /// Project documents.
    pub const PROJECTS: &str = "projects";
    /// Ingestion progress records.
    pub const INGESTIONS: &str = "ingestions";
    /// Point-in-time job snapshots.
    pub const JOBS: &str = "jobs";
    /// Claim documents keyed by claim hash.
    pub const CLAIMS: &str = "claims";
    /// Conflict edges between claim documents.
    pub const CLAIM_EDGES: &str = "claim_edges";
    /// Drafted manuscript blocks.
    pub const MANUSCRIPT_BLOCKS: &str = "manuscript_blocks";
    /// Artifact manifests, indexed per job and per project.
    pub const ARTIFACT_MANIFESTS: &str = "artifact_manifests";
    /// Vector-collection metadata (embedding dimension).
    pub const VECTOR_META: &str = "vector_meta";
}

/// A document/edge store with named collections.
///
/// Every operation takes an [`OpContext`] carrying the caller's deadline
/// and stop signal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or replace a document.
    async fn put_doc(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
        doc: Value,
    ) -> Result<(), TransportError>;

    /// Fetch a document, `None` when absent.
    async fn get_doc(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, TransportError>;

    /// Delete a document; returns `true` when one existed.
    async fn delete_doc(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
    ) -> Result<bool, TransportError>;

    /// List all documents in a collection.
    async fn list_docs(&self, cx: &OpContext, collection: &str) -> Result<Vec<Value>, TransportError>;

    /// Insert or replace a labelled edge between two documents.
    async fn put_edge(
        &self,
        cx: &OpContext,
        collection: &str,
        from: &str,
        to: &str,
        payload: Value,
    ) -> Result<(), TransportError>;

    /// Cheap liveness probe.
    async fn ping(&self, cx: &OpContext) -> Result<(), TransportError>;
}

/// HTTP implementation of [`GraphStore`].
#[derive(Debug, Clone)]
pub struct HttpGraphStore {
    http: reqwest::Client,
    base_url: String,
    password: Option<String>,
}

impl HttpGraphStore {
    /// Create a store client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str, password: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            password,
        }
    }

    fn request(&self, method: reqwest::Method, url: String, cx: &OpContext) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url).timeout(cx.remaining());
        match &self.password {
            Some(pw) => req.basic_auth("loom", Some(pw)),
            None => req,
        }
    }

    async fn send(
        &self,
        cx: &OpContext,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        cx.bounded(async {
            let resp = req.send().await.map_err(|e| classify_request_error(&e))?;
            let status = resp.status();
            if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
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
impl GraphStore for HttpGraphStore {
    async fn put_doc(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
        doc: Value,
    ) -> Result<(), TransportError> {
        let url = format!("{}/collections/{collection}/docs/{id}", self.base_url);
        let resp = self
            .send(cx, self.request(reqwest::Method::PUT, url, cx).json(&doc))
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::not_found(format!(
                "collection {collection} missing"
            )));
        }
        Ok(())
    }

    async fn get_doc(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, TransportError> {
        let url = format!("{}/collections/{collection}/docs/{id}", self.base_url);
        let resp = self.send(cx, self.request(reqwest::Method::GET, url, cx)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = resp
            .json::<Value>()
            .await
            .map_err(|e| TransportError::permanent(format!("decode failed: {e}")))?;
        Ok(Some(doc))
    }

    async fn delete_doc(
        &self,
        cx: &OpContext,
        collection: &str,
        id: &str,
    ) -> Result<bool, TransportError> {
        let url = format!("{}/collections/{collection}/docs/{id}", self.base_url);
        let resp = self
            .send(cx, self.request(reqwest::Method::DELETE, url, cx))
            .await?;
        Ok(resp.status() != reqwest::StatusCode::NOT_FOUND)
    }

    async fn list_docs(&self, cx: &OpContext, collection: &str) -> Result<Vec<Value>, TransportError> {
        let url = format!("{}/collections/{collection}/docs", self.base_url);
        let resp = self.send(cx, self.request(reqwest::Method::GET, url, cx)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| TransportError::permanent(format!("decode failed: {e}")))
    }

    async fn put_edge(
        &self,
        cx: &OpContext,
        collection: &str,
        from: &str,
        to: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}/collections/{collection}/edges/{from}/{to}",
            self.base_url
        );
        self.send(cx, self.request(reqwest::Method::PUT, url, cx).json(&payload))
            .await?;
        Ok(())
    }

    async fn ping(&self, cx: &OpContext) -> Result<(), TransportError> {
        let url = format!("{}/health", self.base_url);
        self.send(cx, self.request(reqwest::Method::GET, url, cx)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cx() -> OpContext {
        OpContext::with_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn get_doc_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/projects/docs/p1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpGraphStore::new(&server.uri(), None);
        let doc = store.get_doc(&cx(), collections::PROJECTS, "p1").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/jobs/docs/j1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/collections/jobs/docs/j1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "PENDING"})),
            )
            .mount(&server)
            .await;

        let store = HttpGraphStore::new(&server.uri(), None);
        store
            .put_doc(
                &cx(),
                collections::JOBS,
                "j1",
                serde_json::json!({"status": "PENDING"}),
            )
            .await
            .unwrap();
        let doc = store
            .get_doc(&cx(), collections::JOBS, "j1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["status"], "PENDING");
    }

    #[tokio::test]
    async fn server_error_classifies_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/claims/docs"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = HttpGraphStore::new(&server.uri(), None);
        let err = store.list_docs(&cx(), collections::CLAIMS).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_host_is_remote_unavailable() {
        // Port 1 is never listening.
        let store = HttpGraphStore::new("http://127.0.0.1:1", None);
        let err = store.ping(&cx()).await.unwrap_err();
        assert_eq!(err.class, loom_error::TransportClass::RemoteUnavailable);
    }
}
