// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP clients for the logic, draft, and embed servers.
//!
//! Every client wraps its calls in the per-host circuit breaker and the
//! bounded retry policy, and classifies failures into
//! [`loom_error::TransportClass`].

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::context::OpContext;
use crate::model::{ChatRequest, DraftModel, EmbedBatch, Embedder, GenerateRequest, LogicModel};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::vector::EMBED_DIM;
use async_trait::async_trait;
use loom_error::TransportError;
use loom_telemetry::TelemetrySink;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Map a reqwest failure to a transport classification.
pub(crate) fn classify_request_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::transient(format!("deadline exceeded: {err}"))
    } else if err.is_connect() {
        TransportError::unavailable(format!("connect failed: {err}"))
    } else {
        TransportError::transient(format!("request failed: {err}"))
    }
}

/// Map an HTTP status to a transport classification.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> TransportError {
    let detail = if body.is_empty() {
        format!("http {status}")
    } else {
        format!("http {status}: {body}")
    };
    match status.as_u16() {
        401 | 403 => TransportError::unauthorized(detail),
        404 => TransportError::not_found(detail),
        503 => TransportError::unavailable(detail),
        408 | 429 => TransportError::transient(detail),
        s if s >= 500 => TransportError::transient(detail),
        _ => TransportError::permanent(detail),
    }
}

/// Shared plumbing for one remote host: reqwest handle, breaker, retry.
#[derive(Debug, Clone)]
struct HostClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    telemetry: Option<TelemetrySink>,
}

impl HostClient {
    fn new(base_url: &str, host: &str, telemetry: Option<TelemetrySink>) -> Self {
        let breaker = match &telemetry {
            Some(sink) => {
                CircuitBreaker::new(host, BreakerConfig::default()).with_telemetry(sink.clone())
            }
            None => CircuitBreaker::new(host, BreakerConfig::default()),
        };
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            host: host.to_string(),
            breaker,
            policy: RetryPolicy::default(),
            telemetry,
        }
    }

    /// POST `body` to `path`, decode a JSON response, with breaker + retry.
    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        cx: &OpContext,
        path: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        let url = format!("{}{path}", self.base_url);
        run_with_retry(&self.policy, cx, &self.host, self.telemetry.as_ref(), || {
            self.checked_post(cx, &url, body)
        })
        .await
    }

    async fn checked_post<B: Serialize, R: DeserializeOwned>(
        &self,
        cx: &OpContext,
        url: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        self.breaker.check()?;
        let result = cx
            .bounded(async {
                let resp = self
                    .http
                    .post(url)
                    .timeout(cx.remaining())
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| classify_request_error(&e))?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(classify_status(status, &text));
                }
                resp.json::<R>()
                    .await
                    .map_err(|e| TransportError::permanent(format!("decode failed: {e}")))
            })
            .await;
        match &result {
            Ok(_) => self.breaker.on_success(),
            Err(err) if err.is_retryable() => self.breaker.on_failure(),
            Err(_) => {}
        }
        result
    }
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct VectorsResponse {
    vectors: Vec<Vec<f32>>,
}

/// Typed client for the logic server's `/generate` endpoint.
#[derive(Debug, Clone)]
pub struct LogicClient {
    inner: HostClient,
}

impl LogicClient {
    /// Create a client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str, telemetry: Option<TelemetrySink>) -> Self {
        Self {
            inner: HostClient::new(base_url, "logic", telemetry),
        }
    }

    /// Probe the server's health endpoint.
    pub async fn ping(&self, cx: &OpContext) -> Result<(), TransportError> {
        ping_host(&self.inner, cx).await
    }
}

#[async_trait]
impl LogicModel for LogicClient {
    async fn generate(&self, cx: &OpContext, req: GenerateRequest) -> Result<String, TransportError> {
        let resp: TextResponse = self.inner.post_json(cx, "/generate", &req).await?;
        Ok(resp.text)
    }

    async fn probe(&self, cx: &OpContext) -> Result<(), TransportError> {
        ping_host(&self.inner, cx).await
    }
}

/// Typed client for the draft server's `/chat` endpoint.
#[derive(Debug, Clone)]
pub struct DraftClient {
    inner: HostClient,
}

impl DraftClient {
    /// Create a client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str, telemetry: Option<TelemetrySink>) -> Self {
        Self {
            inner: HostClient::new(base_url, "draft", telemetry),
        }
    }

    /// Probe the server's health endpoint.
    pub async fn ping(&self, cx: &OpContext) -> Result<(), TransportError> {
        ping_host(&self.inner, cx).await
    }
}

#[async_trait]
impl DraftModel for DraftClient {
    async fn chat(&self, cx: &OpContext, req: ChatRequest) -> Result<String, TransportError> {
        let resp: TextResponse = self.inner.post_json(cx, "/chat", &req).await?;
        Ok(resp.text)
    }

    async fn probe(&self, cx: &OpContext) -> Result<(), TransportError> {
        ping_host(&self.inner, cx).await
    }
}

/// Typed client for the embed server's `/embed` endpoint.
#[derive(Debug, Clone)]
pub struct EmbedClient {
    inner: HostClient,
    batch_hint: usize,
}

impl EmbedClient {
    /// Create a client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str, telemetry: Option<TelemetrySink>) -> Self {
        Self {
            inner: HostClient::new(base_url, "embed", telemetry),
            batch_hint: 32,
        }
    }

    /// Override the preferred batch size.
    #[must_use]
    pub fn with_batch_hint(mut self, hint: usize) -> Self {
        self.batch_hint = hint.max(1);
        self
    }

    /// Probe the server's health endpoint.
    pub async fn ping(&self, cx: &OpContext) -> Result<(), TransportError> {
        ping_host(&self.inner, cx).await
    }
}

#[async_trait]
impl Embedder for EmbedClient {
    async fn embed(&self, cx: &OpContext, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_hint) {
            let batch = EmbedBatch {
                texts: chunk.to_vec(),
            };
            let resp: VectorsResponse = self.inner.post_json(cx, "/embed", &batch).await?;
            if resp.vectors.len() != chunk.len() {
                return Err(TransportError::permanent(format!(
                    "embed returned {} vectors for {} texts",
                    resp.vectors.len(),
                    chunk.len()
                )));
            }
            out.extend(resp.vectors);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }

    fn batch_hint(&self) -> usize {
        self.batch_hint
    }

    async fn probe(&self, cx: &OpContext) -> Result<(), TransportError> {
        ping_host(&self.inner, cx).await
    }
}

async fn ping_host(client: &HostClient, cx: &OpContext) -> Result<(), TransportError> {
    let url = format!("{}/health", client.base_url);
    cx.bounded(async {
        let resp = client
            .http
            .get(&url)
            .timeout(cx.remaining())
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_status(status, ""))
        }
    })
    .await
}
