// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded-exponential retry with jitter.
//!
//! Only [`Transient`](loom_error::TransportClass::Transient) and
//! [`RemoteUnavailable`](loom_error::TransportClass::RemoteUnavailable)
//! failures are retried; everything else surfaces on the first attempt.

use crate::context::OpContext;
use crate::model::{ChatRequest, DraftModel, Embedder, GenerateRequest, LogicModel};
use async_trait::async_trait;
use loom_error::TransportError;
use loom_telemetry::{TRANSPORT_RETRY, TelemetrySink};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded-exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per retry.
    pub factor: u32,
    /// Jitter fraction applied to each delay (0.2 = ±20 %).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(200),
            factor: 2,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Nominal delay before retry `attempt` (1-indexed), before jitter.
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(self.factor.saturating_pow(pow))
    }

    /// Delay before retry `attempt` with jitter applied.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        use rand::Rng;
        let factor = 1.0 - self.jitter + rand::thread_rng().r#gen::<f64>() * 2.0 * self.jitter;
        Duration::from_millis((nominal.as_millis() as f64 * factor).round() as u64)
    }
}

/// Run `op` under the policy, retrying retryable failures until the attempt
/// budget or the context deadline runs out.
///
/// # Errors
///
/// Returns the final [`TransportError`] once retries are exhausted, the
/// failure is non-retryable, or the context expires.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cx: &OpContext,
    host: &str,
    telemetry: Option<&TelemetrySink>,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cx.stop.is_stopped() {
            return Err(TransportError::transient("cancelled"));
        }
        match op().await {
            Ok(out) => return Ok(out),
            Err(err) => {
                attempt += 1;
                if !err.is_retryable() || attempt > policy.max_retries || cx.expired() {
                    return Err(err);
                }
                let delay = policy.delay(attempt);
                debug!(
                    target: "loom.transport",
                    host,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    class = %err.class,
                    "retrying after failure"
                );
                if let Some(sink) = telemetry {
                    sink.record(
                        TRANSPORT_RETRY,
                        [
                            ("host", json!(host)),
                            ("attempt", json!(attempt)),
                            ("class", json!(err.class)),
                        ],
                    );
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cx.stop.stopped() => {
                        return Err(TransportError::transient("cancelled"));
                    }
                }
            }
        }
    }
}

/// Wraps any model client with a [`RetryPolicy`].
///
/// Lets tests compose scripted stand-ins with production retry behavior,
/// and keeps the retry concern out of individual client implementations.
pub struct WithRetry<T> {
    inner: T,
    policy: RetryPolicy,
    host: String,
    telemetry: Option<TelemetrySink>,
}

impl<T> WithRetry<T> {
    /// Wrap `inner`, labelling retries with `host` for telemetry.
    pub fn new(inner: T, policy: RetryPolicy, host: impl Into<String>) -> Self {
        Self {
            inner,
            policy,
            host: host.into(),
            telemetry: None,
        }
    }

    /// Attach a telemetry sink that records each retry.
    #[must_use]
    pub fn with_telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }
}

#[async_trait]
impl<T: LogicModel> LogicModel for WithRetry<T> {
    async fn generate(&self, cx: &OpContext, req: GenerateRequest) -> Result<String, TransportError> {
        run_with_retry(&self.policy, cx, &self.host, self.telemetry.as_ref(), || {
            self.inner.generate(cx, req.clone())
        })
        .await
    }
}

#[async_trait]
impl<T: DraftModel> DraftModel for WithRetry<T> {
    async fn chat(&self, cx: &OpContext, req: ChatRequest) -> Result<String, TransportError> {
        run_with_retry(&self.policy, cx, &self.host, self.telemetry.as_ref(), || {
            self.inner.chat(cx, req.clone())
        })
        .await
    }
}

#[async_trait]
impl<T: Embedder> Embedder for WithRetry<T> {
    async fn embed(&self, cx: &OpContext, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError> {
        run_with_retry(&self.policy, cx, &self.host, self.telemetry.as_ref(), || {
            self.inner.embed(cx, texts)
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn batch_hint(&self) -> usize {
        self.inner.batch_hint()
    }
}
