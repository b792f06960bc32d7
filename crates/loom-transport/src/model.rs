// SPDX-License-Identifier: MIT OR Apache-2.0
//! Model-server traits, request/response types, and schema parsing.
//!
//! The logic, draft, and embed servers speak a JSON-in/JSON-out HTTP
//! contract. Stages program against these traits; production wiring uses
//! the HTTP clients in [`crate::http`], tests use the stand-ins in
//! [`crate::memory`].

use crate::context::OpContext;
use async_trait::async_trait;
use loom_error::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Sampling parameters forwarded to a model server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// Request for the logic server's constrained generation endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The prompt text.
    pub prompt: String,
    /// Regex constraint the server applies during decoding, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_regex: Option<String>,
    /// Sampling parameters.
    #[serde(default)]
    pub sampling: SamplingParams,
}

/// Request for the draft server's chat endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Optional system framing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Sampling parameters.
    #[serde(default)]
    pub sampling: SamplingParams,
}

/// A batch of texts for the embed server, with the client's batch hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedBatch {
    /// Texts to embed.
    pub texts: Vec<String>,
}

/// The logic server: constrained structured generation.
#[async_trait]
pub trait LogicModel: Send + Sync {
    /// Generate text for `req`, honoring the context deadline and stop signal.
    async fn generate(&self, cx: &OpContext, req: GenerateRequest) -> Result<String, TransportError>;

    /// Liveness probe; in-process stand-ins are always up.
    async fn probe(&self, _cx: &OpContext) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The draft server: free-form prose generation.
#[async_trait]
pub trait DraftModel: Send + Sync {
    /// Generate prose for `req`, honoring the context deadline and stop signal.
    async fn chat(&self, cx: &OpContext, req: ChatRequest) -> Result<String, TransportError>;

    /// Liveness probe; in-process stand-ins are always up.
    async fn probe(&self, _cx: &OpContext) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The embed server: text to vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, one vector per input, in order.
    async fn embed(&self, cx: &OpContext, texts: &[String]) -> Result<Vec<Vec<f32>>, TransportError>;

    /// Dimension of every vector this embedder emits.
    ///
    /// The claim index is opened at this dimension; the dimension guard
    /// rejects any vector that disagrees.
    fn dimension(&self) -> usize;

    /// Preferred batch size for callers that chunk their input.
    fn batch_hint(&self) -> usize {
        32
    }

    /// Liveness probe; in-process stand-ins are always up.
    async fn probe(&self, _cx: &OpContext) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Byte span of one page inside the extracted markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    /// 1-based page number.
    pub page: u32,
    /// Inclusive start offset into the markdown.
    pub start: usize,
    /// Exclusive end offset into the markdown.
    pub end: usize,
}

/// Output of the external PDF extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfExtract {
    /// Document text as markdown.
    pub markdown: String,
    /// Page map over the markdown.
    pub pages: Vec<PageSpan>,
    /// Extracted image references.
    pub images: Vec<String>,
}

/// The external PDF-to-text extractor.
///
/// Extraction is preview-only; images are not promised to stay addressable,
/// downstream stages may re-derive what they need.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    /// Convert raw document bytes into markdown, a page map, and images.
    async fn extract(&self, cx: &OpContext, bytes: &[u8]) -> Result<PdfExtract, TransportError>;
}

/// Parse constrained-generation output into the caller's schema.
///
/// The logic server is asked to emit text matching a schema regex; this
/// enforces the contract on the client side. A parse failure is
/// `PermanentInvalid` with message `invalid_schema` and is never retried.
///
/// # Errors
///
/// Returns a permanent `invalid_schema` error when `text` does not parse
/// into `T`, directly or after trimming to the outermost JSON object.
pub fn parse_schema<T: DeserializeOwned>(text: &str) -> Result<T, TransportError> {
    if let Ok(parsed) = serde_json::from_str::<T>(text) {
        return Ok(parsed);
    }
    // Constrained decoding occasionally wraps the object in prose; accept
    // the outermost braced span before giving up.
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<T>(&text[start..=end]) {
                return Ok(parsed);
            }
        }
    }
    Err(TransportError::permanent("invalid_schema"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        supported: bool,
        confidence: f64,
    }

    #[test]
    fn parse_schema_accepts_clean_json() {
        let v: Verdict = parse_schema(r#"{"supported": true, "confidence": 0.9}"#).unwrap();
        assert!(v.supported);
    }

    #[test]
    fn parse_schema_trims_surrounding_prose() {
        let v: Verdict =
            parse_schema(r#"Sure: {"supported": false, "confidence": 0.3} — done."#).unwrap();
        assert!(!v.supported);
    }

    #[test]
    fn parse_schema_failure_is_permanent_invalid_schema() {
        let err = parse_schema::<Verdict>("not json at all").unwrap_err();
        assert_eq!(err.message, "invalid_schema");
        assert!(!err.is_retryable());
    }

    #[test]
    fn sampling_defaults_are_stable() {
        let s = SamplingParams::default();
        assert_eq!(s.max_tokens, 1024);
    }

    #[test]
    fn generate_request_omits_absent_regex() {
        let req = GenerateRequest {
            prompt: "p".into(),
            ..GenerateRequest::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("schema_regex").is_none());
    }
}
