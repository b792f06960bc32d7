// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-transport
//!
//! Typed clients for every outbound dependency of the orchestrator:
//! logic-server, draft-server, embed-server, graph store, and vector store.
//!
//! Responsibilities:
//! - classify failures ([`loom_error::TransportClass`]) and retry only
//!   transient/unavailable ones with bounded exponential backoff
//! - keep a per-host circuit breaker in front of every HTTP client
//! - enforce the logic-server schema contract (parse failure is permanent)
//! - expose [`GraphStore`] / [`VectorStore`] traits with HTTP and in-memory
//!   implementations so tests can substitute stand-ins

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-host circuit breaker.
pub mod breaker;
/// Job stop signalling shared by transport calls and the stage runtime.
pub mod cancel;
/// Deadline/cancellation context carried by every outbound call.
pub mod context;
/// Graph-store trait and HTTP implementation.
pub mod graph;
/// HTTP clients for the logic, draft, and embed servers.
pub mod http;
/// In-memory stand-ins for tests and local runs.
pub mod memory;
/// Model-server traits, request/response types, and schema parsing.
pub mod model;
/// Bounded-exponential retry with jitter.
pub mod retry;
/// Vector-store trait, HTTP implementation, and the dimension guard.
pub mod vector;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use cancel::{CancellationReason, StopSignal};
pub use context::OpContext;
pub use graph::{GraphStore, HttpGraphStore, collections};
pub use http::{DraftClient, EmbedClient, LogicClient};
pub use loom_error::{TransportClass, TransportError};
pub use memory::{
    HashEmbedder, MemoryGraphStore, MemoryVectorStore, PlainTextExtractor, ScriptedDraft,
    ScriptedLogic,
};
pub use model::{
    ChatRequest, DraftModel, EmbedBatch, Embedder, GenerateRequest, LogicModel, PageSpan,
    PdfExtract, PdfExtractor, SamplingParams, parse_schema,
};
pub use retry::{RetryPolicy, WithRetry, run_with_retry};
pub use vector::{EMBED_DIM, HttpVectorStore, VectorIndex, VectorMatch, VectorStore};
