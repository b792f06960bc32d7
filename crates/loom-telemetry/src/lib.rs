// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-telemetry
//!
//! Structured telemetry events and counters for the orchestrator.
//!
//! Failures that are demoted rather than surfaced (the saver's best-effort
//! manifest persistence), transport retries, and circuit-breaker trips all
//! land here so operators can observe them without the job failing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Event name recorded when saver manifest persistence fails.
pub const ARTIFACT_MANIFEST_FAILED: &str = "artifact_manifest_failed";

/// Event name recorded for each transport retry.
pub const TRANSPORT_RETRY: &str = "transport_retry";

/// Event name recorded when a circuit breaker opens.
pub const BREAKER_OPEN: &str = "breaker_open";

/// Event name recorded at each stage boundary with its duration.
pub const STAGE_COMPLETED: &str = "stage_completed";

/// A single telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Event name (one of the constants above, or ad hoc).
    pub name: String,
    /// Structured attributes (deterministic ordering).
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
}

/// Thread-safe telemetry collector.
///
/// Clones share the same underlying buffer; hand one to every component
/// that may need to record an event.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySink {
    inner: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl TelemetrySink {
    /// Create a new, empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event with the given attributes.
    ///
    /// Attributes that fail to serialize are silently skipped.
    pub fn record<I, K, V>(&self, name: &str, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let mut attrs = BTreeMap::new();
        for (k, v) in attributes {
            if let Ok(v) = serde_json::to_value(v) {
                attrs.insert(k.into(), v);
            }
        }
        warn!(target: "loom.telemetry", event = name, attributes = ?attrs, "telemetry event");
        let mut buf = self.inner.lock().expect("telemetry lock poisoned");
        buf.push(TelemetryEvent {
            name: name.to_string(),
            attributes: attrs,
            at: Utc::now(),
        });
    }

    /// Return all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.inner.lock().expect("telemetry lock poisoned").clone()
    }

    /// Count events with the given name.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .expect("telemetry lock poisoned")
            .iter()
            .filter(|e| e.name == name)
            .count()
    }

    /// Per-name event counts, for the health summary.
    #[must_use]
    pub fn counters(&self) -> BTreeMap<String, usize> {
        let buf = self.inner.lock().expect("telemetry lock poisoned");
        let mut out = BTreeMap::new();
        for ev in buf.iter() {
            *out.entry(ev.name.clone()).or_insert(0) += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_count() {
        let sink = TelemetrySink::new();
        sink.record(ARTIFACT_MANIFEST_FAILED, [("job_id", "j1")]);
        sink.record(TRANSPORT_RETRY, [("host", "logic")]);
        sink.record(TRANSPORT_RETRY, [("host", "draft")]);
        assert_eq!(sink.count(ARTIFACT_MANIFEST_FAILED), 1);
        assert_eq!(sink.count(TRANSPORT_RETRY), 2);
        assert_eq!(sink.count("unknown"), 0);
    }

    #[test]
    fn clones_share_the_buffer() {
        let sink = TelemetrySink::new();
        let clone = sink.clone();
        clone.record(BREAKER_OPEN, [("host", "embed")]);
        assert_eq!(sink.count(BREAKER_OPEN), 1);
    }

    #[test]
    fn counters_aggregate_by_name() {
        let sink = TelemetrySink::new();
        sink.record(STAGE_COMPLETED, [("stage", "cartographer")]);
        sink.record(STAGE_COMPLETED, [("stage", "verifier")]);
        let counters = sink.counters();
        assert_eq!(counters.get(STAGE_COMPLETED), Some(&2));
    }

    #[test]
    fn attributes_are_structured() {
        let sink = TelemetrySink::new();
        sink.record("custom", [("attempt", 2u32)]);
        let events = sink.events();
        assert_eq!(events[0].attributes["attempt"], serde_json::json!(2));
    }
}
