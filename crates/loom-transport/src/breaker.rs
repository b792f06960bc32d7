// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-host circuit breaker.
//!
//! The breaker opens after a run of consecutive failures inside a rolling
//! window, rejects calls while open, and half-opens after a cooldown so a
//! single probe can close it again.

use loom_error::TransportError;
use loom_telemetry::{BREAKER_OPEN, TelemetrySink};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Thresholds controlling breaker behavior.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Rolling window the failures must fall inside.
    pub window: Duration,
    /// How long the breaker stays open before half-opening.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { failures: u32, window_start: Instant },
    Open { since: Instant },
    HalfOpen,
}

/// A per-host open/half-open/closed breaker guarding outbound calls.
///
/// Clones share state; keep one breaker per host.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    host: String,
    config: BreakerConfig,
    state: Arc<Mutex<State>>,
    telemetry: Option<TelemetrySink>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `host`.
    #[must_use]
    pub fn new(host: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            state: Arc::new(Mutex::new(State::Closed {
                failures: 0,
                window_start: Instant::now(),
            })),
            telemetry: None,
        }
    }

    /// Attach a telemetry sink that records breaker trips.
    #[must_use]
    pub fn with_telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Check whether a call may proceed.
    ///
    /// # Errors
    ///
    /// Returns a `RemoteUnavailable` error while the breaker is open.
    pub fn check(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        match *state {
            State::Closed { .. } | State::HalfOpen => Ok(()),
            State::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    *state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(TransportError::unavailable(format!(
                        "circuit open for {}",
                        self.host
                    )))
                }
            }
        }
    }

    /// Record a successful call, closing the breaker.
    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        *state = State::Closed {
            failures: 0,
            window_start: Instant::now(),
        };
    }

    /// Record a failed call, opening the breaker when the threshold is hit.
    pub fn on_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        let failures = match *state {
            State::Closed {
                failures,
                window_start,
            } if now.duration_since(window_start) < self.config.window => failures + 1,
            State::Closed { .. } => 1,
            // A half-open probe failed: reopen immediately.
            State::HalfOpen => self.config.failure_threshold,
            State::Open { .. } => return,
        };
        if failures >= self.config.failure_threshold {
            warn!(target: "loom.transport", host = %self.host, "circuit breaker opened");
            if let Some(sink) = &self.telemetry {
                sink.record(BREAKER_OPEN, [("host", json!(self.host))]);
            }
            *state = State::Open { since: now };
        } else {
            let window_start = match *state {
                State::Closed { window_start, .. } if failures > 1 => window_start,
                _ => now,
            };
            *state = State::Closed {
                failures,
                window_start,
            };
        }
    }

    /// Returns `true` while the breaker rejects calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(
            *self.state.lock().expect("breaker lock poisoned"),
            State::Open { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            window: Duration::from_secs(30),
            cooldown: Duration::from_millis(10),
        }
    }

    #[test]
    fn closed_breaker_allows_calls() {
        let b = CircuitBreaker::new("logic", BreakerConfig::default());
        assert!(b.check().is_ok());
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let b = CircuitBreaker::new("logic", BreakerConfig::default());
        for _ in 0..4 {
            b.on_failure();
            assert!(b.check().is_ok());
        }
        b.on_failure();
        assert!(b.is_open());
        let err = b.check().unwrap_err();
        assert!(err.message.contains("circuit open"), "{err}");
    }

    #[test]
    fn success_resets_the_failure_run() {
        let b = CircuitBreaker::new("logic", BreakerConfig::default());
        for _ in 0..4 {
            b.on_failure();
        }
        b.on_success();
        b.on_failure();
        assert!(!b.is_open());
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_success() {
        let b = CircuitBreaker::new("logic", fast_config());
        for _ in 0..5 {
            b.on_failure();
        }
        assert!(b.check().is_err());
        std::thread::sleep(Duration::from_millis(15));
        // Cooldown elapsed: a probe call is allowed.
        assert!(b.check().is_ok());
        b.on_success();
        assert!(b.check().is_ok());
        assert!(!b.is_open());
    }

    #[test]
    fn failed_half_open_probe_reopens() {
        let b = CircuitBreaker::new("logic", fast_config());
        for _ in 0..5 {
            b.on_failure();
        }
        std::thread::sleep(Duration::from_millis(15));
        assert!(b.check().is_ok());
        b.on_failure();
        assert!(b.is_open());
    }

    #[test]
    fn trip_records_telemetry() {
        let sink = TelemetrySink::new();
        let b = CircuitBreaker::new("draft", BreakerConfig::default()).with_telemetry(sink.clone());
        for _ in 0..5 {
            b.on_failure();
        }
        assert_eq!(sink.count(BREAKER_OPEN), 1);
    }
}
