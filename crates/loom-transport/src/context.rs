// SPDX-License-Identifier: MIT OR Apache-2.0
//! The deadline/cancellation context carried by every outbound call.

use crate::cancel::StopSignal;
use loom_error::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Context for one outbound operation: an absolute deadline plus the
/// owning job's stop signal, observed at every suspension point.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Absolute deadline for the operation.
    pub deadline: Instant,
    /// Stop signal shared with the owning job.
    pub stop: StopSignal,
}

impl OpContext {
    /// Context expiring `timeout` from now with a fresh signal.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            stop: StopSignal::new(),
        }
    }

    /// Context with an explicit deadline and signal.
    #[must_use]
    pub fn new(deadline: Instant, stop: StopSignal) -> Self {
        Self { deadline, stop }
    }

    /// Time left before the deadline (zero when expired).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Drive `fut` to completion, aborting on deadline expiry or the stop
    /// signal.
    ///
    /// # Errors
    ///
    /// Returns a transient `"deadline exceeded"` error when the deadline
    /// passes first, or a transient `"cancelled"` error when the signal
    /// fires.
    pub async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        if self.stop.is_stopped() {
            return Err(TransportError::transient("cancelled"));
        }
        tokio::select! {
            res = fut => res,
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(TransportError::transient("deadline exceeded"))
            }
            _ = self.stop.stopped() => Err(TransportError::transient("cancelled")),
        }
    }
}
