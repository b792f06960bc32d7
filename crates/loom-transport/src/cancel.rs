// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job stop signalling.
//!
//! A [`StopSignal`] tells every outbound call and stage of a job to wind
//! down, and records *why*: the first [`CancellationReason`] to arrive
//! wins and later triggers are ignored. Built on a `watch` channel so any
//! number of holders can await the signal without polling.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Why a job was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The client explicitly requested cancellation.
    ClientRequested,
    /// The overall job deadline expired.
    Deadline,
    /// The host process is shutting down.
    Shutdown,
}

impl CancellationReason {
    /// Human-readable description of the reason.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ClientRequested => "cancelled by client request",
            Self::Deadline => "cancelled because the job deadline expired",
            Self::Shutdown => "cancelled because the orchestrator is shutting down",
        }
    }
}

/// A shared stop flag for one job.
///
/// Clones observe the same state. Triggering is first-wins: the reason of
/// the earliest [`trigger`](Self::trigger) call is kept and every later
/// call is a no-op, so a deadline racing a client cancel settles on one
/// answer.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<Option<CancellationReason>>>,
    rx: watch::Receiver<Option<CancellationReason>>,
}

impl StopSignal {
    /// A signal that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trigger the signal with a reason.
    ///
    /// Returns `true` when this call stopped the job, `false` when an
    /// earlier reason already won.
    pub fn trigger(&self, reason: CancellationReason) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        })
    }

    /// Whether the signal has been triggered.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The recorded reason, once triggered.
    #[must_use]
    pub fn reason(&self) -> Option<CancellationReason> {
        *self.rx.borrow()
    }

    /// Wait until the signal is triggered, returning the winning reason.
    ///
    /// Resolves immediately when already triggered. Suspension points in
    /// stages and transport calls race this against their own work.
    pub async fn stopped(&self) -> CancellationReason {
        let mut rx = self.rx.clone();
        // The sender lives in self, so wait_for cannot observe a closed
        // channel; fall back to Shutdown if it somehow does.
        match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => (*slot).unwrap_or(CancellationReason::Shutdown),
            Err(_) => CancellationReason::Shutdown,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
