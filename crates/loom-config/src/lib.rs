// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment configuration for the Manuscript Loom daemon.
//!
//! All settings come from `LOOM_*` environment variables. A missing required
//! variable is a [`ConfigError::MissingVar`]; the daemon maps configuration
//! failures to [`EXIT_MISCONFIGURED`] and startup-probe failures to
//! [`EXIT_UPSTREAM_UNAVAILABLE`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use loom_core::RigorLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Process exit code for a missing or invalid environment variable.
pub const EXIT_MISCONFIGURED: i32 = 64;

/// Process exit code for an unreachable upstream service at startup.
pub const EXIT_UPSTREAM_UNAVAILABLE: i32 = 69;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {name}")]
    MissingVar {
        /// Variable name.
        name: String,
    },

    /// A variable was present but could not be parsed.
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name.
        name: String,
        /// Parse failure detail.
        reason: String,
    },
}

/// Top-level runtime configuration for the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoomConfig {
    /// HTTP bind address.
    pub bind: String,
    /// logic-server base URL.
    pub logic_url: String,
    /// draft-server base URL.
    pub draft_url: String,
    /// embed-server base URL.
    pub embed_url: String,
    /// graph-store base URL.
    pub graph_url: String,
    /// graph-store credential, when the store requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_password: Option<String>,
    /// vector-store base URL.
    pub vector_url: String,
    /// Worker-pool size.
    pub workers: usize,
    /// Submission-queue capacity.
    pub queue_capacity: usize,
    /// Overall per-job deadline.
    pub job_deadline: Duration,
    /// Filesystem artifact root.
    pub artifact_root: PathBuf,
    /// Default rigor level for projects created without one.
    pub default_rigor: RigorLevel,
}

impl LoomConfig {
    /// Default worker count: `min(4, cores)`.
    #[must_use]
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(4)
    }

    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    /// Load configuration from an explicit variable map (testable form).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// value fails to parse.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |name: &str| -> Result<String, ConfigError> {
            vars.get(name)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::MissingVar { name: name.into() })
        };
        let parsed = |name: &str, default: u64| -> Result<u64, ConfigError> {
            match vars.get(name) {
                None => Ok(default),
                Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidVar {
                    name: name.into(),
                    reason: format!("{e}"),
                }),
            }
        };

        let default_rigor = match vars.get("LOOM_DEFAULT_RIGOR").map(String::as_str) {
            None | Some("exploratory") => RigorLevel::Exploratory,
            Some("conservative") => RigorLevel::Conservative,
            Some(other) => {
                return Err(ConfigError::InvalidVar {
                    name: "LOOM_DEFAULT_RIGOR".into(),
                    reason: format!("unknown rigor level {other:?}"),
                });
            }
        };

        Ok(Self {
            bind: vars
                .get("LOOM_BIND")
                .cloned()
                .unwrap_or_else(|| "127.0.0.1:8484".into()),
            logic_url: required("LOOM_LOGIC_URL")?,
            draft_url: required("LOOM_DRAFT_URL")?,
            embed_url: required("LOOM_EMBED_URL")?,
            graph_url: required("LOOM_GRAPH_URL")?,
            graph_password: vars.get("LOOM_GRAPH_PASSWORD").cloned(),
            vector_url: required("LOOM_VECTOR_URL")?,
            workers: parsed("LOOM_WORKERS", Self::default_workers() as u64)? as usize,
            queue_capacity: parsed("LOOM_QUEUE_CAPACITY", 256)? as usize,
            job_deadline: Duration::from_secs(parsed("LOOM_JOB_DEADLINE_SECS", 1800)?),
            artifact_root: PathBuf::from(
                vars.get("LOOM_ARTIFACT_ROOT")
                    .cloned()
                    .unwrap_or_else(|| ".manuscript-loom/artifacts".into()),
            ),
            default_rigor,
        })
    }
}
