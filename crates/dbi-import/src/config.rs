//! Configuration for an import run
//!
//! Supplied once at startup (environment variables, then CLI flags on top)
//! and read-only for the life of the run.

use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default payloads per submission request. The tracker endpoint gets
/// expensive with large bodies; bulk endpoints can take more.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default bound on concurrently in-flight batch submissions
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Default attempts for transport-level retries (identifier + batch)
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between transport-level retries, in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

/// Default timeout for any single HTTP request, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Retry policy for transport-level failures.
///
/// HTTP error statuses are never retried under this policy; it covers only
/// connection and timeout errors where the remote made no decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Fixed delay between attempts, in milliseconds
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Full configuration for one import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Base URL of the remote instance (e.g. "https://hmis.example.org/idsr")
    pub base_url: String,

    /// Username for basic auth, attached to every request
    pub username: String,

    /// Password for basic auth
    pub password: String,

    /// Input CSV file
    pub input: PathBuf,

    /// Field mapping schema (JSON)
    pub schema: PathBuf,

    /// Payloads per submission batch
    pub batch_size: usize,

    /// Bound on concurrently in-flight batch submissions
    pub max_in_flight: usize,

    /// Transport-level retry policy
    pub retry: RetryPolicy,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Succeeded ledger output path
    pub succeeded_out: PathBuf,

    /// Failed ledger output path (replayable as a new input file)
    pub failed_out: PathBuf,
}

impl ImportConfig {
    /// Validate the tuning parameters once at startup
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() || !self.base_url.starts_with("http") {
            return Err(ImportError::config(format!(
                "base URL '{}' is not an http(s) URL",
                self.base_url
            )));
        }
        if self.username.is_empty() {
            return Err(ImportError::config("username is empty"));
        }
        if self.batch_size == 0 {
            return Err(ImportError::config("batch size must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(ImportError::config("max in-flight batches must be at least 1"));
        }
        if self.retry.attempts == 0 {
            return Err(ImportError::config("retry attempts must be at least 1"));
        }
        if self.succeeded_out == self.failed_out {
            return Err(ImportError::config(
                "succeeded and failed ledgers must be distinct files",
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry.delay()
    }
}
