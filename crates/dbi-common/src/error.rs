//! Error taxonomy for the import pipeline
//!
//! Only configuration errors abort a run; everything in this module is row-
//! or batch-scoped and is absorbed into an outcome record instead of being
//! propagated upward.

use thiserror::Error;

/// Failure to acquire a remotely generated identifier.
///
/// Transient failures (transport errors, 5xx) may be retried by the caller;
/// permanent failures (the remote rejected the request shape) may not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Network-level failure or a 5xx response; safe to retry
    #[error("transient failure acquiring identifier: {0}")]
    Transient(String),

    /// The remote rejected the request (4xx) or returned an unusable body
    #[error("identifier request rejected by remote: {0}")]
    Permanent(String),
}

impl IdentifierError {
    /// Whether a retry of the same acquisition could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentifierError::Transient(_))
    }
}

/// A row-scoped failure. The row is recorded as Failed and the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// The source row could not be parsed (wrong column count, bad encoding)
    #[error("malformed row: {0}")]
    Parse(String),

    /// A column referenced by the mapping schema held no usable value and the
    /// rule defines no fallback
    #[error("no value for required column '{0}'")]
    MissingValue(String),

    /// Identifier synthesis failed; the row cannot produce a complete payload
    #[error("identifier acquisition failed: {0}")]
    Identifier(#[from] IdentifierError),

    /// The run was cancelled before this row was submitted
    #[error("cancelled")]
    Cancelled,
}

/// Why a whole batch was marked Failed.
///
/// The batch is the atomic unit of success and failure: every payload it
/// contains receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    /// The remote returned a non-2xx status. Never retried: the server has
    /// already made a decision about this batch.
    #[error("remote rejected batch: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Connection or timeout error that survived the retry policy
    #[error("transport failure after {attempts} attempt(s): {reason}")]
    Transport { attempts: u32, reason: String },
}
