//! Common types used across the import pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one source row.
///
/// The line number is 1-based and counts data lines (the header is line 0).
/// The natural key is taken from the schema's key column when one is
/// configured, so outcomes can be matched to records independently of file
/// position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub line: u64,
    pub key: Option<String>,
}

impl RowId {
    pub fn new(line: u64, key: Option<String>) -> Self {
        Self { line, key }
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "line {} ({})", self.line, key),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Final status of one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowStatus::Succeeded => write!(f, "succeeded"),
            RowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The durable record of one row's fate. Written exactly once per row that
/// enters the pipeline; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Source row identity
    pub row: RowId,

    /// Final status
    pub status: RowStatus,

    /// Remote-assigned identifier, when one was synthesized for the row
    pub remote_id: Option<String>,

    /// Failure reason, present iff status is Failed
    pub reason: Option<String>,

    /// When the outcome was recorded
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn succeeded(row: RowId, remote_id: Option<String>) -> Self {
        Self {
            row,
            status: RowStatus::Succeeded,
            remote_id,
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(row: RowId, reason: impl Into<String>) -> Self {
        Self {
            row,
            status: RowStatus::Failed,
            remote_id: None,
            reason: Some(reason.into()),
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate progress, emitted after each batch resolves.
///
/// `total` is the number of rows pulled from the source so far; once the
/// source is exhausted it equals the final row count. Per-row payload content
/// is never part of the progress signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total: u64,
}

/// Final aggregate counts for a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub rows: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl std::fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows: {} succeeded, {} failed",
            self.rows, self.succeeded, self.failed
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_display() {
        let anonymous = RowId::new(12, None);
        assert_eq!(anonymous.to_string(), "line 12");

        let keyed = RowId::new(12, Some("EPID-042".to_string()));
        assert_eq!(keyed.to_string(), "line 12 (EPID-042)");
    }

    #[test]
    fn test_outcome_record_constructors() {
        let ok = OutcomeRecord::succeeded(RowId::new(1, None), Some("aBcDeF12345".into()));
        assert_eq!(ok.status, RowStatus::Succeeded);
        assert!(ok.reason.is_none());

        let bad = OutcomeRecord::failed(RowId::new(2, None), "malformed row");
        assert_eq!(bad.status, RowStatus::Failed);
        assert_eq!(bad.reason.as_deref(), Some("malformed row"));
        assert!(bad.remote_id.is_none());
    }

    #[test]
    fn test_summary_display() {
        let summary = ImportSummary {
            rows: 120,
            succeeded: 100,
            failed: 20,
        };
        assert_eq!(summary.to_string(), "120 rows: 100 succeeded, 20 failed");
    }
}
