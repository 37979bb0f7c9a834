//! Outcome ledger
//!
//! Durable, append-only record of every row's fate. Two CSV files are
//! produced: the succeeded ledger (row identity plus remote identifier) and
//! the failed ledger, which carries the original raw row under the original
//! header so it can be fed directly into a subsequent run. Files are opened
//! in append mode and never truncated, so ledgers accumulate across process
//! restarts. Every write is flushed before the coordinator considers the
//! batch processed.

use crate::error::Result;
use crate::source::Headers;
use dbi_common::{OutcomeRecord, RowId};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

/// Post-run audit view of the ledger
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub succeeded: Vec<OutcomeRecord>,
    pub failed: Vec<OutcomeRecord>,
}

/// Append-only success/failure ledger. The append operation is serialized;
/// concurrent flows share the ledger behind an `Arc`.
pub struct OutcomeLedger {
    inner: Mutex<Inner>,
}

struct Inner {
    succeeded_writer: csv::Writer<File>,
    failed_writer: csv::Writer<File>,
    succeeded: Vec<OutcomeRecord>,
    failed: Vec<OutcomeRecord>,
}

impl OutcomeLedger {
    /// Open (or reopen) the ledger pair. The failed ledger's header row is
    /// the input file's own header, written once when the file is new.
    pub fn open(
        succeeded_path: impl AsRef<Path>,
        failed_path: impl AsRef<Path>,
        headers: &Headers,
    ) -> Result<Self> {
        let (succeeded_file, succeeded_new) = open_append(succeeded_path.as_ref())?;
        let mut succeeded_writer = csv::Writer::from_writer(succeeded_file);
        if succeeded_new {
            succeeded_writer.write_record(["line", "key", "identifier"])?;
            succeeded_writer.flush()?;
        }

        let (failed_file, failed_new) = open_append(failed_path.as_ref())?;
        let mut failed_writer = csv::Writer::from_writer(failed_file);
        if failed_new {
            failed_writer.write_record(headers.names())?;
            failed_writer.flush()?;
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                succeeded_writer,
                failed_writer,
                succeeded: Vec::new(),
                failed: Vec::new(),
            }),
        })
    }

    /// Record one succeeded row, durably
    pub fn record_success(&self, row: RowId, remote_id: Option<String>) -> Result<()> {
        let mut inner = self.lock();
        inner.succeeded_writer.write_record([
            row.line.to_string().as_str(),
            row.key.as_deref().unwrap_or(""),
            remote_id.as_deref().unwrap_or(""),
        ])?;
        inner.succeeded_writer.flush()?;
        inner.succeeded.push(OutcomeRecord::succeeded(row, remote_id));
        Ok(())
    }

    /// Record one failed row, durably. The raw values are appended to the
    /// replay file; a row that never parsed has no raw values and exists
    /// only in the audit snapshot.
    pub fn record_failure(&self, row: RowId, raw: &[String], reason: &str) -> Result<()> {
        let mut inner = self.lock();
        if !raw.is_empty() {
            inner.failed_writer.write_record(raw)?;
            inner.failed_writer.flush()?;
        }
        inner.failed.push(OutcomeRecord::failed(row, reason));
        Ok(())
    }

    /// Aggregate (succeeded, failed) counts for this run
    pub fn counts(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.succeeded.len() as u64, inner.failed.len() as u64)
    }

    /// Clone out the audit view of this run's outcomes
    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.lock();
        LedgerSnapshot {
            succeeded: inner.succeeded.clone(),
            failed: inner.failed.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a writer panicked mid-append; the ledger
        // state itself is still usable for the remaining rows.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Open a file for appending, reporting whether it was empty (new)
fn open_append(path: &Path) -> Result<(File, bool)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;
    Ok((file, is_new))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::RecordSource;
    use dbi_common::RowStatus;
    use tempfile::TempDir;

    fn headers() -> Headers {
        Headers::new(vec!["epid".to_string(), "age".to_string()])
    }

    #[test]
    fn test_counts_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let ledger = OutcomeLedger::open(
            dir.path().join("succeeded.csv"),
            dir.path().join("failed.csv"),
            &headers(),
        )
        .unwrap();

        ledger
            .record_success(RowId::new(1, Some("E1".into())), Some("aB3dE".into()))
            .unwrap();
        ledger
            .record_failure(
                RowId::new(2, Some("E2".into())),
                &["E2".to_string(), "12".to_string()],
                "remote rejected batch: HTTP 409",
            )
            .unwrap();

        assert_eq!(ledger.counts(), (1, 1));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.succeeded.len(), 1);
        assert_eq!(snapshot.succeeded[0].status, RowStatus::Succeeded);
        assert_eq!(snapshot.succeeded[0].remote_id.as_deref(), Some("aB3dE"));
        assert_eq!(snapshot.failed.len(), 1);
        assert_eq!(
            snapshot.failed[0].reason.as_deref(),
            Some("remote rejected batch: HTTP 409")
        );
    }

    #[test]
    fn test_failed_ledger_replays_as_input() {
        let dir = TempDir::new().unwrap();
        let failed_path = dir.path().join("failed.csv");
        let ledger = OutcomeLedger::open(
            dir.path().join("succeeded.csv"),
            &failed_path,
            &headers(),
        )
        .unwrap();

        ledger
            .record_failure(
                RowId::new(1, None),
                &["E1".to_string(), "9".to_string()],
                "cancelled",
            )
            .unwrap();
        ledger
            .record_failure(
                RowId::new(2, None),
                &["E2".to_string(), "4".to_string()],
                "cancelled",
            )
            .unwrap();
        drop(ledger);

        // The failed file is a valid input file with the original header.
        let source = RecordSource::open(&failed_path).unwrap();
        assert!(source.headers().contains("epid"));
        let rows: Vec<_> = source.map(|item| item.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("epid"), Some("E1"));
        assert_eq!(rows[1].get("age"), Some("4"));
    }

    #[test]
    fn test_reopen_appends_without_duplicating_header() {
        let dir = TempDir::new().unwrap();
        let succeeded_path = dir.path().join("succeeded.csv");
        let failed_path = dir.path().join("failed.csv");

        {
            let ledger =
                OutcomeLedger::open(&succeeded_path, &failed_path, &headers()).unwrap();
            ledger.record_success(RowId::new(1, None), None).unwrap();
        }
        {
            let ledger =
                OutcomeLedger::open(&succeeded_path, &failed_path, &headers()).unwrap();
            ledger.record_success(RowId::new(2, None), None).unwrap();
        }

        let text = std::fs::read_to_string(&succeeded_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "line,key,identifier");
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));
    }

    #[test]
    fn test_unparsed_row_is_audited_but_not_replayed() {
        let dir = TempDir::new().unwrap();
        let failed_path = dir.path().join("failed.csv");
        let ledger = OutcomeLedger::open(
            dir.path().join("succeeded.csv"),
            &failed_path,
            &headers(),
        )
        .unwrap();

        ledger
            .record_failure(RowId::new(3, None), &[], "malformed row")
            .unwrap();

        assert_eq!(ledger.counts(), (0, 1));
        let text = std::fs::read_to_string(&failed_path).unwrap();
        assert_eq!(text.lines().count(), 1); // header only
    }
}
