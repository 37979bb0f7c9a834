//! Import coordination
//!
//! Drives the pipeline: pull rows from the source, transform them, dispatch
//! full batches with bounded concurrency, and settle every resolved batch
//! into the outcome ledger. One coordinating flow of control owns the source
//! and the transformer; only batch submissions run concurrently, because
//! network latency dominates everything else.
//!
//! State machine: `Idle → Streaming → Draining → Completed`, with `Aborted`
//! reachable on fatal configuration errors (unreachable remote, missing
//! columns, unreadable input). Row- and batch-scoped failures never abort a
//! run; they become outcome records and the coordinator keeps going.

use crate::client::ApiClient;
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::idgen::IdentifierGenerator;
use crate::ledger::{LedgerSnapshot, OutcomeLedger};
use crate::schema::FieldMappingSchema;
use crate::source::RecordSource;
use crate::submit::{Batch, BatchOutcome, BatchResult, BatchSubmitter};
use crate::transform::{RecordTransformer, TransformedPayload};
use dbi_common::{ImportSummary, Progress, RowError, RowId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of one import run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Streaming,
    Draining,
    Completed,
    Aborted,
}

/// Orchestrates one run of the import pipeline
pub struct ImportCoordinator {
    config: ImportConfig,
    schema: Arc<FieldMappingSchema>,
    state: CoordinatorState,
    cancel: CancellationToken,
    progress_tx: Option<mpsc::UnboundedSender<Progress>>,
    snapshot: Option<LedgerSnapshot>,
}

impl ImportCoordinator {
    /// Create a coordinator for one run. Tuning parameters and the schema
    /// are validated here; the input file and the remote are checked when
    /// the run starts.
    pub fn new(config: ImportConfig, schema: FieldMappingSchema) -> Result<Self> {
        config.validate()?;
        schema.validate()?;
        Ok(Self {
            config,
            schema: Arc::new(schema),
            state: CoordinatorState::Idle,
            cancel: CancellationToken::new(),
            progress_tx: None,
            snapshot: None,
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Token for cooperative cancellation. Checked between rows; in-flight
    /// submissions are allowed to resolve naturally.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribe to aggregate progress, emitted after each batch resolves.
    /// Call before [`run`](Self::run).
    pub fn progress_channel(&mut self) -> mpsc::UnboundedReceiver<Progress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress_tx = Some(tx);
        rx
    }

    /// Post-run audit view of the ledger. `None` before the run finishes.
    pub fn ledger_snapshot(&self) -> Option<&LedgerSnapshot> {
        self.snapshot.as_ref()
    }

    /// Execute the run to completion.
    ///
    /// Returns `Err` only for configuration errors; every row- or
    /// batch-scoped failure is absorbed into the ledger and the summary.
    pub async fn run(&mut self) -> Result<ImportSummary> {
        match self.run_inner().await {
            Ok(summary) => {
                self.state = CoordinatorState::Completed;
                Ok(summary)
            },
            Err(err) => {
                self.state = CoordinatorState::Aborted;
                Err(err)
            },
        }
    }

    async fn run_inner(&mut self) -> Result<ImportSummary> {
        let client = Arc::new(ApiClient::new(&self.config)?);
        client.ping().await?;

        let source = RecordSource::open(&self.config.input)?;
        self.schema.validate_headers(source.headers())?;

        let ledger = Arc::new(OutcomeLedger::open(
            &self.config.succeeded_out,
            &self.config.failed_out,
            source.headers(),
        )?);

        let generator = self.schema.identifier_endpoint.as_ref().map(|endpoint| {
            IdentifierGenerator::new(Arc::clone(&client), endpoint.clone(), self.config.retry)
        });
        let transformer = RecordTransformer::new(Arc::clone(&self.schema), generator);

        let submitter = Arc::new(BatchSubmitter::new(
            Arc::clone(&client),
            self.schema.endpoint.clone(),
            self.schema.collection.clone(),
            self.config.retry,
        ));

        info!(
            input = %self.config.input.display(),
            endpoint = %self.schema.endpoint,
            batch_size = self.config.batch_size,
            max_in_flight = self.config.max_in_flight,
            "starting import"
        );
        self.state = CoordinatorState::Streaming;

        let mut in_flight: JoinSet<BatchResult> = JoinSet::new();
        let mut pending: Vec<TransformedPayload> = Vec::with_capacity(self.config.batch_size);
        let mut batch_index = 0usize;
        let mut rows_seen: u64 = 0;
        let mut cancelled = false;

        for item in source {
            rows_seen += 1;

            if !cancelled && self.cancel.is_cancelled() {
                info!("cancellation requested, draining remaining rows as failed");
                cancelled = true;
            }

            let row = match item {
                Ok(row) => row,
                Err(source_err) => {
                    warn!(line = source_err.line, error = %source_err.error, "skipping malformed row");
                    ledger.record_failure(
                        RowId::new(source_err.line, None),
                        &[],
                        &source_err.error.to_string(),
                    )?;
                    continue;
                },
            };

            if cancelled {
                ledger.record_failure(
                    transformer.row_id(&row),
                    row.values(),
                    &RowError::Cancelled.to_string(),
                )?;
                continue;
            }

            match transformer.transform(&row).await {
                Ok(payload) => pending.push(payload),
                Err(err) => {
                    warn!(line = row.line(), error = %err, "row failed transformation");
                    ledger.record_failure(transformer.row_id(&row), row.values(), &err.to_string())?;
                    continue;
                },
            }

            if pending.len() >= self.config.batch_size {
                let batch = Batch {
                    index: batch_index,
                    payloads: std::mem::take(&mut pending),
                };
                batch_index += 1;
                dispatch(&mut in_flight, &submitter, batch);

                // Bounded concurrency: wait out one in-flight submission
                // before accepting more work.
                while in_flight.len() >= self.config.max_in_flight {
                    if let Some(joined) = in_flight.join_next().await {
                        let result = joined.map_err(|err| {
                            ImportError::config(format!("submission task failed: {}", err))
                        })?;
                        self.settle(result, &ledger, rows_seen)?;
                    }
                }
            }
        }

        self.state = CoordinatorState::Draining;

        if cancelled {
            for payload in pending.drain(..) {
                ledger.record_failure(payload.row, &payload.raw, &RowError::Cancelled.to_string())?;
            }
        } else if !pending.is_empty() {
            let batch = Batch {
                index: batch_index,
                payloads: std::mem::take(&mut pending),
            };
            dispatch(&mut in_flight, &submitter, batch);
        }

        while let Some(joined) = in_flight.join_next().await {
            let result = joined
                .map_err(|err| ImportError::config(format!("submission task failed: {}", err)))?;
            self.settle(result, &ledger, rows_seen)?;
        }

        let (succeeded, failed) = ledger.counts();
        if succeeded + failed != rows_seen {
            // Every row must have exactly one outcome; a mismatch is a bug.
            error!(
                rows_seen,
                succeeded, failed, "outcome count does not reconcile with rows consumed"
            );
        }

        self.emit_progress(&ledger, rows_seen);
        self.snapshot = Some(ledger.snapshot());

        let summary = ImportSummary {
            rows: rows_seen,
            succeeded,
            failed,
        };
        info!(
            rows = summary.rows,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled,
            "import finished"
        );
        Ok(summary)
    }

    /// Write one ledger entry per payload of a resolved batch, then report
    /// aggregate progress.
    fn settle(
        &self,
        result: BatchResult,
        ledger: &Arc<OutcomeLedger>,
        rows_seen: u64,
    ) -> Result<()> {
        match result.outcome {
            BatchOutcome::Accepted => {
                for payload in result.batch.payloads {
                    ledger.record_success(payload.row, payload.generated_id)?;
                }
            },
            BatchOutcome::Failed(failure) => {
                let reason = failure.to_string();
                warn!(batch = result.batch.index, reason = %reason, "batch failed");
                for payload in result.batch.payloads {
                    ledger.record_failure(payload.row, &payload.raw, &reason)?;
                }
            },
        }
        self.emit_progress(ledger, rows_seen);
        Ok(())
    }

    fn emit_progress(&self, ledger: &Arc<OutcomeLedger>, rows_seen: u64) {
        if let Some(tx) = &self.progress_tx {
            let (succeeded, failed) = ledger.counts();
            // A closed receiver just means nobody is watching anymore.
            let _ = tx.send(Progress {
                processed: succeeded + failed,
                succeeded,
                failed,
                total: rows_seen,
            });
        }
    }
}

fn dispatch(in_flight: &mut JoinSet<BatchResult>, submitter: &Arc<BatchSubmitter>, batch: Batch) {
    info!(batch = batch.index, size = batch.len(), "dispatching batch");
    let submitter = Arc::clone(submitter);
    in_flight.spawn(async move { submitter.submit(batch).await });
}
