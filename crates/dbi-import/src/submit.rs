//! Batch submission
//!
//! One HTTP request per batch; the batch is the atomic unit of success and
//! failure. Transport-level errors (connection, timeout) are retried under
//! the configured policy because the remote made no decision; an HTTP error
//! status is a decision and is never retried. There is no per-record retry
//! splitting inside a failed batch — its rows land in the failed ledger and
//! are replayable in a subsequent run.

use crate::client::ApiClient;
use crate::config::RetryPolicy;
use crate::transform::TransformedPayload;
use dbi_common::BatchFailure;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cap on the response text captured as a failure reason
const MAX_REASON_BYTES: usize = 500;

/// An ordered, size-bounded group of payloads submitted in one request
#[derive(Debug, Clone)]
pub struct Batch {
    /// 0-based position of the batch in source order
    pub index: usize,
    pub payloads: Vec<TransformedPayload>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// How the remote handled a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// 2xx: every payload in the batch succeeded
    Accepted,
    /// Every payload in the batch failed for the same reason
    Failed(BatchFailure),
}

/// A resolved batch: the payloads plus their shared outcome
#[derive(Debug)]
pub struct BatchResult {
    pub batch: Batch,
    pub outcome: BatchOutcome,
}

/// Submits batches to the remote collection endpoint
#[derive(Debug, Clone)]
pub struct BatchSubmitter {
    client: Arc<ApiClient>,
    endpoint: String,
    collection: String,
    retry: RetryPolicy,
}

impl BatchSubmitter {
    pub fn new(
        client: Arc<ApiClient>,
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            collection: collection.into(),
            retry,
        }
    }

    /// Submit one batch and classify the outcome. Never returns an error:
    /// every failure mode is absorbed into the [`BatchResult`].
    pub async fn submit(&self, batch: Batch) -> BatchResult {
        let started = std::time::Instant::now();
        let body = self.wrap(&batch);

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.client.post_json(&self.endpoint, &body).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(batch = batch.index, size = batch.len(), "batch accepted");
                        break BatchOutcome::Accepted;
                    }
                    let text = response.text().await.unwrap_or_default();
                    break BatchOutcome::Failed(BatchFailure::Rejected {
                        status: status.as_u16(),
                        body: truncate(&text),
                    });
                },
                Err(err) if attempt < self.retry.attempts => {
                    warn!(
                        batch = batch.index,
                        attempt,
                        error = %err,
                        "batch transport failure, retrying"
                    );
                    tokio::time::sleep(self.retry.delay()).await;
                },
                Err(err) => {
                    break BatchOutcome::Failed(BatchFailure::Transport {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                },
            }
        };

        debug!(
            batch = batch.index,
            size = batch.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch resolved"
        );
        BatchResult { batch, outcome }
    }

    /// Build the request body: `{"<collection>": [payload bodies...]}`
    fn wrap(&self, batch: &Batch) -> Value {
        let bodies: Vec<Value> = batch
            .payloads
            .iter()
            .map(|payload| payload.body.clone())
            .collect();
        let mut container = Map::new();
        container.insert(self.collection.clone(), Value::Array(bodies));
        Value::Object(container)
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_REASON_BYTES {
        return text.to_string();
    }
    let mut end = MAX_REASON_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
