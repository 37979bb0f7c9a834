//! Remote identifier acquisition
//!
//! The remote service owns uniqueness: every identifier is one GET round
//! trip, with no local caching or pre-fetching. A scope (the owning row) is
//! only ever used by one caller, so no locking is needed beyond the HTTP
//! client's own thread safety. Identifiers acquired for rows that later fail
//! are not reclaimed; the remote sequence simply skips them.

use crate::client::ApiClient;
use crate::config::RetryPolicy;
use dbi_common::{IdentifierError, RowId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// JSON field carrying the unique token in the generation response
const TOKEN_FIELD: &str = "value";

/// Acquires globally unique identifiers from the remote generation endpoint
#[derive(Debug, Clone)]
pub struct IdentifierGenerator {
    client: Arc<ApiClient>,
    endpoint: String,
    retry: RetryPolicy,
}

impl IdentifierGenerator {
    pub fn new(client: Arc<ApiClient>, endpoint: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            retry,
        }
    }

    /// Acquire one identifier for the given row scope.
    ///
    /// Transient failures are retried up to the policy's attempt count with
    /// the policy's delay in between; permanent failures return immediately.
    pub async fn acquire(&self, scope: &RowId) -> Result<String, IdentifierError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_acquire().await {
                Ok(identifier) => {
                    debug!(scope = %scope, identifier = %identifier, "acquired identifier");
                    return Ok(identifier);
                },
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    warn!(
                        scope = %scope,
                        attempt,
                        error = %err,
                        "identifier acquisition failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay()).await;
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_acquire(&self) -> Result<String, IdentifierError> {
        let response = self
            .client
            .get(&self.endpoint)
            .await
            .map_err(|err| IdentifierError::Transient(err.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IdentifierError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(IdentifierError::Permanent(format!("HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| IdentifierError::Permanent(format!("unreadable body: {}", err)))?;

        body.get(TOKEN_FIELD)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                IdentifierError::Permanent(format!("response has no '{}' field", TOKEN_FIELD))
            })
    }
}
