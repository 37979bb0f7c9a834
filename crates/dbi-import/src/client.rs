//! HTTP client for the remote import API
//!
//! One `ApiClient` is constructed by the coordinator and shared (read-only)
//! by the identifier generator and the batch submitter. The credential pair
//! is attached to every request as a basic-auth header; the HTTP status code
//! of the response is the authoritative success/failure signal.

use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use reqwest::{Client, Response};
use std::time::Duration;

/// Path probed at startup to verify the remote is reachable and the
/// credentials are accepted. The original importer logged in against the
/// current-user endpoint for the same purpose.
const PING_PATH: &str = "api/me";

/// API client for the remote instance
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ApiClient {
    /// Create a new API client from the run configuration
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a GET request to a path under the base URL
    pub async fn get(&self, path: &str) -> reqwest::Result<Response> {
        self.client
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
    }

    /// Send a POST request with a JSON body to a path under the base URL
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> reqwest::Result<Response> {
        self.client
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
    }

    /// Verify the remote is reachable and the credentials are accepted.
    ///
    /// Called once before any row is processed; failure here aborts the run
    /// as a configuration error.
    pub async fn ping(&self) -> Result<()> {
        let response = self.get(PING_PATH).await.map_err(|err| {
            ImportError::RemoteUnreachable {
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(ImportError::RemoteUnreachable {
                url: self.base_url.clone(),
                reason: format!("HTTP {} from {}", response.status(), PING_PATH),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::path::PathBuf;

    fn test_config(base_url: &str) -> ImportConfig {
        ImportConfig {
            base_url: base_url.to_string(),
            username: "importer".to_string(),
            password: "secret".to_string(),
            input: PathBuf::from("cases.csv"),
            schema: PathBuf::from("mapping.json"),
            batch_size: 50,
            max_in_flight: 4,
            retry: RetryPolicy::default(),
            timeout_secs: 5,
            succeeded_out: PathBuf::from("succeeded.csv"),
            failed_out: PathBuf::from("failed.csv"),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new(&test_config("https://hmis.example.org/idsr/")).unwrap();
        assert_eq!(client.base_url(), "https://hmis.example.org/idsr");
        assert_eq!(
            client.url("/api/trackedEntityInstances"),
            "https://hmis.example.org/idsr/api/trackedEntityInstances"
        );
    }

    #[tokio::test]
    async fn test_ping_unreachable_is_config_error() {
        let client = ApiClient::new(&test_config("http://localhost:1")).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ImportError::RemoteUnreachable { .. }));
    }
}
