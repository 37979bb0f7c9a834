//! Fatal error types for the importer
//!
//! Everything here is configuration-scoped and aborts a run before (or
//! instead of) processing rows. Row- and batch-scoped failures live in
//! `dbi_common::error` and are absorbed into outcome records, never raised
//! through this type.

use thiserror::Error;

/// Result type alias for importer operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum ImportError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your CLI flags and DBI_* environment variables.")]
    Config(String),

    /// Mapping schema file could not be loaded or is structurally invalid
    #[error("Invalid mapping schema: {0}")]
    Schema(String),

    /// The input file lacks columns the mapping schema refers to
    #[error("Input file is missing required column(s): {0}")]
    MissingColumns(String),

    /// The remote could not be reached (or rejected the credentials) at startup
    #[error("Remote {url} unreachable at startup: {reason}")]
    RemoteUnreachable { url: String, reason: String },

    /// File system operation failed
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// CSV-level failure opening or reading the input headers
    #[error("Failed to read input file: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ImportError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }
}
