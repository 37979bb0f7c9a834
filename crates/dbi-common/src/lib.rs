//! DBI Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error taxonomy, and logging setup for the DBI workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used by the import pipeline:
//!
//! - **Error Handling**: the row/identifier/batch error taxonomy
//! - **Logging**: tracing subscriber configuration (console, file, or both)
//! - **Types**: row identity, outcome records, and progress reporting types
//!
//! # Example
//!
//! ```no_run
//! use dbi_common::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     info!("Importer started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BatchFailure, IdentifierError, RowError};
pub use types::{ImportSummary, OutcomeRecord, Progress, RowId, RowStatus};
