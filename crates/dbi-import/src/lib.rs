//! DBI Import Library
//!
//! Bulk record import pipeline for DHIS2-style tracker APIs: stream rows
//! from a large CSV, transform each one into a structured payload through a
//! declarative field mapping schema (synthesizing remotely generated
//! identifiers where the schema asks for them), submit payloads in bounded
//! batches, and partition every row into a durable success or failure
//! ledger so a run can be audited and its failures replayed.
//!
//! # Example
//!
//! ```no_run
//! use dbi_import::coordinator::ImportCoordinator;
//! use dbi_import::schema::FieldMappingSchema;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let schema = FieldMappingSchema::load("mapping.json")?;
//!     # let config: dbi_import::config::ImportConfig = unimplemented!();
//!     let mut coordinator = ImportCoordinator::new(config, schema)?;
//!     let summary = coordinator.run().await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod idgen;
pub mod ledger;
pub mod progress;
pub mod schema;
pub mod source;
pub mod submit;
pub mod transform;

// Re-export the run-facing surface
pub use coordinator::{CoordinatorState, ImportCoordinator};
pub use error::{ImportError, Result};
