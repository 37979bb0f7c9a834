//! Field mapping schema
//!
//! A declarative table describing how source columns populate the submitted
//! payload: which fields are copied, which are coerced (with a documented
//! fallback), and which are synthesized from a remotely generated
//! identifier. The schema is loaded once at startup and read-only for the
//! life of a run; the transformer interprets it row by row, so the
//! instance-specific mapping stays out of the engine and can be tested on
//! its own.

use crate::error::{ImportError, Result};
use crate::source::Headers;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Mapping from the input file to the submitted payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingSchema {
    /// Submission endpoint path (e.g. "api/trackedEntityInstances")
    pub endpoint: String,

    /// Container field wrapping the payload array in the batch body,
    /// producing `{"<collection>": [...]}`
    pub collection: String,

    /// Identifier generation endpoint path. Required when any field uses the
    /// `generated_id` rule.
    #[serde(default)]
    pub identifier_endpoint: Option<String>,

    /// Column whose value serves as the row's natural key in ledgers and logs
    #[serde(default)]
    pub key_column: Option<String>,

    /// One entry per payload field, applied in order
    pub fields: Vec<FieldMapping>,
}

/// One payload field: where it goes and how its value is produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Dot-separated target path inside the payload object
    /// (e.g. "attributes.XuuupMIvUeK")
    pub target: String,

    #[serde(flatten)]
    pub rule: MappingRule,
}

/// How a payload field's value is produced from the source row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MappingRule {
    /// Copy the column value; empty/missing takes the fallback if present,
    /// otherwise the row fails with a missing-value error
    Column {
        column: String,
        #[serde(default)]
        fallback: Option<String>,
    },

    /// A fixed value, identical for every row
    Constant { value: String },

    /// Coerce the column to an ISO date (YYYY-MM-DD). Empty or unparsable
    /// input takes the fallback date; it never fails the row.
    Date { column: String, fallback: String },

    /// Coerce the column to integer text (decimals truncated, matching the
    /// source system's numeric exports). Empty or unparsable input takes
    /// the fallback if present, otherwise the empty string.
    Number {
        column: String,
        #[serde(default)]
        fallback: Option<String>,
    },

    /// Synthesize the value from the remotely generated identifier. The
    /// optional pattern embeds it via an `{id}` placeholder
    /// (e.g. "A809/RW24/{id}"); without a pattern the raw identifier is used.
    GeneratedId {
        #[serde(default)]
        pattern: Option<String>,
    },
}

impl MappingRule {
    /// The source column this rule reads, if any
    pub fn column(&self) -> Option<&str> {
        match self {
            MappingRule::Column { column, .. }
            | MappingRule::Date { column, .. }
            | MappingRule::Number { column, .. } => Some(column),
            MappingRule::Constant { .. } | MappingRule::GeneratedId { .. } => None,
        }
    }
}

impl FieldMappingSchema {
    /// Load and validate a schema from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            ImportError::schema(format!("cannot read {}: {}", path.display(), err))
        })?;
        let schema: Self = serde_json::from_str(&text)
            .map_err(|err| ImportError::schema(format!("{}: {}", path.display(), err)))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Structural validation, independent of any input file
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(ImportError::schema("endpoint is empty"));
        }
        if self.collection.is_empty() {
            return Err(ImportError::schema("collection is empty"));
        }
        if self.fields.is_empty() {
            return Err(ImportError::schema("no field mappings defined"));
        }
        for field in &self.fields {
            if field.target.is_empty() || field.target.split('.').any(str::is_empty) {
                return Err(ImportError::schema(format!(
                    "invalid target path '{}'",
                    field.target
                )));
            }
        }
        if self.requires_identifier() && self.identifier_endpoint.is_none() {
            return Err(ImportError::schema(
                "a generated_id rule is used but no identifier_endpoint is set",
            ));
        }
        Ok(())
    }

    /// Whether any field synthesizes its value from a generated identifier
    pub fn requires_identifier(&self) -> bool {
        self.fields
            .iter()
            .any(|field| matches!(field.rule, MappingRule::GeneratedId { .. }))
    }

    /// Every source column the schema reads (rules plus the key column)
    pub fn referenced_columns(&self) -> BTreeSet<&str> {
        let mut columns: BTreeSet<&str> = self
            .fields
            .iter()
            .filter_map(|field| field.rule.column())
            .collect();
        if let Some(key) = &self.key_column {
            columns.insert(key);
        }
        columns
    }

    /// Check the input header against the schema. Any referenced column that
    /// the file does not carry is a fatal configuration error, reported
    /// before a single row is processed.
    pub fn validate_headers(&self, headers: &Headers) -> Result<()> {
        let missing: Vec<&str> = self
            .referenced_columns()
            .into_iter()
            .filter(|column| !headers.contains(column))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::MissingColumns(missing.join(", ")))
        }
    }
}
