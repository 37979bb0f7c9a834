//! Row transformation
//!
//! Interprets the field mapping schema against one raw row to build the
//! payload submitted to the remote API. Transformation is pure apart from
//! identifier acquisition: running it twice on the same row yields the same
//! payload (modulo the freshly generated identifier).
//!
//! Coercion rules never fail a row; they fall back to the schema's
//! documented default. Identifier acquisition failure fails the whole row,
//! because a partially populated payload must never reach submission.

use crate::idgen::IdentifierGenerator;
use crate::schema::{FieldMappingSchema, MappingRule};
use crate::source::RawRow;
use chrono::NaiveDate;
use dbi_common::{RowError, RowId};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Substituted for generated identifiers in preview mode, where no remote
/// round trips are made
pub const PLACEHOLDER_ID: &str = "PREVIEW";

/// Input date formats accepted by the `date` rule, tried in order. The
/// upstream exports use day-first slashed dates; ISO input passes through.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// The structured object submitted to the remote API for one row.
/// Self-contained and immutable once built.
#[derive(Debug, Clone)]
pub struct TransformedPayload {
    /// Source row identity, kept for ledgering
    pub row: RowId,

    /// The identifier synthesized for this row, if the schema required one
    pub generated_id: Option<String>,

    /// The JSON body, one element of the batch's collection array
    pub body: Value,

    /// Original source values, kept so a failed row can be replayed verbatim
    pub raw: Vec<String>,
}

/// Maps raw rows into payloads according to a fixed schema
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    schema: Arc<FieldMappingSchema>,
    generator: Option<IdentifierGenerator>,
}

impl RecordTransformer {
    /// A transformer that acquires identifiers through `generator`. Without
    /// one (preview mode, or a schema with no generated fields) generated-id
    /// rules take [`PLACEHOLDER_ID`] and no network calls are made.
    pub fn new(schema: Arc<FieldMappingSchema>, generator: Option<IdentifierGenerator>) -> Self {
        Self { schema, generator }
    }

    /// A transformer for preview mode
    pub fn preview(schema: Arc<FieldMappingSchema>) -> Self {
        Self::new(schema, None)
    }

    /// Identity of a row under this schema (line number plus natural key)
    pub fn row_id(&self, row: &RawRow) -> RowId {
        let key = self
            .schema
            .key_column
            .as_deref()
            .and_then(|column| cell(row, column))
            .map(str::to_string);
        RowId::new(row.line(), key)
    }

    /// Transform one row into a payload.
    ///
    /// The identifier is requested at most once per row, no matter how many
    /// fields embed it.
    pub async fn transform(&self, row: &RawRow) -> Result<TransformedPayload, RowError> {
        let row_id = self.row_id(row);
        let mut generated: Option<String> = None;
        let mut body = Map::new();

        for field in &self.schema.fields {
            let value = match &field.rule {
                MappingRule::Column { column, fallback } => match cell(row, column) {
                    Some(text) => text.to_string(),
                    None => fallback
                        .clone()
                        .ok_or_else(|| RowError::MissingValue(column.clone()))?,
                },
                MappingRule::Constant { value } => value.clone(),
                MappingRule::Date { column, fallback } => coerce_date(cell(row, column), fallback),
                MappingRule::Number { column, fallback } => {
                    coerce_number(cell(row, column), fallback.as_deref())
                },
                MappingRule::GeneratedId { pattern } => {
                    let identifier = match &generated {
                        Some(identifier) => identifier.clone(),
                        None => {
                            let identifier = match &self.generator {
                                Some(generator) => generator.acquire(&row_id).await?,
                                None => PLACEHOLDER_ID.to_string(),
                            };
                            generated = Some(identifier.clone());
                            identifier
                        },
                    };
                    match pattern {
                        Some(pattern) => pattern.replace("{id}", &identifier),
                        None => identifier,
                    }
                },
            };
            insert_path(&mut body, &field.target, Value::String(value));
        }

        Ok(TransformedPayload {
            row: row_id,
            generated_id: generated,
            body: Value::Object(body),
            raw: row.values().to_vec(),
        })
    }
}

/// A column's usable value. Blank cells and the literal "nan" (how the
/// upstream cleaning scripts export missing values) count as absent.
fn cell<'a>(row: &'a RawRow, column: &str) -> Option<&'a str> {
    row.get(column)
        .map(str::trim)
        .filter(|text| !text.is_empty() && !text.eq_ignore_ascii_case("nan"))
}

/// Coerce to an ISO date, falling back rather than failing
fn coerce_date(raw: Option<&str>, fallback: &str) -> String {
    let Some(text) = raw else {
        return fallback.to_string();
    };
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    fallback.to_string()
}

/// Coerce to integer text (decimals truncated), falling back rather than
/// failing. The source system stores counts as floats ("3.0").
fn coerce_number(raw: Option<&str>, fallback: Option<&str>) -> String {
    if let Some(text) = raw {
        if let Ok(number) = text.parse::<f64>() {
            if number.is_finite() {
                return format!("{}", number.trunc() as i64);
            }
        }
    }
    fallback.unwrap_or_default().to_string()
}

/// Insert a value at a dot-separated path, creating intermediate objects.
/// A later mapping through an existing leaf shadows it.
fn insert_path(object: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        },
        Some((head, rest)) => {
            let entry = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Some(map) = entry.as_object_mut() {
                insert_path(map, rest, value);
            }
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::ApiClient;
    use crate::config::{ImportConfig, RetryPolicy};
    use crate::source::RecordSource;
    use std::io::Write;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rows_from_csv(content: &str) -> Vec<RawRow> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        RecordSource::open(file.path())
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
    }

    fn schema_json(fields: &str) -> Arc<FieldMappingSchema> {
        let text = format!(
            r#"{{
                "endpoint": "api/trackedEntityInstances",
                "collection": "trackedEntityInstances",
                "identifier_endpoint": "api/trackedEntityAttributes/XuuupMIvUeK/generate",
                "key_column": "epid",
                "fields": {}
            }}"#,
            fields
        );
        Arc::new(serde_json::from_str(&text).unwrap())
    }

    fn generator(base_url: &str, attempts: u32) -> IdentifierGenerator {
        let config = ImportConfig {
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
        };
        let client = Arc::new(ApiClient::new(&config).unwrap());
        IdentifierGenerator::new(
            client,
            "api/trackedEntityAttributes/XuuupMIvUeK/generate",
            RetryPolicy {
                attempts,
                delay_ms: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_date_takes_fallback() {
        let schema = schema_json(
            r#"[{ "target": "enrollmentDate", "rule": "date", "column": "registered", "fallback": "1990-01-01" }]"#,
        );
        let rows = rows_from_csv("epid,registered\nE1,\nE2,garbage\nE3,12/05/2020\nE4,2021-03-04\n");
        let transformer = RecordTransformer::preview(schema);

        let empty = transformer.transform(&rows[0]).await.unwrap();
        assert_eq!(empty.body["enrollmentDate"], "1990-01-01");

        let garbage = transformer.transform(&rows[1]).await.unwrap();
        assert_eq!(garbage.body["enrollmentDate"], "1990-01-01");

        let slashed = transformer.transform(&rows[2]).await.unwrap();
        assert_eq!(slashed.body["enrollmentDate"], "2020-05-12");

        let iso = transformer.transform(&rows[3]).await.unwrap();
        assert_eq!(iso.body["enrollmentDate"], "2021-03-04");
    }

    #[tokio::test]
    async fn test_number_coercion_truncates_float_text() {
        let schema = schema_json(
            r#"[{ "target": "ageYears", "rule": "number", "column": "age", "fallback": "-" }]"#,
        );
        let rows = rows_from_csv("epid,age\nE1,12.0\nE2,nan\nE3,7\nE4,oops\n");
        let transformer = RecordTransformer::preview(schema);

        assert_eq!(transformer.transform(&rows[0]).await.unwrap().body["ageYears"], "12");
        assert_eq!(transformer.transform(&rows[1]).await.unwrap().body["ageYears"], "-");
        assert_eq!(transformer.transform(&rows[2]).await.unwrap().body["ageYears"], "7");
        assert_eq!(transformer.transform(&rows[3]).await.unwrap().body["ageYears"], "-");
    }

    #[tokio::test]
    async fn test_missing_value_without_fallback_fails_row() {
        let schema = schema_json(
            r#"[{ "target": "orgUnit", "rule": "column", "column": "org_unit" }]"#,
        );
        let rows = rows_from_csv("epid,org_unit\nE1,\n");
        let transformer = RecordTransformer::preview(schema);

        let err = transformer.transform(&rows[0]).await.unwrap_err();
        assert!(matches!(err, RowError::MissingValue(ref column) if column == "org_unit"));
    }

    #[tokio::test]
    async fn test_nested_targets_build_objects() {
        let schema = schema_json(
            r#"[
                { "target": "enrollment.orgUnit", "rule": "column", "column": "org_unit" },
                { "target": "enrollment.program", "rule": "constant", "value": "U86iDWxDek8" }
            ]"#,
        );
        let rows = rows_from_csv("epid,org_unit\nE1,Hjw70Lodtf2\n");
        let transformer = RecordTransformer::preview(schema);

        let payload = transformer.transform(&rows[0]).await.unwrap();
        assert_eq!(payload.body["enrollment"]["orgUnit"], "Hjw70Lodtf2");
        assert_eq!(payload.body["enrollment"]["program"], "U86iDWxDek8");
        assert_eq!(payload.row.key.as_deref(), Some("E1"));
    }

    #[tokio::test]
    async fn test_preview_substitutes_placeholder_identifier() {
        let schema = schema_json(
            r#"[{ "target": "patientId", "rule": "generated_id", "pattern": "A809/RW24/{id}" }]"#,
        );
        let rows = rows_from_csv("epid\nE1\n");
        let transformer = RecordTransformer::preview(schema);

        let payload = transformer.transform(&rows[0]).await.unwrap();
        assert_eq!(payload.body["patientId"], "A809/RW24/PREVIEW");
        assert_eq!(payload.generated_id.as_deref(), Some(PLACEHOLDER_ID));
    }

    #[tokio::test]
    async fn test_identifier_requested_at_most_once_per_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/trackedEntityAttributes/XuuupMIvUeK/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": "uNiQuE12345"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        // Two fields embed the identifier; only one acquisition may happen.
        let schema = schema_json(
            r#"[
                { "target": "attributes.uid", "rule": "generated_id" },
                { "target": "attributes.patientId", "rule": "generated_id", "pattern": "A809/{id}" }
            ]"#,
        );
        let rows = rows_from_csv("epid\nE1\n");
        let transformer = RecordTransformer::new(schema, Some(generator(&server.uri(), 3)));

        let payload = transformer.transform(&rows[0]).await.unwrap();
        assert_eq!(payload.body["attributes"]["uid"], "uNiQuE12345");
        assert_eq!(payload.body["attributes"]["patientId"], "A809/uNiQuE12345");
    }

    #[tokio::test]
    async fn test_identifier_failure_fails_whole_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/trackedEntityAttributes/XuuupMIvUeK/generate"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let schema = schema_json(
            r#"[
                { "target": "attributes.patientId", "rule": "generated_id" },
                { "target": "attributes.epid", "rule": "column", "column": "epid" }
            ]"#,
        );
        let rows = rows_from_csv("epid\nE1\n");
        let transformer = RecordTransformer::new(schema, Some(generator(&server.uri(), 3)));

        let err = transformer.transform(&rows[0]).await.unwrap_err();
        assert!(matches!(err, RowError::Identifier(_)));
    }
}
