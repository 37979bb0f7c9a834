//! Streaming record source
//!
//! Reads the input CSV through a bounded buffer, so peak memory does not
//! depend on file size. The header row is mandatory; rows are addressed by
//! column name through a shared [`Headers`] table. A malformed row (wrong
//! field count, bad encoding) is yielded as a per-row error and iteration
//! continues; end of input simply ends the iterator.

use crate::error::{ImportError, Result};
use dbi_common::RowError;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Read buffer size. Rows stream through this window regardless of how large
/// the input file is.
const READ_BUFFER_BYTES: usize = 64 * 1024;

/// The input file's column names, shared by every row of a run
#[derive(Debug, Clone)]
pub struct Headers {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Headers {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(position, name)| (name.clone(), position))
            .collect();
        Self { names, index }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One source record, immutable once produced.
///
/// Keeps the original values in file order so a failed row can be written
/// back out verbatim for replay.
#[derive(Debug, Clone)]
pub struct RawRow {
    line: u64,
    headers: Arc<Headers>,
    values: Vec<String>,
}

impl RawRow {
    /// 1-based data line number (the header row is not counted)
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Value of a column by header name. `None` when the file has no such
    /// column; an empty string when the column exists but the cell is blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .index_of(column)
            .and_then(|position| self.values.get(position))
            .map(String::as_str)
    }

    /// The raw values in original column order
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// A row that could not be parsed. Carries the line number so the failure
/// can still be ledgered under a row identity.
#[derive(Debug, Clone)]
pub struct SourceError {
    pub line: u64,
    pub error: RowError,
}

/// Lazy, file-order stream of [`RawRow`]. Restartable only by reopening the
/// path from the start.
#[derive(Debug)]
pub struct RecordSource {
    reader: csv::Reader<BufReader<File>>,
    headers: Arc<Headers>,
    record: csv::StringRecord,
    line: u64,
}

impl RecordSource {
    /// Open an input file and read its header row
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            ImportError::config(format!("cannot open input {}: {}", path.display(), err))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::with_capacity(READ_BUFFER_BYTES, file));

        let header_record = reader.headers()?.clone();
        let headers = Headers::new(header_record.iter().map(str::to_string).collect());
        if headers.is_empty() {
            return Err(ImportError::config(format!(
                "{} has no header row",
                path.display()
            )));
        }

        Ok(Self {
            reader,
            headers: Arc::new(headers),
            record: csv::StringRecord::new(),
            line: 0,
        })
    }

    pub fn headers(&self) -> &Arc<Headers> {
        &self.headers
    }
}

impl Iterator for RecordSource {
    type Item = std::result::Result<RawRow, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                self.line += 1;
                Some(Ok(RawRow {
                    line: self.line,
                    headers: Arc::clone(&self.headers),
                    values: self.record.iter().map(str::to_string).collect(),
                }))
            },
            Err(err) => {
                // The reader recovers on the next record; only this row is lost.
                self.line += 1;
                Some(Err(SourceError {
                    line: self.line,
                    error: RowError::Parse(err.to_string()),
                }))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_input(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_rows_stream_in_file_order() {
        let file = write_input("epid,age\nE1,12\nE2,7\nE3,\n");
        let source = RecordSource::open(file.path()).unwrap();

        let rows: Vec<RawRow> = source.map(|item| item.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].line(), 1);
        assert_eq!(rows[0].get("epid"), Some("E1"));
        assert_eq!(rows[1].get("age"), Some("7"));
        assert_eq!(rows[2].get("age"), Some(""));
        assert_eq!(rows[2].get("missing"), None);
    }

    #[test]
    fn test_malformed_row_is_skipped_not_fatal() {
        let file = write_input("epid,age\nE1,12\nE2,7,extra\nE3,9\n");
        let source = RecordSource::open(file.path()).unwrap();

        let items: Vec<_> = source.collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.error, RowError::Parse(_)));
        // Iteration continued past the bad row
        assert_eq!(items[2].as_ref().unwrap().get("epid"), Some("E3"));
    }

    #[test]
    fn test_empty_input_yields_no_rows() {
        let file = write_input("epid,age\n");
        let source = RecordSource::open(file.path()).unwrap();
        assert_eq!(source.count(), 0);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = RecordSource::open("/nonexistent/input.csv").unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[test]
    fn test_headers_lookup() {
        let file = write_input("epid,age\nE1,12\n");
        let source = RecordSource::open(file.path()).unwrap();
        let headers = source.headers();
        assert_eq!(headers.len(), 2);
        assert!(headers.contains("epid"));
        assert_eq!(headers.index_of("age"), Some(1));
        assert!(!headers.contains("sex"));
    }
}
