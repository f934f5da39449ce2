//! JSON serializer and JSON array export

use super::{FormatError, RecordSerializer};
use crate::record::Record;
use std::path::Path;

/// Encodes a record as a compact JSON object
#[derive(Debug, Default, Clone)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl RecordSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, record: &Record) -> Result<Vec<u8>, FormatError> {
        Ok(serde_json::to_vec(record)?)
    }
}

/// Write all records to `path` as a pretty-printed JSON array.
///
/// Returns the number of bytes written.
pub fn write_json_file(records: &[Record], path: &Path) -> Result<usize, FormatError> {
    let bytes = serde_json::to_vec_pretty(records)?;
    std::fs::write(path, &bytes)?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_record() {
        let bytes = JsonSerializer::new()
            .serialize(&Record::new(2, "b", "b@x"))
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"ID":2,"Username":"b","Email":"b@x"}"#
        );
    }

    #[test]
    fn test_serialize_escapes_strings() {
        let bytes = JsonSerializer::new()
            .serialize(&Record::new(3, "quote\"d", "c@x"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["Username"], "quote\"d");
    }

    #[test]
    fn test_write_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let records = vec![Record::new(1, "a", "a@x"), Record::new(2, "b", "b@x")];

        let written = write_json_file(&records, &path).unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(written, content.len());

        let parsed: Vec<Record> = serde_json::from_slice(&content).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_write_json_file_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("users.json");
        let err = write_json_file(&[Record::new(1, "a", "a@x")], &path).unwrap_err();
        assert!(matches!(err, FormatError::Io(_)));
    }
}
