//! Avro serializer and object container file export
//!
//! Records are encoded against a fixed schema:
//!
//! ```json
//! {"type": "record", "name": "User", "namespace": "fanline",
//!  "fields": [{"name": "ID", "type": "int"},
//!             {"name": "Username", "type": "string"},
//!             {"name": "Email", "type": "string"}]}
//! ```
//!
//! Message payloads are bare binary datums (no container, no schema-id
//! prefix); the file export wraps all records in one OCF container.

use super::{FormatError, RecordSerializer};
use crate::record::Record;
use apache_avro::types::Value;
use apache_avro::{Codec, Schema, Writer};
use std::path::Path;

/// Fixed Avro schema for [`Record`]
pub const USER_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "User",
    "namespace": "fanline",
    "fields": [
        {"name": "ID", "type": "int"},
        {"name": "Username", "type": "string"},
        {"name": "Email", "type": "string"}
    ]
}
"#;

fn parse_user_schema() -> Result<Schema, FormatError> {
    Schema::parse_str(USER_SCHEMA).map_err(|e| FormatError::Schema(e.to_string()))
}

fn to_avro_value(record: &Record) -> Value {
    Value::Record(vec![
        ("ID".to_string(), Value::Int(record.id)),
        ("Username".to_string(), Value::String(record.username.clone())),
        ("Email".to_string(), Value::String(record.email.clone())),
    ])
}

/// Encodes a record as an Avro binary datum
#[derive(Debug, Clone)]
pub struct AvroSerializer {
    schema: Schema,
}

impl AvroSerializer {
    /// Create a serializer with the parsed [`USER_SCHEMA`]
    pub fn new() -> Result<Self, FormatError> {
        Ok(Self {
            schema: parse_user_schema()?,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl RecordSerializer for AvroSerializer {
    fn name(&self) -> &'static str {
        "avro"
    }

    fn content_type(&self) -> &'static str {
        "application/avro"
    }

    fn serialize(&self, record: &Record) -> Result<Vec<u8>, FormatError> {
        apache_avro::to_avro_datum(&self.schema, to_avro_value(record))
            .map_err(|e| FormatError::Avro(e.to_string()))
    }
}

/// Write all records to `path` as an Avro object container file.
///
/// Returns the number of bytes written.
pub fn write_avro_file(records: &[Record], path: &Path) -> Result<usize, FormatError> {
    let schema = parse_user_schema()?;
    let mut writer = Writer::with_codec(&schema, Vec::new(), Codec::Null);

    for record in records {
        writer
            .append(to_avro_value(record))
            .map_err(|e| FormatError::Avro(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| FormatError::Avro(e.to_string()))?;
    std::fs::write(path, &bytes)?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apache_avro::Reader;

    #[test]
    fn test_serialize_decodes_with_schema() {
        let serializer = AvroSerializer::new().unwrap();
        let record = Record::new(42, "alice", "alice@example.com");

        let bytes = serializer.serialize(&record).unwrap();
        let decoded =
            apache_avro::from_avro_datum(serializer.schema(), &mut bytes.as_slice(), None)
                .unwrap();

        assert_eq!(decoded, to_avro_value(&record));
    }

    #[test]
    fn test_payload_is_bare_datum() {
        let bytes = AvroSerializer::new()
            .unwrap()
            .serialize(&Record::new(1, "a", "a@x"))
            .unwrap();
        // zigzag(1) = 0x02, then length-prefixed "a" and "a@x"
        assert_eq!(bytes, vec![0x02, 0x02, b'a', 0x06, b'a', b'@', b'x']);
    }

    #[test]
    fn test_write_avro_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.avro");
        let records = vec![Record::new(1, "a", "a@x"), Record::new(2, "b", "b@x")];

        let written = write_avro_file(&records, &path).unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(written, content.len());
        assert_eq!(&content[0..4], b"Obj\x01");

        let reader = Reader::new(content.as_slice()).unwrap();
        let values: Vec<Value> = reader.map(|v| v.unwrap()).collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1], to_avro_value(&records[1]));
    }
}
