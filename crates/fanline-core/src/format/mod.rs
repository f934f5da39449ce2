//! Record serializers
//!
//! Serializers turn one [`Record`] into message bytes. The batch producer
//! treats them as black boxes behind [`RecordSerializer`], so JSON and Avro
//! are interchangeable per publish task.
//!
//! | Format | Content type | Payload |
//! |--------|--------------|---------|
//! | JSON | `application/json` | `{"ID":1,"Username":"a","Email":"a@x"}` |
//! | Avro | `application/avro` | binary datum, fixed `User` schema |
//!
//! Both modules also provide a whole-dataset file export (JSON array,
//! Avro object container file).

pub mod avro;
pub mod json;

pub use avro::{write_avro_file, AvroSerializer, USER_SCHEMA};
pub use json::{write_json_file, JsonSerializer};

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Trait for serializers that encode a single record to message bytes
pub trait RecordSerializer: Send + Sync {
    /// Format name (e.g., "json", "avro")
    fn name(&self) -> &'static str;

    /// MIME type of the produced payload
    fn content_type(&self) -> &'static str;

    /// Encode one record
    fn serialize(&self, record: &Record) -> Result<Vec<u8>, FormatError>;
}

/// Errors that can occur while encoding records
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Avro error: {0}")]
    Avro(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialization format selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    #[default]
    Json,
    Avro,
}

impl SerializationFormat {
    /// Create the serializer for this format
    pub fn create_serializer(&self) -> Result<Arc<dyn RecordSerializer>, FormatError> {
        Ok(match self {
            SerializationFormat::Json => Arc::new(JsonSerializer::new()),
            SerializationFormat::Avro => Arc::new(AvroSerializer::new()?),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SerializationFormat::Json => "json",
            SerializationFormat::Avro => "avro",
        }
    }
}

impl std::fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
