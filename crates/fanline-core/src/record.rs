//! Record model, correlation id and batching

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Header carrying the run-scoped correlation id on every message
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// One imported user record.
///
/// Records are created once by the importer and only ever shared
/// read-only afterwards; the concurrent producer relies on that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "ID")]
    pub id: i32,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Email")]
    pub email: String,
}

impl Record {
    pub fn new(id: i32, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
        }
    }
}

/// Opaque token attached to every message of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a fresh random (UUID v4) correlation id
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split records into contiguous fixed-size batches.
///
/// The last batch may be shorter than `batch_size`. A zero batch size is a
/// configuration error.
pub fn batches(records: &[Record], batch_size: usize) -> Result<std::slice::Chunks<'_, Record>> {
    if batch_size == 0 {
        return Err(Error::config("batch size must be at least 1"));
    }
    Ok(records.chunks(batch_size))
}
