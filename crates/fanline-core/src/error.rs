//! Error types for fanline-core
//!
//! One error enum covers the whole pipeline so that batch failures, tracker
//! misuse and configuration problems can be collected side by side.

use crate::format::FormatError;
use thiserror::Error;

/// Result type alias for fanline-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fanline-core
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (worker count, batch size, buffer sizing,
    /// unreachable broker). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A record could not be encoded
    #[error("serialization failed for record {record_id}: {source}")]
    Serialization {
        record_id: i32,
        #[source]
        source: FormatError,
    },

    /// The broker client rejected a produce call (e.g. local queue full)
    #[error("submission failed for record {record_id}: {reason}")]
    Submission { record_id: i32, reason: String },

    /// The broker acknowledged a write failure
    #[error("delivery failed for record {record_id} on {topic}[{partition}]: {reason}")]
    Delivery {
        record_id: i32,
        topic: String,
        partition: i32,
        reason: String,
    },

    /// An event on the delivery stream was not a delivery report
    #[error("unexpected delivery event: {0}")]
    UnexpectedEvent(String),

    /// `wait_one` called with no submitted message outstanding
    #[error("no delivery report outstanding")]
    NothingOutstanding,

    /// The delivery stream ended while reports were still owed
    #[error("delivery report stream closed with {outstanding} report(s) outstanding")]
    ReportStreamClosed { outstanding: usize },

    /// The tracker was closed before every report was drained
    #[error("delivery tracker closed with {outstanding} outstanding and {buffered} buffered report(s)")]
    UndrainedReports { outstanding: usize, buffered: usize },

    /// The fan-out driver terminated abnormally; in-flight tasks are lost
    #[error("fan-out distributor aborted: {0}")]
    DistributorAborted(String),

    /// Record import failed
    #[error("import error: {0}")]
    Import(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a submission error
    pub fn submission(record_id: i32, reason: impl Into<String>) -> Self {
        Self::Submission {
            record_id,
            reason: reason.into(),
        }
    }

    /// Create an import error
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this error happened before the message reached the broker
    pub fn is_submission_phase(&self) -> bool {
        matches!(self, Self::Serialization { .. } | Self::Submission { .. })
    }

    /// Check if this error is a broker-side delivery failure
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery { .. })
    }

    /// Record the error refers to, if any
    pub fn record_id(&self) -> Option<i32> {
        match self {
            Self::Serialization { record_id, .. }
            | Self::Submission { record_id, .. }
            | Self::Delivery { record_id, .. } => Some(*record_id),
            _ => None,
        }
    }
}
