//! Broker client abstraction and delivery events
//!
//! A [`BrokerClient`] accepts a message without blocking on the network and
//! owes exactly one [`DeliveryEvent`] for it on the [`DeliverySender`] it was
//! given. If `produce` returns an error, nothing is owed.
//!
//! # Implementations
//!
//! | Client | Feature | Use |
//! |--------|---------|-----|
//! | [`MemoryBroker`] | always | tests, `--dry-run` |
//! | `KafkaBroker` | `kafka` | real cluster via rskafka |

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::{MemoryBroker, StoredMessage};

#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;

use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;

/// Message handed to a broker client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Echoed back in the delivery report
    pub record_id: i32,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, Vec<u8>>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, record_id: i32, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            record_id,
            payload,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(Vec::as_slice)
    }
}

/// Broker's answer for one submitted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub record_id: i32,
    pub topic: String,
    pub partition: i32,
    /// Assigned offset on success
    pub offset: Option<i64>,
    /// Write failure, if any
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn success(record_id: i32, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            record_id,
            topic: topic.into(),
            partition,
            offset: Some(offset),
            error: None,
        }
    }

    pub fn failure(
        record_id: i32,
        topic: impl Into<String>,
        partition: i32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            record_id,
            topic: topic.into(),
            partition,
            offset: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Anything that can arrive on the delivery stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Outcome of one submitted message
    Report(DeliveryReport),
    /// Client-level error not tied to a message
    ClientError(String),
    /// Periodic client statistics
    Statistics(String),
}

impl fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryEvent::Report(r) => write!(f, "report for record {}", r.record_id),
            DeliveryEvent::ClientError(e) => write!(f, "client error: {}", e),
            DeliveryEvent::Statistics(s) => write!(f, "statistics: {}", s),
        }
    }
}

/// Sending half of the delivery stream, cloned into every in-flight produce
#[derive(Debug, Clone)]
pub struct DeliverySender {
    tx: mpsc::Sender<DeliveryEvent>,
}

impl DeliverySender {
    pub(crate) fn new(tx: mpsc::Sender<DeliveryEvent>) -> Self {
        Self { tx }
    }

    /// Post an event, waiting for buffer space.
    ///
    /// Returns `false` if the tracker is gone.
    pub async fn send(&self, event: DeliveryEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub async fn report(&self, report: DeliveryReport) -> bool {
        self.send(DeliveryEvent::Report(report)).await
    }
}

/// Non-blocking producer of messages with asynchronous delivery reports
pub trait BrokerClient: Send + Sync + 'static {
    /// Client name for logs
    fn name(&self) -> &str;

    /// Submit one message.
    ///
    /// On `Ok`, exactly one event for this message will later be posted on
    /// `reports`. On `Err` (e.g. local queue full) no event is owed.
    fn produce(&self, message: OutboundMessage, reports: &DeliverySender) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_headers() {
        let message = OutboundMessage::new("users", 1, b"{}".to_vec())
            .with_header("correlation-id", "abc");
        assert_eq!(message.header("correlation-id"), Some(&b"abc"[..]));
        assert_eq!(message.header("missing"), None);
    }

    #[test]
    fn test_report_constructors() {
        let ok = DeliveryReport::success(1, "users", 0, 42);
        assert!(ok.is_success());
        assert_eq!(ok.offset, Some(42));

        let failed = DeliveryReport::failure(2, "users", 0, "leader not available");
        assert!(!failed.is_success());
        assert_eq!(failed.offset, None);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(
            DeliveryEvent::ClientError("all brokers down".into()).to_string(),
            "client error: all brokers down"
        );
    }
}
