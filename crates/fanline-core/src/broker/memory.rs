//! In-process broker
//!
//! Accepts messages like a real client (non-blocking submit, report posted
//! later from a spawned task) and keeps every delivered message in memory.
//! Failures can be injected per record id, and deliveries can be paused to
//! hold messages in the local queue.

use super::{BrokerClient, DeliveryEvent, DeliveryReport, DeliverySender, OutboundMessage};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::{trace, warn};

/// A delivered message with its assigned position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub partition: i32,
    pub offset: i64,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone)]
enum Response {
    Fail(String),
    Event(DeliveryEvent),
}

#[derive(Debug)]
struct Inner {
    next_offset: AtomicI64,
    queued: AtomicUsize,
    stored: Mutex<Vec<StoredMessage>>,
    rejections: Mutex<HashSet<i32>>,
    responses: Mutex<HashMap<i32, Response>>,
    // true while deliveries are held back
    paused: watch::Sender<bool>,
}

/// In-memory [`BrokerClient`]
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    partition: i32,
    queue_limit: Option<usize>,
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Broker writing to partition 0 with an unbounded local queue
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            partition: 0,
            queue_limit: None,
            inner: Arc::new(Inner {
                next_offset: AtomicI64::new(0),
                queued: AtomicUsize::new(0),
                stored: Mutex::new(Vec::new()),
                rejections: Mutex::new(HashSet::new()),
                responses: Mutex::new(HashMap::new()),
                paused,
            }),
        }
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    /// Reject submissions while `limit` messages await delivery
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    /// Refuse to accept the given record at submit time
    pub fn reject(&self, record_id: i32) {
        self.inner.rejections.lock().insert(record_id);
    }

    /// Accept the given record but report a write failure for it
    pub fn fail_delivery(&self, record_id: i32, reason: impl Into<String>) {
        self.inner
            .responses
            .lock()
            .insert(record_id, Response::Fail(reason.into()));
    }

    /// Answer the given record with an arbitrary event instead of a report
    pub fn respond_with(&self, record_id: i32, event: DeliveryEvent) {
        self.inner
            .responses
            .lock()
            .insert(record_id, Response::Event(event));
    }

    /// Hold back deliveries until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    /// Messages accepted but not yet reported
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    /// Every successfully delivered message, in delivery order
    pub fn published(&self) -> Vec<StoredMessage> {
        self.inner.stored.lock().clone()
    }

    fn enqueue(&self, record_id: i32) -> Result<()> {
        let previous = self.inner.queued.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.queue_limit {
            if previous >= limit {
                self.inner.queued.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::submission(
                    record_id,
                    format!("local queue full ({} messages)", limit),
                ));
            }
        }
        Ok(())
    }
}

impl Inner {
    fn complete(
        &self,
        partition: i32,
        message: OutboundMessage,
        response: Option<Response>,
    ) -> DeliveryEvent {
        match response {
            None => {
                let offset = self.next_offset.fetch_add(1, Ordering::AcqRel);
                let report =
                    DeliveryReport::success(message.record_id, &message.topic, partition, offset);
                self.stored.lock().push(StoredMessage {
                    partition,
                    offset,
                    message,
                });
                DeliveryEvent::Report(report)
            }
            Some(Response::Fail(reason)) => DeliveryEvent::Report(DeliveryReport::failure(
                message.record_id,
                &message.topic,
                partition,
                reason,
            )),
            Some(Response::Event(event)) => event,
        }
    }
}

impl BrokerClient for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    fn produce(&self, message: OutboundMessage, reports: &DeliverySender) -> Result<()> {
        let record_id = message.record_id;
        if self.inner.rejections.lock().contains(&record_id) {
            return Err(Error::submission(record_id, "rejected by broker client"));
        }
        self.enqueue(record_id)?;

        let response = self.inner.responses.lock().get(&record_id).cloned();
        let partition = self.partition;
        let inner = self.inner.clone();
        let reports = reports.clone();
        let mut paused = inner.paused.subscribe();

        tokio::spawn(
            async move {
                let _ = paused.wait_for(|held| !*held).await;
                let event = inner.complete(partition, message, response);
                inner.queued.fetch_sub(1, Ordering::AcqRel);
                trace!(record_id, %event, "Memory broker delivered");
                if !reports.send(event).await {
                    warn!(record_id, "Delivery stream closed, report dropped");
                }
            }
            .with_current_subscriber(),
        );
        Ok(())
    }
}
