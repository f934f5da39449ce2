//! Batch producer
//!
//! Publishes one batch of records concurrently and returns only once the
//! outcome of every submitted record is known.
//!
//! # Per-batch flow
//!
//! 1. One task per record, bounded by `submit_concurrency` permits:
//!    serialize, attach the `correlation-id` header, hand the message to the
//!    broker client. Every task reports exactly one [`SubmitOutcome`].
//! 2. The supervisor collects one outcome per record.
//! 3. The `S` accepted messages are registered with the tracker, which is
//!    then drained exactly `S` times, whatever failed earlier.
//!
//! After every call, successful or not, the tracker owes nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut producer = BatchProducer::new(broker, serializer, config, &log)?;
//! for batch in batches(&records, 10_000)? {
//!     let summary = producer.produce_batch(batch, &correlation_id).await?;
//! }
//! producer.close()?;
//! ```

use crate::broker::{BrokerClient, DeliverySender, OutboundMessage};
use crate::config::FanlineConfig;
use crate::error::{Error, Result};
use crate::format::RecordSerializer;
use crate::logging::LogHandle;
use crate::record::{CorrelationId, Record, CORRELATION_ID_HEADER};
use crate::tracker::DeliveryTracker;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Producer sizing
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Target topic
    pub topic: String,
    /// Largest batch accepted by `produce_batch`
    pub max_in_flight: usize,
    /// Concurrent per-record submissions
    pub submit_concurrency: usize,
    /// Delivery stream capacity
    pub delivery_buffer: usize,
}

impl ProducerConfig {
    pub fn from_config(config: &FanlineConfig) -> Self {
        Self {
            topic: config.broker.topic.clone(),
            max_in_flight: config.pipeline.batch_size,
            submit_concurrency: config.pipeline.submit_concurrency,
            delivery_buffer: config.pipeline.delivery_buffer,
        }
    }
}

/// A batch in which every record was delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub records: usize,
    pub delivered: usize,
    pub elapsed: Duration,
}

/// A batch with at least one failed record.
///
/// Holds every failure: submission-phase failures first, in the order they
/// were observed, then delivery failures.
#[derive(Debug)]
pub struct BatchError {
    first: Error,
    rest: Vec<Error>,
    records: usize,
    delivered: usize,
}

impl BatchError {
    fn from_failures(failures: Vec<Error>, records: usize, delivered: usize) -> Option<Self> {
        let mut failures = failures.into_iter();
        let first = failures.next()?;
        Some(Self {
            first,
            rest: failures.collect(),
            records,
            delivered,
        })
    }

    fn single(error: Error, records: usize) -> Self {
        Self {
            first: error,
            rest: Vec::new(),
            records,
            delivered: 0,
        }
    }

    /// Primary failure
    pub fn first(&self) -> &Error {
        &self.first
    }

    /// All failures, primary first
    pub fn failures(&self) -> impl Iterator<Item = &Error> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }

    pub fn failure_count(&self) -> usize {
        1 + self.rest.len()
    }

    /// Records in the batch
    pub fn records(&self) -> usize {
        self.records
    }

    /// Records confirmed despite the failure
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        write!(
            f,
            " (batch of {}: {} failure(s), {} delivered)",
            self.records,
            self.failure_count(),
            self.delivered
        )
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.first)
    }
}

/// What one per-record submit task observed
#[derive(Debug)]
enum SubmitOutcome {
    Submitted,
    Failed(Error),
}

/// Publishes batches through a broker client and drains their reports
pub struct BatchProducer<B: BrokerClient> {
    broker: Arc<B>,
    serializer: Arc<dyn RecordSerializer>,
    config: ProducerConfig,
    tracker: DeliveryTracker,
    reports: DeliverySender,
    submit_slots: Arc<Semaphore>,
    log: LogHandle,
}

impl<B: BrokerClient> fmt::Debug for BatchProducer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProducer")
            .field("broker", &self.broker.name())
            .field("serializer", &self.serializer.name())
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl<B: BrokerClient> BatchProducer<B> {
    /// Create a producer with its own tracker.
    ///
    /// Fails with a configuration error when the delivery buffer cannot hold
    /// a full batch or a sizing value is zero.
    pub fn new(
        broker: Arc<B>,
        serializer: Arc<dyn RecordSerializer>,
        config: ProducerConfig,
        log: &LogHandle,
    ) -> Result<Self> {
        if config.max_in_flight == 0 {
            return Err(Error::config("max in-flight batch size must be at least 1"));
        }
        if config.submit_concurrency == 0 {
            return Err(Error::config("submit concurrency must be at least 1"));
        }
        let (tracker, reports) = DeliveryTracker::new(config.delivery_buffer, config.max_in_flight)?;

        Ok(Self {
            submit_slots: Arc::new(Semaphore::new(config.submit_concurrency)),
            broker,
            serializer,
            config,
            tracker,
            reports,
            log: log.clone(),
        })
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn serializer_name(&self) -> &'static str {
        self.serializer.name()
    }

    /// Publish one batch and wait for every accepted record's report
    pub async fn produce_batch(
        &mut self,
        records: &[Record],
        correlation_id: &CorrelationId,
    ) -> std::result::Result<BatchSummary, BatchError> {
        let started = Instant::now();
        let batch_len = records.len();

        if batch_len > self.config.max_in_flight {
            return Err(BatchError::single(
                Error::config(format!(
                    "batch of {} records exceeds the in-flight limit of {}",
                    batch_len, self.config.max_in_flight
                )),
                batch_len,
            ));
        }
        if batch_len == 0 {
            return Ok(BatchSummary {
                records: 0,
                delivered: 0,
                elapsed: started.elapsed(),
            });
        }

        let (submitted, mut failures) = self.submit_all(records, correlation_id).await;

        self.tracker.register(submitted);
        let mut delivered = 0;
        for _ in 0..submitted {
            match self.tracker.wait_one().await {
                Ok(_) => delivered += 1,
                Err(e @ Error::ReportStreamClosed { .. }) => {
                    failures.push(e);
                    break;
                }
                Err(e) => {
                    self.log
                        .in_scope(|| debug!(error = %e, "Record not delivered"));
                    failures.push(e);
                }
            }
        }

        let elapsed = started.elapsed();
        match BatchError::from_failures(failures, batch_len, delivered) {
            None => {
                self.log.in_scope(|| {
                    info!(
                        records = batch_len,
                        format = self.serializer.name(),
                        content_type = self.serializer.content_type(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Batch delivered"
                    )
                });
                Ok(BatchSummary {
                    records: batch_len,
                    delivered,
                    elapsed,
                })
            }
            Some(err) => {
                self.log.in_scope(|| {
                    warn!(
                        records = batch_len,
                        delivered,
                        failures = err.failure_count(),
                        error = %err.first(),
                        "Batch failed"
                    )
                });
                Err(err)
            }
        }
    }

    /// Fan out one submit task per record and collect every outcome.
    ///
    /// Returns the number of accepted messages and the submission failures.
    async fn submit_all(
        &self,
        records: &[Record],
        correlation_id: &CorrelationId,
    ) -> (usize, Vec<Error>) {
        let (results_tx, mut results_rx) = mpsc::channel(records.len());

        for (index, record) in records.iter().enumerate() {
            let ctx = SubmitContext {
                broker: self.broker.clone(),
                serializer: self.serializer.clone(),
                reports: self.reports.clone(),
                topic: self.config.topic.clone(),
                correlation_id: correlation_id.clone(),
            };
            let slots = self.submit_slots.clone();
            let results = results_tx.clone();
            let record = record.clone();

            tokio::spawn(self.log.attach(async move {
                let record_id = record.id;
                let outcome = match slots.acquire_owned().await {
                    Ok(_slot) => AssertUnwindSafe(async { ctx.submit(&record) })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::submission(record_id, "submit task panicked"))
                        }),
                    Err(_) => Err(Error::submission(record_id, "submit slots closed")),
                };
                let outcome = match outcome {
                    Ok(()) => SubmitOutcome::Submitted,
                    Err(e) => SubmitOutcome::Failed(e),
                };
                let _ = results.send((index, outcome)).await;
            }));
        }
        drop(results_tx);

        let mut reported = vec![false; records.len()];
        let mut submitted = 0;
        let mut failures = Vec::new();
        for _ in 0..records.len() {
            let Some((index, outcome)) = results_rx.recv().await else {
                break;
            };
            reported[index] = true;
            match outcome {
                SubmitOutcome::Submitted => submitted += 1,
                SubmitOutcome::Failed(e) => failures.push(e),
            }
        }

        for (record, _) in records.iter().zip(&reported).filter(|(_, seen)| !**seen) {
            failures.push(Error::submission(
                record.id,
                "submit task exited without reporting",
            ));
        }

        (submitted, failures)
    }

    /// Close the tracker; fails if anything is still owed
    pub fn close(self) -> Result<()> {
        let log = self.log;
        log.in_scope(|| self.tracker.close())
    }
}

struct SubmitContext<B> {
    broker: Arc<B>,
    serializer: Arc<dyn RecordSerializer>,
    reports: DeliverySender,
    topic: String,
    correlation_id: CorrelationId,
}

impl<B: BrokerClient> SubmitContext<B> {
    fn submit(&self, record: &Record) -> Result<()> {
        let payload = self
            .serializer
            .serialize(record)
            .map_err(|source| Error::Serialization {
                record_id: record.id,
                source,
            })?;
        let message = OutboundMessage::new(self.topic.as_str(), record.id, payload)
            .with_header(CORRELATION_ID_HEADER, self.correlation_id.as_bytes());
        self.broker.produce(message, &self.reports)
    }
}
