//! fanline-core - Fan-out record publishing for Fanline
//!
//! Publishes an in-memory set of records to a broker topic, spreading the
//! work over a fixed pool of workers and confirming every delivery before a
//! batch counts as done.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Executor                                                     │
//! │  submit(Task) ──► fanout::split ──► WorkerPool (N workers)    │
//! ├───────────────────────────────────────────────────────────────┤
//! │  Task body: BatchProducer::produce_batch                      │
//! │  ├── per-record submit tasks (serializer + broker client)     │
//! │  └── DeliveryTracker drained once per accepted message        │
//! ├───────────────────────────────────────────────────────────────┤
//! │  Collaborators                                                │
//! │  ├── format: JSON / Avro serializers, file exports            │
//! │  ├── broker: MemoryBroker, KafkaBroker (feature "kafka")      │
//! │  ├── config: YAML + env expansion + validation                │
//! │  └── logging: LogService / LogHandle                          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use fanline_core::{
//!     batches, BatchProducer, CorrelationId, Executor, LogService, MemoryBroker,
//!     ProducerConfig, SerializationFormat, Task,
//! };
//!
//! let logs = LogService::start(&config.logging, false)?;
//! let log = logs.handle();
//! let executor = Executor::start(config.pipeline.workers, &log)?;
//!
//! let mut producer = BatchProducer::new(
//!     broker,
//!     SerializationFormat::Json.create_serializer()?,
//!     ProducerConfig::from_config(&config),
//!     &log,
//! )?;
//! executor
//!     .submit(Task::new(move || async move {
//!         let Ok(chunks) = batches(&records, 10_000) else { return };
//!         for batch in chunks {
//!             if producer.produce_batch(batch, &correlation_id).await.is_err() {
//!                 break;
//!             }
//!         }
//!     }))
//!     .await?;
//!
//! executor.shutdown().await?;
//! logs.shutdown();
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod format;
pub mod logging;
pub mod pool;
pub mod producer;
pub mod record;
pub mod task;
pub mod tracker;

pub use broker::{
    BrokerClient, DeliveryEvent, DeliveryReport, DeliverySender, MemoryBroker, OutboundMessage,
    StoredMessage,
};
#[cfg(feature = "kafka")]
pub use broker::KafkaBroker;
pub use config::{
    BrokerConfig, ExportConfig, FanlineConfig, InputConfig, LoggingConfig, PipelineConfig,
};
pub use error::{Error, Result};
pub use executor::Executor;
pub use fanout::{split, FanOut};
pub use format::{FormatError, RecordSerializer, SerializationFormat};
pub use logging::{LogHandle, LogService};
pub use pool::{PoolReport, WorkerPool};
pub use producer::{BatchError, BatchProducer, BatchSummary, ProducerConfig};
pub use record::{batches, CorrelationId, Record, CORRELATION_ID_HEADER};
pub use task::Task;
pub use tracker::DeliveryTracker;
