//! Kafka broker client
//!
//! Uses [rskafka](https://crates.io/crates/rskafka), a pure Rust Kafka
//! client with no librdkafka dependency. One partition client is opened for
//! the configured topic and partition at connect time.
//!
//! Each accepted message is produced from its own task; the report carries
//! the offset returned by the partition leader or the produce error. The
//! local queue is a semaphore: a submission that finds no free slot fails
//! immediately instead of waiting.
//!
//! Enable with the `kafka` feature:
//!
//! ```toml
//! fanline-core = { version = "0.1", features = ["kafka"] }
//! ```

use super::{BrokerClient, DeliveryReport, DeliverySender, OutboundMessage};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

/// [`BrokerClient`] backed by a Kafka partition leader
pub struct KafkaBroker {
    topic: String,
    partition: i32,
    client: Arc<PartitionClient>,
    queue_slots: Arc<Semaphore>,
    queue_limit: usize,
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("queue_limit", &self.queue_limit)
            .finish()
    }
}

impl KafkaBroker {
    /// Connect to the bootstrap servers and open the partition client.
    ///
    /// Any connection failure is a configuration error.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let client = ClientBuilder::new(config.bootstrap_servers.clone())
            .build()
            .await
            .map_err(|e| {
                Error::config(format!(
                    "failed to connect to Kafka at {}: {}",
                    config.bootstrap_servers.join(","),
                    e
                ))
            })?;

        let partition_client = client
            .partition_client(
                config.topic.clone(),
                config.partition,
                UnknownTopicHandling::Retry,
            )
            .await
            .map_err(|e| {
                Error::config(format!(
                    "failed to create partition client for {}[{}]: {}",
                    config.topic, config.partition, e
                ))
            })?;

        info!(
            brokers = %config.bootstrap_servers.join(","),
            topic = %config.topic,
            partition = config.partition,
            "Connected to Kafka"
        );

        Ok(Self {
            topic: config.topic.clone(),
            partition: config.partition,
            client: Arc::new(partition_client),
            queue_slots: Arc::new(Semaphore::new(config.max_queued_messages)),
            queue_limit: config.max_queued_messages,
        })
    }
}

fn to_kafka_record(message: OutboundMessage) -> Record {
    Record {
        key: None,
        value: Some(message.payload),
        headers: message.headers,
        timestamp: chrono::Utc::now(),
    }
}

impl BrokerClient for KafkaBroker {
    fn name(&self) -> &str {
        "kafka"
    }

    fn produce(&self, message: OutboundMessage, reports: &DeliverySender) -> Result<()> {
        let record_id = message.record_id;
        if message.topic != self.topic {
            return Err(Error::submission(
                record_id,
                format!(
                    "client is bound to topic '{}', not '{}'",
                    self.topic, message.topic
                ),
            ));
        }

        let slot = self.queue_slots.clone().try_acquire_owned().map_err(|_| {
            Error::submission(
                record_id,
                format!("local queue full ({} messages)", self.queue_limit),
            )
        })?;

        let client = self.client.clone();
        let reports = reports.clone();
        let topic = self.topic.clone();
        let partition = self.partition;

        tokio::spawn(
            async move {
                let record = to_kafka_record(message);
                let report = match client.produce(vec![record], Compression::NoCompression).await {
                    Ok(offsets) => match offsets.first() {
                        Some(offset) => {
                            DeliveryReport::success(record_id, topic, partition, *offset)
                        }
                        None => DeliveryReport::failure(
                            record_id,
                            topic,
                            partition,
                            "broker returned no offset",
                        ),
                    },
                    Err(e) => {
                        debug!(record_id, error = %e, "Kafka produce failed");
                        DeliveryReport::failure(record_id, topic, partition, e.to_string())
                    }
                };
                drop(slot);

                if !reports.report(report).await {
                    warn!(record_id, "Delivery stream closed, report dropped");
                }
            }
            .with_current_subscriber(),
        );
        Ok(())
    }
}
