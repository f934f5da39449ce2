//! Pipeline run: import, fan out tasks, collect outcomes
//!
//! One run submits up to three kinds of task to the executor:
//!
//! | Task | When | Work |
//! |------|------|------|
//! | JSON export | `export.json_path` set | all records as a JSON array |
//! | Avro export | `export.avro_path` set | all records as an Avro container |
//! | Publish | once per `pipeline.formats` entry | every batch through a `BatchProducer` |
//!
//! Each task reports exactly one [`TaskOutcome`] on a channel owned by the
//! run. A publish task stops at its first failed batch.

use crate::import;
use anyhow::{Context, Result};
use fanline_core::format::{write_avro_file, write_json_file};
use fanline_core::{
    batches, BatchProducer, BrokerClient, CorrelationId, Executor, FanlineConfig, LogHandle,
    LogService, MemoryBroker, PoolReport, ProducerConfig, Record, SerializationFormat, Task,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Kind of work a pool task performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    JsonExport,
    AvroExport,
    Publish(SerializationFormat),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::JsonExport => f.write_str("json-export"),
            TaskKind::AvroExport => f.write_str("avro-export"),
            TaskKind::Publish(format) => write!(f, "publish-{}", format),
        }
    }
}

/// Result of one pool task
#[derive(Debug)]
pub struct TaskOutcome {
    pub kind: TaskKind,
    pub elapsed: Duration,
    /// Human-readable detail on success
    pub result: Result<String>,
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunSummary {
    pub correlation_id: CorrelationId,
    pub records: usize,
    pub expected_tasks: usize,
    pub outcomes: Vec<TaskOutcome>,
    pub pool: PoolReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn failed_tasks(&self) -> usize {
        let failed = self.outcomes.iter().filter(|o| o.result.is_err()).count();
        let missing = self.expected_tasks.saturating_sub(self.outcomes.len());
        failed + missing
    }

    pub fn success(&self) -> bool {
        self.failed_tasks() == 0
    }
}

/// Run the whole pipeline with its own logging service
pub async fn run(config: FanlineConfig, verbose: bool) -> Result<RunSummary> {
    let logs =
        LogService::start(&config.logging, verbose).context("Failed to start logging service")?;
    let log = logs.handle();

    let result = log.attach(run_pipeline(config, log.clone())).await;
    if let Err(e) = &result {
        log.in_scope(|| error!("Run failed: {:#}", e));
    }

    logs.shutdown();
    result
}

async fn run_pipeline(config: FanlineConfig, log: LogHandle) -> Result<RunSummary> {
    let started = Instant::now();
    let correlation_id = CorrelationId::generate();
    info!(correlation_id = %correlation_id, "Starting fanline run");

    let import_started = Instant::now();
    let records: Arc<[Record]> = import::import_records(&config.input)
        .with_context(|| format!("Failed to import {}", config.input.path.display()))?
        .into();
    info!(
        records = records.len(),
        path = %config.input.path.display(),
        elapsed_ms = import_started.elapsed().as_millis() as u64,
        "Imported records"
    );

    let summary = if config.broker.dry_run {
        info!("Dry run: publishing to in-memory broker");
        let broker = MemoryBroker::new()
            .with_partition(config.broker.partition)
            .with_queue_limit(config.broker.max_queued_messages);
        run_tasks(Arc::new(broker), &config, records, correlation_id, &log).await?
    } else {
        connect_and_run(&config, records, correlation_id, &log).await?
    };

    let summary = RunSummary {
        elapsed: started.elapsed(),
        ..summary
    };
    log_summary(&summary);
    Ok(summary)
}

#[cfg(feature = "kafka")]
async fn connect_and_run(
    config: &FanlineConfig,
    records: Arc<[Record]>,
    correlation_id: CorrelationId,
    log: &LogHandle,
) -> Result<RunSummary> {
    let broker = fanline_core::KafkaBroker::connect(&config.broker)
        .await
        .context("Failed to connect to Kafka")?;
    run_tasks(Arc::new(broker), config, records, correlation_id, log).await
}

#[cfg(not(feature = "kafka"))]
async fn connect_and_run(
    _config: &FanlineConfig,
    _records: Arc<[Record]>,
    _correlation_id: CorrelationId,
    _log: &LogHandle,
) -> Result<RunSummary> {
    anyhow::bail!("fanline was built without the `kafka` feature; use --dry-run")
}

async fn run_tasks<B: BrokerClient>(
    broker: Arc<B>,
    config: &FanlineConfig,
    records: Arc<[Record]>,
    correlation_id: CorrelationId,
    log: &LogHandle,
) -> Result<RunSummary> {
    let exports: Vec<(TaskKind, PathBuf)> = [
        (TaskKind::JsonExport, config.export.json_path.clone()),
        (TaskKind::AvroExport, config.export.avro_path.clone()),
    ]
    .into_iter()
    .filter_map(|(kind, path)| path.map(|p| (kind, p)))
    .collect();
    let expected_tasks = exports.len() + config.pipeline.formats.len();

    // Every producer exists before any task starts, so a sizing error
    // leaves nothing running
    let mut producers = Vec::with_capacity(config.pipeline.formats.len());
    for format in &config.pipeline.formats {
        let serializer = format
            .create_serializer()
            .with_context(|| format!("Failed to create {} serializer", format))?;
        let producer = BatchProducer::new(
            broker.clone(),
            serializer,
            ProducerConfig::from_config(config),
            log,
        )?;
        producers.push((*format, producer));
    }

    // Sized so no task ever waits to report
    let (results_tx, mut results_rx) = mpsc::channel(expected_tasks.max(1));

    let executor = Executor::start(config.pipeline.workers, log)?;
    info!(
        workers = executor.workers(),
        tasks = expected_tasks,
        broker = broker.name(),
        "Submitting tasks"
    );

    let mut tasks: Vec<Task> = exports
        .into_iter()
        .map(|(kind, path)| export_task(kind, path, records.clone(), log.clone(), results_tx.clone()))
        .collect();
    tasks.extend(producers.into_iter().map(|(format, producer)| {
        publish_task(
            format,
            producer,
            records.clone(),
            config.pipeline.batch_size,
            correlation_id.clone(),
            results_tx.clone(),
        )
    }));
    drop(results_tx);

    for task in tasks {
        if let Err(e) = executor.submit(task).await {
            // Wait for whatever was already accepted before giving up
            let _ = executor.shutdown().await;
            return Err(e).context("Failed to submit task");
        }
    }

    let pool = executor.shutdown().await?;

    let mut outcomes = Vec::with_capacity(expected_tasks);
    while let Some(outcome) = results_rx.recv().await {
        outcomes.push(outcome);
    }

    Ok(RunSummary {
        correlation_id,
        records: records.len(),
        expected_tasks,
        outcomes,
        pool,
        elapsed: Duration::ZERO,
    })
}

fn export_task(
    kind: TaskKind,
    path: PathBuf,
    records: Arc<[Record]>,
    log: LogHandle,
    results: mpsc::Sender<TaskOutcome>,
) -> Task {
    Task::new(move || async move {
        let started = Instant::now();
        let written = tokio::task::spawn_blocking(move || {
            log.in_scope(|| -> Result<String> {
                let bytes = match kind {
                    TaskKind::AvroExport => write_avro_file(&records, &path),
                    _ => write_json_file(&records, &path),
                }
                .with_context(|| format!("Failed to write {}", path.display()))?;
                debug!(%kind, bytes, path = %path.display(), "Export written");
                Ok(format!(
                    "{} records, {} bytes to {}",
                    records.len(),
                    bytes,
                    path.display()
                ))
            })
        })
        .await;

        let result = match written {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("export task aborted: {}", e)),
        };
        let _ = results
            .send(TaskOutcome {
                kind,
                elapsed: started.elapsed(),
                result,
            })
            .await;
    })
}

fn publish_task<B: BrokerClient>(
    format: SerializationFormat,
    mut producer: BatchProducer<B>,
    records: Arc<[Record]>,
    batch_size: usize,
    correlation_id: CorrelationId,
    results: mpsc::Sender<TaskOutcome>,
) -> Task {
    Task::new(move || async move {
        let started = Instant::now();
        let published = publish_all(&mut producer, &records, batch_size, &correlation_id).await;
        let closed = producer.close().context("Delivery tracker not drained");

        let result = published.and_then(|detail| closed.map(|()| detail));
        let _ = results
            .send(TaskOutcome {
                kind: TaskKind::Publish(format),
                elapsed: started.elapsed(),
                result,
            })
            .await;
    })
}

async fn publish_all<B: BrokerClient>(
    producer: &mut BatchProducer<B>,
    records: &[Record],
    batch_size: usize,
    correlation_id: &CorrelationId,
) -> Result<String> {
    let chunks = batches(records, batch_size)?;
    let total = chunks.len();
    let mut delivered = 0;

    for (index, batch) in chunks.enumerate() {
        let summary = producer
            .produce_batch(batch, correlation_id)
            .await
            .with_context(|| format!("Batch {}/{} failed", index + 1, total))?;
        delivered += summary.delivered;
        debug!(
            format = producer.serializer_name(),
            batch = index + 1,
            total,
            delivered = summary.delivered,
            "Batch confirmed"
        );
    }

    Ok(format!("{} records delivered in {} batch(es)", delivered, total))
}

fn log_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        match &outcome.result {
            Ok(detail) => info!(task = %outcome.kind, elapsed_ms, "{}", detail),
            Err(e) => error!(task = %outcome.kind, elapsed_ms, "{:#}", e),
        }
    }

    if summary.pool.panicked > 0 {
        error!(panicked = summary.pool.panicked, "Tasks panicked without reporting");
    }

    info!(
        correlation_id = %summary.correlation_id,
        records = summary.records,
        tasks = summary.expected_tasks,
        failed = summary.failed_tasks(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Run finished"
    );
}
