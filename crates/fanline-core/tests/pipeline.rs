//! End-to-end pipeline tests: executor, producers and the in-memory broker

use fanline_core::{
    batches, BatchProducer, CorrelationId, Executor, LogHandle, MemoryBroker, ProducerConfig,
    Record, SerializationFormat, Task, CORRELATION_ID_HEADER,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn records(n: i32) -> Arc<[Record]> {
    (1..=n)
        .map(|i| Record::new(i, format!("user{i}"), format!("user{i}@example.com")))
        .collect()
}

fn producer_config(batch_size: usize) -> ProducerConfig {
    ProducerConfig {
        topic: "users".to_string(),
        max_in_flight: batch_size,
        submit_concurrency: 8,
        delivery_buffer: batch_size,
    }
}

#[derive(Debug)]
struct PublishOutcome {
    format: SerializationFormat,
    delivered: usize,
    failed_batches: usize,
}

fn publish_task(
    broker: MemoryBroker,
    format: SerializationFormat,
    records: Arc<[Record]>,
    batch_size: usize,
    correlation_id: CorrelationId,
    results: mpsc::Sender<PublishOutcome>,
) -> Task {
    Task::new(move || async move {
        let mut producer = BatchProducer::new(
            Arc::new(broker),
            format.create_serializer().unwrap(),
            producer_config(batch_size),
            &LogHandle::disabled(),
        )
        .unwrap();

        let mut delivered = 0;
        let mut failed_batches = 0;
        for batch in batches(&records, batch_size).unwrap() {
            match producer.produce_batch(batch, &correlation_id).await {
                Ok(summary) => delivered += summary.delivered,
                Err(_) => {
                    failed_batches += 1;
                    break;
                }
            }
        }
        producer.close().unwrap();

        results
            .send(PublishOutcome {
                format,
                delivered,
                failed_batches,
            })
            .await
            .unwrap();
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publish_json_and_avro_through_pool() {
    let log = LogHandle::disabled();
    let executor = Executor::start(3, &log).unwrap();
    let broker = MemoryBroker::new();
    let records = records(250);
    let correlation_id = CorrelationId::generate();
    let (results_tx, mut results_rx) = mpsc::channel(4);

    for format in [SerializationFormat::Json, SerializationFormat::Avro] {
        executor
            .submit(publish_task(
                broker.clone(),
                format,
                records.clone(),
                40,
                correlation_id.clone(),
                results_tx.clone(),
            ))
            .await
            .unwrap();
    }
    drop(results_tx);

    let report = executor.shutdown().await.unwrap();
    assert_eq!(report.total_executed(), 2);
    assert_eq!(report.panicked, 0);

    let mut outcomes = Vec::new();
    while let Some(outcome) = results_rx.recv().await {
        outcomes.push(outcome);
    }
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert_eq!(outcome.delivered, 250, "format {}", outcome.format);
        assert_eq!(outcome.failed_batches, 0);
    }

    let published = broker.published();
    assert_eq!(published.len(), 500);
    assert!(published
        .iter()
        .all(|m| m.message.header(CORRELATION_ID_HEADER) == Some(correlation_id.as_bytes())));

    let mut offsets: Vec<i64> = published.iter().map(|m| m.offset).collect();
    offsets.sort();
    assert_eq!(offsets, (0..500).collect::<Vec<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_batch_stops_only_its_publish_task() {
    let log = LogHandle::disabled();
    let executor = Executor::start(2, &log).unwrap();
    let broker = MemoryBroker::new();
    // Record 15 sits in the second batch of 10
    broker.fail_delivery(15, "leader not available");
    let records = records(30);
    let (results_tx, mut results_rx) = mpsc::channel(2);

    executor
        .submit(publish_task(
            broker.clone(),
            SerializationFormat::Json,
            records,
            10,
            CorrelationId::generate(),
            results_tx,
        ))
        .await
        .unwrap();

    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let c = counter.clone();
    executor
        .submit(Task::from_fn(move || {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }))
        .await
        .unwrap();

    executor.shutdown().await.unwrap();

    let outcome = results_rx.recv().await.unwrap();
    assert_eq!(outcome.failed_batches, 1);
    assert_eq!(outcome.delivered, 10);
    // Nine records of the failing batch still reached the broker
    assert_eq!(broker.published().len(), 19);
    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
}
