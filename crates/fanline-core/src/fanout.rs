//! Fan-out distributor
//!
//! Splits one inbound stream into `n` outbound streams, forwarding items in
//! strict round-robin order: item `i` goes to stream `i mod n`.
//!
//! The driver reserves a slot on the next outbound stream *before* pulling
//! the next inbound item. Outbound streams have capacity one, so at most one
//! item is parked per stream and a busy consumer holds the distributor back.
//!
//! ```text
//!                      ┌──► stream 0 ──► worker 0
//! inbound ──► driver ──┼──► stream 1 ──► worker 1
//!                      └──► stream 2 ──► worker 2
//! ```
//!
//! When the inbound stream closes, every outbound stream is closed and the
//! driver resolves to the number of items it forwarded.

use crate::error::{Error, Result};
use crate::logging::LogHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Slots per outbound stream
const OUTBOUND_CAPACITY: usize = 1;

/// Result of [`split`]: the outbound streams and the running driver
#[derive(Debug)]
pub struct FanOut<T> {
    /// Outbound streams, indexed by round-robin position
    pub streams: Vec<mpsc::Receiver<T>>,
    /// Driver task; resolves to the number of forwarded items
    pub driver: JoinHandle<u64>,
}

/// Split `inbound` into `n` round-robin outbound streams.
///
/// Fails with a configuration error when `n` is zero; in that case no
/// channel is created and no task is spawned.
pub fn split<T: Send + 'static>(
    inbound: mpsc::Receiver<T>,
    n: usize,
    log: &LogHandle,
) -> Result<FanOut<T>> {
    if n == 0 {
        return Err(Error::config(
            "fan-out requires at least one outbound stream",
        ));
    }

    let (senders, streams): (Vec<_>, Vec<_>) = (0..n)
        .map(|_| mpsc::channel(OUTBOUND_CAPACITY))
        .unzip();

    let driver = tokio::spawn(log.attach(drive(inbound, senders)));
    Ok(FanOut { streams, driver })
}

async fn drive<T>(mut inbound: mpsc::Receiver<T>, outbound: Vec<mpsc::Sender<T>>) -> u64 {
    let n = outbound.len();
    let mut next = 0;
    let mut forwarded = 0u64;

    loop {
        let permit = match outbound[next].reserve().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(stream = next, forwarded, "Outbound stream closed, stopping distributor");
                break;
            }
        };

        match inbound.recv().await {
            Some(item) => {
                permit.send(item);
                forwarded += 1;
                next = (next + 1) % n;
            }
            None => break,
        }
    }

    debug!(forwarded, streams = n, "Distributor finished, closing outbound streams");
    forwarded
}

/// Join a distributor driver.
///
/// A driver that panicked or was cancelled is reported as
/// [`Error::DistributorAborted`]; tasks it held are lost.
pub async fn join_driver(driver: JoinHandle<u64>) -> Result<u64> {
    driver
        .await
        .map_err(|e| Error::DistributorAborted(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    async fn collect_all(streams: Vec<mpsc::Receiver<usize>>) -> Vec<Vec<usize>> {
        let handles: Vec<_> = streams
            .into_iter()
            .map(|mut rx| {
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(item) = rx.recv().await {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        let mut out = Vec::new();
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }

    async fn run_split(n: usize, items: usize) -> (Vec<Vec<usize>>, u64) {
        let (tx, rx) = mpsc::channel(items.max(1));
        for i in 0..items {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let fan = split(rx, n, &LogHandle::disabled()).unwrap();
        let per_stream = collect_all(fan.streams).await;
        let forwarded = join_driver(fan.driver).await.unwrap();
        (per_stream, forwarded)
    }

    #[tokio::test]
    async fn test_three_streams_seven_items() {
        let (per_stream, forwarded) = run_split(3, 7).await;
        assert_eq!(forwarded, 7);
        assert_eq!(per_stream, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[tokio::test]
    async fn test_zero_streams_is_config_error() {
        let (tx, rx) = mpsc::channel::<usize>(1);
        let err = split(rx, 0, &LogHandle::disabled()).unwrap_err();
        assert!(err.is_config());
        // The inbound receiver was dropped, nothing kept it alive
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_empty_inbound_closes_all_streams() {
        let (per_stream, forwarded) = run_split(4, 0).await;
        assert_eq!(forwarded, 0);
        assert!(per_stream.iter().all(|s| s.is_empty()));
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_driver() {
        let (tx, rx) = mpsc::channel(8);
        for i in 0..5usize {
            tx.send(i).await.unwrap();
        }

        let mut fan = split(rx, 2, &LogHandle::disabled()).unwrap();
        drop(fan.streams.pop());

        let forwarded = join_driver(fan.driver).await.unwrap();
        assert_eq!(forwarded, 1);

        let mut first = fan.streams.pop().unwrap();
        assert_eq!(first.recv().await, Some(0));
        assert_eq!(first.recv().await, None);
    }

    #[tokio::test]
    async fn test_busy_stream_applies_backpressure() {
        let (tx, rx) = mpsc::channel(1);
        let mut fan = split(rx, 1, &LogHandle::disabled()).unwrap();

        // One item parked on the outbound stream, one in the inbound buffer
        tx.send(0usize).await.unwrap();
        tx.send(1usize).await.unwrap();
        tokio::task::yield_now().await;

        let third = tokio::time::timeout(std::time::Duration::from_millis(50), tx.send(2));
        assert!(third.await.is_err(), "distributor must not run ahead of a busy stream");

        assert_eq!(fan.streams[0].recv().await, Some(0));
        tx.send(2).await.unwrap();
        drop(tx);
        assert_eq!(fan.streams[0].recv().await, Some(1));
        assert_eq!(fan.streams[0].recv().await, Some(2));
        assert_eq!(fan.streams[0].recv().await, None);
        assert_eq!(join_driver(fan.driver).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_panicked_driver_is_aborted_error() {
        let driver: JoinHandle<u64> = tokio::spawn(async { panic!("driver crashed") });
        let err = join_driver(driver).await.unwrap_err();
        assert!(matches!(err, Error::DistributorAborted(_)));
    }

    proptest! {
        #[test]
        fn prop_round_robin_exactly_once(n in 1usize..8, items in 0usize..64) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (per_stream, forwarded) = rt.block_on(run_split(n, items));

            prop_assert_eq!(forwarded, items as u64);
            prop_assert_eq!(per_stream.len(), n);
            for (stream, seen) in per_stream.iter().enumerate() {
                let expected: Vec<usize> = (0..items).filter(|i| i % n == stream).collect();
                prop_assert_eq!(seen, &expected);
            }
        }
    }
}
