//! Delivery tracker
//!
//! Owns the receiving end of the shared delivery stream. Every message that
//! a broker client accepts owes exactly one event on that stream; the
//! tracker counts what is still owed and turns each pulled event into a
//! typed outcome.
//!
//! The stream is bounded. Its capacity must cover the largest batch that
//! can be in flight, otherwise a broker client could block on a full stream
//! while the producer is still submitting and never draining.

use crate::broker::{DeliveryEvent, DeliveryReport, DeliverySender};
use crate::error::{Error, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::error;

/// Receiving side of the delivery stream plus the outstanding counter
#[derive(Debug)]
pub struct DeliveryTracker {
    rx: mpsc::Receiver<DeliveryEvent>,
    capacity: usize,
    outstanding: usize,
    drained: u64,
}

impl DeliveryTracker {
    /// Create a tracker and the sender to hand to broker clients.
    ///
    /// Fails with a configuration error unless
    /// `capacity >= max_in_flight` and `capacity >= 1`.
    pub fn new(capacity: usize, max_in_flight: usize) -> Result<(Self, DeliverySender)> {
        if capacity == 0 {
            return Err(Error::config("delivery stream capacity must be at least 1"));
        }
        if capacity < max_in_flight {
            return Err(Error::config(format!(
                "delivery stream capacity ({}) is smaller than the in-flight limit ({})",
                capacity, max_in_flight
            )));
        }

        let (tx, rx) = mpsc::channel(capacity);
        let tracker = Self {
            rx,
            capacity,
            outstanding: 0,
            drained: 0,
        };
        Ok((tracker, DeliverySender::new(tx)))
    }

    /// Record `n` newly submitted messages
    pub fn register(&mut self, n: usize) {
        self.outstanding += n;
    }

    /// Messages submitted but not yet matched to an event
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Events pulled so far
    pub fn drained(&self) -> u64 {
        self.drained
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pull exactly one event and classify it.
    ///
    /// Every pulled event counts against the outstanding total, whether it
    /// is a success, a write failure or an unexpected event.
    pub async fn wait_one(&mut self) -> Result<DeliveryReport> {
        if self.outstanding == 0 {
            return Err(Error::NothingOutstanding);
        }

        let event = self.rx.recv().await.ok_or(Error::ReportStreamClosed {
            outstanding: self.outstanding,
        })?;
        self.outstanding -= 1;
        self.drained += 1;

        match event {
            DeliveryEvent::Report(report) if report.is_success() => Ok(report),
            DeliveryEvent::Report(report) => Err(Error::Delivery {
                record_id: report.record_id,
                topic: report.topic,
                partition: report.partition,
                reason: report.error.unwrap_or_default(),
            }),
            other => Err(Error::UnexpectedEvent(other.to_string())),
        }
    }

    /// Close the tracker.
    ///
    /// Only valid once every registered message has been matched and no
    /// stray event is buffered.
    pub fn close(mut self) -> Result<()> {
        let mut buffered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(_) => buffered += 1,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if self.outstanding > 0 || buffered > 0 {
            error!(
                outstanding = self.outstanding,
                buffered, "Delivery tracker closed with undrained reports"
            );
            return Err(Error::UndrainedReports {
                outstanding: self.outstanding,
                buffered,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_must_cover_in_flight() {
        assert!(DeliveryTracker::new(0, 0).unwrap_err().is_config());
        assert!(DeliveryTracker::new(5, 10).unwrap_err().is_config());
        let (tracker, _sender) = DeliveryTracker::new(10, 10).unwrap();
        assert_eq!(tracker.capacity(), 10);
    }

    #[tokio::test]
    async fn test_nothing_outstanding() {
        let (mut tracker, _sender) = DeliveryTracker::new(4, 4).unwrap();
        assert!(matches!(
            tracker.wait_one().await,
            Err(Error::NothingOutstanding)
        ));
    }

    #[tokio::test]
    async fn test_success_and_failure_both_decrement() {
        let (mut tracker, sender) = DeliveryTracker::new(4, 4).unwrap();
        tracker.register(2);

        sender
            .report(DeliveryReport::success(1, "users", 0, 10))
            .await;
        sender
            .report(DeliveryReport::failure(2, "users", 0, "message too large"))
            .await;

        let ok = tracker.wait_one().await.unwrap();
        assert_eq!(ok.offset, Some(10));
        assert_eq!(tracker.outstanding(), 1);

        let err = tracker.wait_one().await.unwrap_err();
        assert!(err.is_delivery());
        assert_eq!(err.record_id(), Some(2));
        assert!(err.to_string().ends_with("message too large"));
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.drained(), 2);

        tracker.close().unwrap();
    }

    #[tokio::test]
    async fn test_non_report_event_is_hard_error() {
        let (mut tracker, sender) = DeliveryTracker::new(4, 4).unwrap();
        tracker.register(1);
        sender
            .send(DeliveryEvent::ClientError("broker transport failure".into()))
            .await;

        let err = tracker.wait_one().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEvent(ref e) if e.contains("broker transport failure")));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_stream_closed_while_outstanding() {
        let (mut tracker, sender) = DeliveryTracker::new(4, 4).unwrap();
        tracker.register(1);
        drop(sender);

        let err = tracker.wait_one().await.unwrap_err();
        assert!(matches!(err, Error::ReportStreamClosed { outstanding: 1 }));
    }

    #[tokio::test]
    async fn test_close_with_outstanding_fails() {
        let (mut tracker, _sender) = DeliveryTracker::new(4, 4).unwrap();
        tracker.register(3);
        assert!(matches!(
            tracker.close(),
            Err(Error::UndrainedReports {
                outstanding: 3,
                buffered: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_close_with_stray_event_fails() {
        let (tracker, sender) = DeliveryTracker::new(4, 4).unwrap();
        sender.send(DeliveryEvent::Statistics("{}".into())).await;
        assert!(matches!(
            tracker.close(),
            Err(Error::UndrainedReports {
                outstanding: 0,
                buffered: 1
            })
        ));
    }
}
