//! Worker pool
//!
//! One persistent worker per outbound stream. A worker receives a task, runs
//! it to completion, and repeats until its stream is closed and drained.
//! [`WorkerPool::join`] is the completion barrier for the whole pool.

use crate::logging::LogHandle;
use crate::task::Task;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

tokio::task_local! {
    static WORKER_ID: usize;
}

/// Index of the worker running the current task, if any
pub fn current_worker() -> Option<usize> {
    WORKER_ID.try_with(|id| *id).ok()
}

/// Execution counts collected when the pool is joined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks run per worker (panicked tasks included)
    pub executed: Vec<u64>,
    /// Tasks that panicked
    pub panicked: u64,
}

impl PoolReport {
    pub fn total_executed(&self) -> u64 {
        self.executed.iter().sum()
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    executed: u64,
    panicked: u64,
}

/// Fixed set of workers draining one stream each
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    /// Start one worker per stream
    pub fn spawn(streams: Vec<mpsc::Receiver<Task>>, log: &LogHandle) -> Self {
        let workers = streams
            .into_iter()
            .enumerate()
            .map(|(id, stream)| tokio::spawn(log.attach(run_worker(id, stream))))
            .collect();
        Self { workers }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait until every worker has exited.
    ///
    /// Workers exit only once their stream is closed and empty, so this
    /// resolves after every task routed to the pool has run.
    pub async fn join(self) -> PoolReport {
        let mut report = PoolReport {
            executed: Vec::with_capacity(self.workers.len()),
            panicked: 0,
        };

        for (id, worker) in self.workers.into_iter().enumerate() {
            match worker.await {
                Ok(stats) => {
                    report.executed.push(stats.executed);
                    report.panicked += stats.panicked;
                }
                Err(e) => {
                    error!(worker = id, error = %e, "Worker terminated abnormally");
                    report.executed.push(0);
                }
            }
        }

        report
    }
}

async fn run_worker(id: usize, mut stream: mpsc::Receiver<Task>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    debug!(worker = id, "Worker started");

    while let Some(task) = stream.recv().await {
        let outcome = WORKER_ID
            .scope(id, AssertUnwindSafe(task.run()).catch_unwind())
            .await;
        stats.executed += 1;

        if let Err(payload) = outcome {
            stats.panicked += 1;
            error!(
                worker = id,
                panic = %panic_message(payload.as_ref()),
                "Task panicked, worker continues"
            );
        }
    }

    debug!(worker = id, executed = stats.executed, "Worker stopped");
    stats
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{join_driver, split};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_three_workers_seven_tasks() {
        let log = LogHandle::disabled();
        let (tx, rx) = mpsc::channel(1);
        let fan = split(rx, 3, &log).unwrap();
        let pool = WorkerPool::spawn(fan.streams, &log);
        assert_eq!(pool.size(), 3);

        let assignments = Arc::new(Mutex::new(Vec::new()));
        let join = tokio::spawn(pool.join());

        for i in 0..7usize {
            let assignments = assignments.clone();
            tx.send(Task::from_fn(move || {
                assignments.lock().push((i, current_worker()));
            }))
            .await
            .unwrap();
        }

        // Still open, so the pool must keep waiting for work
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!join.is_finished());

        drop(tx);
        let report = join.await.unwrap();
        assert_eq!(join_driver(fan.driver).await.unwrap(), 7);

        assert_eq!(report.executed, vec![3, 2, 2]);
        assert_eq!(report.total_executed(), 7);
        assert_eq!(report.panicked, 0);

        let mut seen = assignments.lock().clone();
        seen.sort();
        let workers: Vec<Option<usize>> = seen.into_iter().map(|(_, w)| w).collect();
        assert_eq!(
            workers,
            vec![Some(0), Some(1), Some(2), Some(0), Some(1), Some(2), Some(0)]
        );
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_worker() {
        let log = LogHandle::disabled();
        let (tx, rx) = mpsc::channel(1);
        let pool = WorkerPool::spawn(vec![rx], &log);

        let ran = Arc::new(Mutex::new(Vec::new()));
        tx.send(Task::from_fn(|| panic!("task failed"))).await.unwrap();
        let r = ran.clone();
        tx.send(Task::from_fn(move || r.lock().push("after panic")))
            .await
            .unwrap();
        drop(tx);

        let report = pool.join().await;
        assert_eq!(report.executed, vec![2]);
        assert_eq!(report.panicked, 1);
        assert_eq!(*ran.lock(), vec!["after panic"]);
    }

    #[tokio::test]
    async fn test_current_worker_outside_pool() {
        assert_eq!(current_worker(), None);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
