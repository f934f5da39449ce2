//! Executor: distributor and worker pool behind one handle
//!
//! ```rust,ignore
//! let executor = Executor::start(3, &log)?;
//! executor.submit(Task::new(|| async { /* ... */ })).await?;
//! let report = executor.shutdown().await?;
//! ```

use crate::error::{Error, Result};
use crate::fanout::{join_driver, split};
use crate::logging::LogHandle;
use crate::pool::{PoolReport, WorkerPool};
use crate::task::Task;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Inbound slots ahead of the distributor
const INBOUND_CAPACITY: usize = 1;

/// Runs submitted tasks on a fixed pool of workers, round robin
#[derive(Debug)]
pub struct Executor {
    inbound: mpsc::Sender<Task>,
    driver: JoinHandle<u64>,
    pool: WorkerPool,
    log: LogHandle,
}

impl Executor {
    /// Start `workers` workers fed by a fan-out distributor
    pub fn start(workers: usize, log: &LogHandle) -> Result<Self> {
        let (inbound, rx) = mpsc::channel(INBOUND_CAPACITY);
        let fan = split(rx, workers, log)?;
        let pool = WorkerPool::spawn(fan.streams, log);

        log.in_scope(|| info!(workers, "Executor started"));
        Ok(Self {
            inbound,
            driver: fan.driver,
            pool,
            log: log.clone(),
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Enqueue a task, waiting while the distributor is busy
    pub async fn submit(&self, task: Task) -> Result<()> {
        self.inbound
            .send(task)
            .await
            .map_err(|_| Error::DistributorAborted("inbound stream is closed".to_string()))
    }

    /// Close the inbound stream and wait for every queued task to run
    pub async fn shutdown(self) -> Result<PoolReport> {
        drop(self.inbound);

        // A dead driver drops its senders, so the pool still winds down
        let forwarded = join_driver(self.driver).await;
        let report = self.pool.join().await;
        let forwarded = forwarded?;

        self.log.in_scope(|| {
            info!(
                forwarded,
                executed = report.total_executed(),
                panicked = report.panicked,
                "Executor shut down"
            )
        });
        Ok(report)
    }
}
