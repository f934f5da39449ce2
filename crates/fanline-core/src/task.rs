//! Opaque unit of asynchronous work

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

/// A zero-argument unit of work executed exactly once by one worker.
///
/// The distributor and the pool never look inside a task. Errors are the
/// task's own business: it reports them through whatever channel it closed
/// over.
pub struct Task {
    inner: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

impl Task {
    /// Wrap an async closure
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Box::new(move || Box::pin(f())),
        }
    }

    /// Wrap a synchronous closure
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(move || async move { f() })
    }

    /// Consume the task and run it to completion
    pub async fn run(self) {
        (self.inner)().await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
