//! Injectable logging service
//!
//! [`LogService`] owns the subscriber and the background file writer. It is
//! constructed explicitly, hands out [`LogHandle`]s, and flushes on
//! [`LogService::shutdown`]. Library code never installs a global
//! subscriber: components that spawn tasks receive a `LogHandle` and attach
//! it to every task they start.
//!
//! ```rust,ignore
//! let logs = LogService::start(&config.logging, verbose)?;
//! let log = logs.handle();
//! let executor = Executor::start(3, &log)?;
//! // ...
//! logs.shutdown();
//! ```

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use std::future::Future;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Cheap, cloneable reference to a running logging service
#[derive(Clone, Debug)]
pub struct LogHandle {
    dispatch: Dispatch,
}

impl LogHandle {
    /// A handle that discards every event
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Wrap an existing dispatcher (e.g. a test subscriber)
    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Attach this handle to a future so its events reach this service,
    /// including after the future is moved onto another task
    pub fn attach<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }

    /// Run a closure with this handle as the current dispatcher
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

/// Logging service with an explicit start/shutdown lifecycle
pub struct LogService {
    handle: LogHandle,
    // Dropping the guard drains the background writer to the file
    file_guard: Option<WorkerGuard>,
}

impl LogService {
    /// Build the subscriber: env filter, stdout layer, optional file layer.
    ///
    /// `RUST_LOG` takes precedence over `config.level`; `verbose` forces
    /// `debug`.
    pub fn start(config: &LoggingConfig, verbose: bool) -> Result<Self> {
        let filter = if verbose {
            EnvFilter::new("debug")
        } else {
            match EnvFilter::try_from_default_env() {
                Ok(filter) => filter,
                Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
                    Error::config(format!("invalid log level '{}': {}", config.level, e))
                })?,
            }
        };

        let (file_layer, file_guard) = match &config.file {
            Some(path) => {
                let directory = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .ok_or_else(|| {
                        Error::config(format!("log file path has no file name: {}", path.display()))
                    })?
                    .to_string_lossy()
                    .into_owned();

                let appender = RollingFileAppender::builder()
                    .rotation(Rotation::NEVER)
                    .filename_prefix(file_name)
                    .build(directory)
                    .map_err(|e| {
                        Error::config(format!("failed to open log file {}: {}", path.display(), e))
                    })?;
                let (writer, guard) = tracing_appender::non_blocking(appender);

                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .with(file_layer);

        Ok(Self {
            handle: LogHandle::from_dispatch(Dispatch::new(subscriber)),
            file_guard,
        })
    }

    /// Handle to pass to components
    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Flush pending file output and stop the background writer
    pub fn shutdown(mut self) {
        self.handle.in_scope(|| tracing::debug!("Logging service shutting down"));
        self.file_guard.take();
    }
}
