//! Stream Client
//!
//! Owns one connection loop and one processing stage and the channels and
//! cancellation token between them.
//!
//! # Shutdown
//!
//! `stop()` cancels the token, queues a best-effort `Stop`, then joins the
//! processing stage and the connection worker, each bounded by
//! `shutdown_timeout`. A connection worker that is still alive is
//! force-terminated and joined once more. No step blocks indefinitely.

mod registry;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use registry::{ClientRegistry, RegistryError};

use crate::domain::stats::{Stats, StatsTracker};
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::metrics;
use crate::infrastructure::observer::{ObserverRef, ObserverRegistry};
use crate::infrastructure::tcp::{
    BoundaryError, Command, ConnectionLoop, ConnectionWorker, ProcessingStage, command_channel,
    inbound_channel,
};

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client has not been started or has been stopped.
    #[error("client is not running")]
    NotRunning,

    /// The client is running but has no live connection.
    #[error("client is not connected")]
    NotConnected,

    /// The command queue is at capacity.
    #[error("send queue is full")]
    SendQueueFull,

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// A worker could not be spawned.
    #[error("failed to start worker: {0}")]
    Spawn(#[from] BoundaryError),
}

// =============================================================================
// Stream Client
// =============================================================================

struct RunningWorkers {
    cancel: CancellationToken,
    commands: mpsc::Sender<Command>,
    connection: ConnectionWorker,
    processing: JoinHandle<()>,
}

/// Resilient streaming TCP client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tcp_stream_client::{ClientConfig, StreamClient, TracingObserver};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StreamClient::new(ClientConfig::new("127.0.0.1", 9000))?;
/// client.attach(Arc::new(TracingObserver::new("demo")));
/// client.start()?;
///
/// // ...
///
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamClient {
    config: ClientConfig,
    observers: Arc<ObserverRegistry>,
    stats: Arc<StatsTracker>,
    workers: Mutex<Option<RunningWorkers>>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("address", &self.config.address())
            .field("running", &self.is_running())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a stopped client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            observers: Arc::new(ObserverRegistry::new()),
            stats: Arc::new(StatsTracker::new()),
            workers: Mutex::new(None),
        })
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Spawn both workers. Calling `start` on a running client does nothing.
    ///
    /// # Errors
    ///
    /// Returns `NoRuntime` outside a tokio runtime, or `Spawn` if the
    /// isolated worker cannot be created.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let (events, inbound) = inbound_channel(self.config.inbound_capacity, self.config.worker_mode);
        let (commands, command_rx) = command_channel(self.config.command_capacity);

        let connection_loop =
            ConnectionLoop::new(self.config.clone(), events, command_rx, cancel.clone());
        let connection = ConnectionWorker::spawn(self.config.worker_mode, connection_loop)?;

        let stage = ProcessingStage::new(
            inbound,
            Arc::clone(&self.observers),
            Arc::clone(&self.stats),
            cancel.clone(),
            self.config.read_poll_interval,
        );
        let processing = runtime.spawn(stage.run());

        tracing::info!(
            address = %self.config.address(),
            worker_mode = self.config.worker_mode.as_str(),
            "Stream client started"
        );

        *workers = Some(RunningWorkers {
            cancel,
            commands,
            connection,
            processing,
        });
        Ok(())
    }

    /// Stop both workers. Calling `stop` on a stopped client does nothing.
    pub async fn stop(&self) {
        let Some(mut workers) = self.workers.lock().take() else {
            return;
        };
        let timeout = self.config.shutdown_timeout;

        workers.cancel.cancel();
        let _ = workers.commands.try_send(Command::Stop);

        if tokio::time::timeout(timeout, &mut workers.processing)
            .await
            .is_err()
        {
            tracing::warn!("Processing stage did not exit in time, aborting");
            workers.processing.abort();
        }

        if !workers.connection.join(timeout).await {
            tracing::warn!("Connection worker did not exit in time, terminating");
            metrics::record_forced_termination();
            workers.connection.terminate();
            if !workers.connection.join(timeout).await {
                tracing::warn!("Connection worker still running after termination");
            }
        }

        // Covers a processing stage that was aborted before clearing the flag.
        if self.stats.set_connected(false) {
            self.observers.notify_connection(false);
        }
        tracing::info!(address = %self.config.address(), "Stream client stopped");
    }

    /// Drop the current connection without stopping the client.
    ///
    /// Returns `true` if a disconnect was queued; does nothing when the
    /// client is not running or not connected.
    pub fn disconnect(&self) -> bool {
        if !self.stats.is_connected() {
            return false;
        }
        self.workers
            .lock()
            .as_ref()
            .is_some_and(|w| w.commands.try_send(Command::Disconnect).is_ok())
    }

    /// Queue bytes for writing on the live connection.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning`, `NotConnected`, or `SendQueueFull`.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        let workers = self.workers.lock();
        let workers = workers.as_ref().ok_or(ClientError::NotRunning)?;
        if !self.stats.is_connected() {
            return Err(ClientError::NotConnected);
        }
        workers
            .commands
            .try_send(Command::Send(bytes.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ClientError::SendQueueFull,
                mpsc::error::TrySendError::Closed(_) => ClientError::NotRunning,
            })
    }

    /// Snapshot of the client statistics.
    #[must_use]
    pub fn get_stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Whether the last lifecycle event reported a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stats.is_connected()
    }

    /// Whether the client has been started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Attach an observer. Returns `false` if it was already attached.
    pub fn attach(&self, observer: ObserverRef) -> bool {
        self.observers.attach(observer)
    }

    /// Detach an observer. Returns `false` if it was not attached.
    pub fn detach(&self, observer: &ObserverRef) -> bool {
        self.observers.detach(observer)
    }

    /// Currently attached observers.
    #[must_use]
    pub fn observers(&self) -> Vec<ObserverRef> {
        self.observers.snapshot()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.get_mut().take() {
            workers.cancel.cancel();
        }
    }
}
