//! Worker Boundary
//!
//! Everything that crosses between the connection loop and the processing
//! stage goes through here:
//!
//! - the bounded inbound channel (`data`, `connection`, `error` events)
//! - the bounded command channel (`stop`, `disconnect`, `send`)
//! - the worker that hosts the connection loop
//!
//! In [`WorkerMode::Task`] events cross as native values. In
//! [`WorkerMode::Isolated`] the loop runs on its own OS thread and runtime and
//! every event is packed with MessagePack before it crosses, so the
//! processing side never shares a live value with the loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::connection::ConnectionLoop;
use crate::domain::message::RawFrame;
use crate::infrastructure::config::WorkerMode;

/// Name given to isolated connection threads.
pub const ISOLATED_THREAD_NAME: &str = "tcp-connection-loop";

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised at the worker boundary.
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    /// Event could not be packed.
    #[error("failed to encode event: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Envelope could not be unpacked.
    #[error("failed to decode event: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Channel is at capacity.
    #[error("channel full")]
    Full,

    /// Receiving side is gone.
    #[error("channel closed")]
    Closed,

    /// The isolated worker could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

// =============================================================================
// Messages
// =============================================================================

/// Event sent from the connection loop to the processing stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    /// A socket read returned bytes.
    Data(RawFrame),
    /// The connection came up or went down.
    Connection(bool),
    /// A connect, read or write failure.
    Error(String),
    /// Frames discarded because the channel was full, reported once space frees.
    Dropped {
        /// Number of frames lost.
        frames: u64,
        /// Bytes in those frames.
        bytes: u64,
    },
}

/// Request sent from the client owner to the connection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Exit the loop.
    Stop,
    /// Drop the current connection; reconnect policy still applies.
    Disconnect,
    /// Write bytes to the live connection.
    Send(Vec<u8>),
}

#[derive(Debug)]
enum Envelope {
    Native(InboundEvent),
    Packed(Vec<u8>),
}

// =============================================================================
// Inbound Channel
// =============================================================================

/// Create the inbound channel for the given worker mode.
#[must_use]
pub fn inbound_channel(capacity: usize, mode: WorkerMode) -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InboundSender { tx, mode }, InboundReceiver { rx })
}

/// Create the command channel.
#[must_use]
pub fn command_channel(capacity: usize) -> (mpsc::Sender<Command>, mpsc::Receiver<Command>) {
    mpsc::channel(capacity.max(1))
}

/// Producer half of the inbound channel.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<Envelope>,
    mode: WorkerMode,
}

impl InboundSender {
    /// Put an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Full` when the channel is at capacity (the event is dropped),
    /// `Closed` when the receiver is gone, or an encode error.
    pub fn try_emit(&self, event: InboundEvent) -> Result<(), BoundaryError> {
        let envelope = self.wrap(event)?;
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BoundaryError::Full,
            mpsc::error::TrySendError::Closed(_) => BoundaryError::Closed,
        })
    }

    /// Put an event, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns `Closed` when the receiver is gone, or an encode error.
    pub async fn emit(&self, event: InboundEvent) -> Result<(), BoundaryError> {
        let envelope = self.wrap(event)?;
        self.tx
            .send(envelope)
            .await
            .map_err(|_| BoundaryError::Closed)
    }

    fn wrap(&self, event: InboundEvent) -> Result<Envelope, BoundaryError> {
        match self.mode {
            WorkerMode::Task => Ok(Envelope::Native(event)),
            WorkerMode::Isolated => Ok(Envelope::Packed(rmp_serde::to_vec(&event)?)),
        }
    }
}

/// Consumer half of the inbound channel.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<Envelope>,
}

impl InboundReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    /// Envelopes that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        loop {
            let envelope = self.rx.recv().await?;
            match unwrap_envelope(envelope) {
                Ok(event) => return Some(event),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable inbound event"),
            }
        }
    }
}

fn unwrap_envelope(envelope: Envelope) -> Result<InboundEvent, BoundaryError> {
    match envelope {
        Envelope::Native(event) => Ok(event),
        Envelope::Packed(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
    }
}

// =============================================================================
// Connection Worker
// =============================================================================

/// Handle to the execution unit hosting a connection loop.
#[derive(Debug)]
pub struct ConnectionWorker {
    handle: WorkerHandle,
    finished: bool,
}

#[derive(Debug)]
enum WorkerHandle {
    Task(JoinHandle<()>),
    Isolated {
        kill: Option<oneshot::Sender<()>>,
        done: oneshot::Receiver<()>,
    },
}

impl ConnectionWorker {
    /// Start `connection_loop` according to `mode`.
    ///
    /// `Task` mode must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the isolated runtime or thread cannot be created.
    pub fn spawn(mode: WorkerMode, connection_loop: ConnectionLoop) -> Result<Self, BoundaryError> {
        let handle = match mode {
            WorkerMode::Task => WorkerHandle::Task(tokio::spawn(connection_loop.run())),
            WorkerMode::Isolated => spawn_isolated(connection_loop)?,
        };
        Ok(Self {
            handle,
            finished: false,
        })
    }

    /// Wait up to `timeout` for the loop to exit. Returns `true` once it has.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        if self.finished {
            return true;
        }

        let finished = match &mut self.handle {
            WorkerHandle::Task(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Connection loop task panicked");
                    }
                    true
                }
                Err(_) => false,
            },
            // A dropped sender means the thread is gone.
            WorkerHandle::Isolated { done, .. } => tokio::time::timeout(timeout, done).await.is_ok(),
        };

        self.finished = finished;
        finished
    }

    /// Force the loop to stop at its next suspension point.
    pub fn terminate(&mut self) {
        if self.finished {
            return;
        }
        match &mut self.handle {
            WorkerHandle::Task(handle) => handle.abort(),
            WorkerHandle::Isolated { kill, .. } => {
                if let Some(kill) = kill.take() {
                    let _ = kill.send(());
                }
            }
        }
    }

    /// Whether a join has observed the loop exit.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

fn spawn_isolated(connection_loop: ConnectionLoop) -> Result<WorkerHandle, BoundaryError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    // The thread is detached; completion is reported through `done`.
    let _thread = std::thread::Builder::new()
        .name(ISOLATED_THREAD_NAME.to_string())
        .spawn(move || {
            runtime.block_on(async move {
                tokio::select! {
                    () = connection_loop.run() => {}
                    _ = kill_rx => {
                        tracing::warn!("Isolated connection loop killed");
                    }
                }
            });
            drop(runtime);
            let _ = done_tx.send(());
        })?;

    Ok(WorkerHandle::Isolated {
        kill: Some(kill_tx),
        done: done_rx,
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use test_case::test_case;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::infrastructure::config::ClientConfig;

    fn frame(bytes: &[u8]) -> RawFrame {
        let source: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        RawFrame::new(bytes.to_vec(), source)
    }

    #[tokio::test]
    async fn native_events_cross_in_order() {
        let (tx, mut rx) = inbound_channel(8, WorkerMode::Task);
        let data = frame(b"abc");
        tx.emit(InboundEvent::Connection(true)).await.unwrap();
        tx.try_emit(InboundEvent::Data(data.clone())).unwrap();
        tx.emit(InboundEvent::Error("reset".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(InboundEvent::Connection(true)));
        assert_eq!(rx.recv().await, Some(InboundEvent::Data(data)));
        assert_eq!(rx.recv().await, Some(InboundEvent::Error("reset".to_string())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn packed_event_survives_the_boundary() {
        let (tx, mut rx) = inbound_channel(8, WorkerMode::Isolated);
        let sent = frame(b"\x00\x00\x00\x01Zq");
        tx.try_emit(InboundEvent::Data(sent.clone())).unwrap();

        assert_eq!(rx.recv().await, Some(InboundEvent::Data(sent)));
    }

    #[tokio::test]
    async fn full_channel_rejects_without_blocking() {
        let (tx, _rx) = inbound_channel(1, WorkerMode::Task);
        tx.try_emit(InboundEvent::Connection(true)).unwrap();

        let err = tx.try_emit(InboundEvent::Data(frame(b"x"))).unwrap_err();
        assert!(matches!(err, BoundaryError::Full));
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let (tx, rx) = inbound_channel(1, WorkerMode::Task);
        drop(rx);
        let err = tx.emit(InboundEvent::Connection(false)).await.unwrap_err();
        assert!(matches!(err, BoundaryError::Closed));
    }

    #[tokio::test]
    async fn undecodable_envelope_is_skipped() {
        let (tx, mut rx) = inbound_channel(4, WorkerMode::Isolated);
        tx.tx.send(Envelope::Packed(vec![0xc1])).await.unwrap();
        tx.emit(InboundEvent::Connection(true)).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(InboundEvent::Connection(true)));
        assert_eq!(rx.recv().await, None);
    }

    async fn unused_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test_case(WorkerMode::Task ; "task worker")]
    #[test_case(WorkerMode::Isolated ; "isolated worker")]
    #[tokio::test]
    async fn stuck_worker_is_terminated(mode: WorkerMode) {
        let config = ClientConfig::new("127.0.0.1", unused_port().await)
            .with_reconnect_interval(Duration::from_secs(3600))
            .with_connect_timeout(Duration::from_millis(200))
            .with_worker_mode(mode);
        let (events, mut inbound) = inbound_channel(16, mode);
        let (_commands, command_rx) = command_channel(4);
        // Never cancelled, so only termination can end the loop.
        let cancel = CancellationToken::new();
        let connection_loop = ConnectionLoop::new(config, events, command_rx, cancel);

        let mut worker = ConnectionWorker::spawn(mode, connection_loop).unwrap();

        // The failed attempt is reported before the long reconnect wait.
        let first = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(InboundEvent::Connection(false)));

        assert!(!worker.join(Duration::from_millis(200)).await);
        assert!(!worker.is_finished());

        worker.terminate();
        assert!(worker.join(Duration::from_secs(2)).await);
        assert!(worker.is_finished());

        // Terminating twice is harmless.
        worker.terminate();
        assert!(worker.join(Duration::from_millis(10)).await);
    }
}
