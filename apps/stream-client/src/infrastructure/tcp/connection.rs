//! Connection Loop
//!
//! Owns the socket for one client and runs the
//! connect → receive → detect-disconnect → reconnect state machine:
//!
//! ```text
//!            connect ok                 close / error / disconnect
//! Connecting ──────────▶ Connected ────────────────────────────────┐
//!     ▲  │                                                          │
//!     │  └── connect failed ──▶ Disconnected ◀─────────────────────┘
//!     │                              │
//!     └──── reconnect delay ◀────────┘ (auto_reconnect, policy allows)
//! ```
//!
//! Every exit from `Connected` or a failed attempt produces a
//! `connection(false)` event, followed by an `error` event when the cause
//! was an I/O failure. Failures never escape `run`; the loop either retries
//! or returns.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::boundary::{BoundaryError, Command, InboundEvent, InboundSender};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::connection::ConnectionState;
use crate::domain::message::RawFrame;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{self, ErrorStage};

// =============================================================================
// Error Type
// =============================================================================

/// Socket-level failures. Never fatal to the loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Resolving or connecting failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Target address.
        address: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The connect attempt exceeded its bound.
    #[error("connect to {address} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Target address.
        address: String,
        /// Configured bound in milliseconds.
        timeout_ms: u128,
    },

    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    Read(std::io::Error),

    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    Write(std::io::Error),
}

impl ConnectionError {
    const fn stage(&self) -> ErrorStage {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout { .. } => ErrorStage::Connect,
            Self::Read(_) => ErrorStage::Read,
            Self::Write(_) => ErrorStage::Write,
        }
    }
}

/// Why a connected session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Peer closed the connection.
    Closed,
    /// A `disconnect` command was honored.
    Disconnected,
    /// Read or write failure.
    Failed(ConnectionError),
    /// Stop requested, or nobody is left to receive events.
    Stopped,
}

// =============================================================================
// Connection Loop
// =============================================================================

/// The connection loop for one client.
#[derive(Debug)]
pub struct ConnectionLoop {
    config: ClientConfig,
    events: InboundSender,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    state: ConnectionState,
    dropped: DropTally,
}

/// Frames discarded since the last `Dropped` event went out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DropTally {
    frames: u64,
    bytes: u64,
}

impl DropTally {
    const fn is_empty(self) -> bool {
        self.frames == 0
    }

    const fn event(self) -> InboundEvent {
        InboundEvent::Dropped {
            frames: self.frames,
            bytes: self.bytes,
        }
    }
}

impl ConnectionLoop {
    /// Create a new connection loop.
    #[must_use]
    pub const fn new(
        config: ClientConfig,
        events: InboundSender,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            events,
            commands,
            cancel,
            state: ConnectionState::Disconnected,
            dropped: DropTally {
                frames: 0,
                bytes: 0,
            },
        }
    }

    /// Run until cancelled, stopped, or reconnection is no longer allowed.
    #[tracing::instrument(
        name = "connection_loop",
        skip(self),
        fields(host = %self.config.host, port = self.config.port)
    )]
    pub async fn run(mut self) {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::from_client_config(&self.config));

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Connection loop cancelled");
                break;
            }

            self.transition(ConnectionState::Connecting);
            match self.connect().await {
                Ok(Some((stream, peer))) => {
                    policy.reset();
                    if !self.discard_stale_commands() {
                        break;
                    }

                    self.transition(ConnectionState::Connected);
                    if !self.report(InboundEvent::Connection(true)).await {
                        break;
                    }

                    let end = self.serve(stream, peer).await;
                    self.transition(ConnectionState::Disconnected);

                    match end {
                        SessionEnd::Stopped => {
                            // Best effort: the processing stage may already be gone.
                            let _ = self.events.try_emit(InboundEvent::Connection(false));
                            break;
                        }
                        SessionEnd::Closed => {
                            tracing::info!("Peer closed the connection");
                            if !self.report(InboundEvent::Connection(false)).await {
                                break;
                            }
                        }
                        SessionEnd::Disconnected => {
                            tracing::info!("Disconnected on request");
                            if !self.report(InboundEvent::Connection(false)).await {
                                break;
                            }
                        }
                        SessionEnd::Failed(e) => {
                            if !self.report_failure(&e).await {
                                break;
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.transition(ConnectionState::Disconnected);
                    if !self.report_failure(&e).await {
                        break;
                    }
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            if !self.config.auto_reconnect {
                tracing::info!("Auto-reconnect disabled, connection loop exiting");
                break;
            }
            let Some(delay) = policy.next_delay() else {
                tracing::warn!(
                    attempts = policy.attempt_count(),
                    "Reconnect attempts exhausted, connection loop exiting"
                );
                break;
            };

            metrics::record_reconnect(&self.config.host);
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );
            if !self.wait(delay).await {
                break;
            }
        }

        self.transition(ConnectionState::Disconnected);
        tracing::info!("Connection loop stopped");
    }

    /// Connect with the configured bound. `Ok(None)` means cancelled.
    async fn connect(&self) -> Result<Option<(TcpStream, SocketAddr)>, ConnectionError> {
        let address = self.config.address();
        tracing::debug!(%address, "Connecting");

        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(address.clone()),
        );

        let stream = tokio::select! {
            () = self.cancel.cancelled() => return Ok(None),
            result = attempt => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(ConnectionError::Connect { address, source }),
                Err(_) => {
                    return Err(ConnectionError::ConnectTimeout {
                        address,
                        timeout_ms: self.config.connect_timeout.as_millis(),
                    });
                }
            },
        };

        let peer = stream
            .peer_addr()
            .map_err(|source| ConnectionError::Connect {
                address: address.clone(),
                source,
            })?;
        tracing::info!(%peer, "Connected");
        Ok(Some((stream, peer)))
    }

    /// Read frames and honor commands until the session ends.
    async fn serve(&mut self, mut stream: TcpStream, peer: SocketAddr) -> SessionEnd {
        let (mut reader, mut writer) = stream.split();
        let mut buf = vec![0u8; self.config.buffer_size];
        let poll = self.config.read_poll_interval;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return SessionEnd::Stopped,

                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => return SessionEnd::Stopped,
                    Some(Command::Disconnect) => return SessionEnd::Disconnected,
                    Some(Command::Send(bytes)) => {
                        if let Err(e) = writer.write_all(&bytes).await {
                            return SessionEnd::Failed(ConnectionError::Write(e));
                        }
                        tracing::trace!(len = bytes.len(), "Wrote outbound bytes");
                    }
                },

                read = tokio::time::timeout(poll, reader.read(&mut buf)) => match read {
                    Err(_) => {}
                    Ok(Ok(0)) => return SessionEnd::Closed,
                    Ok(Ok(n)) => {
                        let frame = RawFrame::new(buf[..n].to_vec(), peer);
                        if !self.forward(frame) {
                            return SessionEnd::Stopped;
                        }
                    }
                    Ok(Err(e)) => return SessionEnd::Failed(ConnectionError::Read(e)),
                },
            }
        }
    }

    /// Hand a frame to the processing stage without blocking the reader.
    ///
    /// A full channel drops the frame; the loss is tallied and reported as a
    /// `Dropped` event ahead of the next event that fits.
    fn forward(&mut self, frame: RawFrame) -> bool {
        metrics::record_frame_received(&self.config.host, frame.len());
        let len = frame.len();

        if !self.dropped.is_empty() {
            match self.events.try_emit(self.dropped.event()) {
                Ok(()) => self.dropped = DropTally::default(),
                Err(BoundaryError::Closed) => return false,
                Err(_) => {
                    self.tally_drop(len);
                    return true;
                }
            }
        }

        match self.events.try_emit(InboundEvent::Data(frame)) {
            Ok(()) => true,
            Err(BoundaryError::Full) => {
                self.tally_drop(len);
                true
            }
            Err(BoundaryError::Closed) => false,
            Err(e) => {
                tracing::warn!(error = %e, len, "Failed to forward frame");
                true
            }
        }
    }

    fn tally_drop(&mut self, len: usize) {
        metrics::record_frame_dropped(&self.config.host);
        tracing::warn!(len, "Inbound channel full, dropping frame");
        self.dropped.frames = self.dropped.frames.saturating_add(1);
        self.dropped.bytes = self
            .dropped
            .bytes
            .saturating_add(u64::try_from(len).unwrap_or(u64::MAX));
    }

    /// Emit a lifecycle event. Returns `false` when the loop should exit.
    async fn report(&mut self, event: InboundEvent) -> bool {
        if !self.dropped.is_empty() {
            let pending = std::mem::take(&mut self.dropped);
            if !self.emit_lifecycle(pending.event()).await {
                return false;
            }
        }
        self.emit_lifecycle(event).await
    }

    async fn emit_lifecycle(&self, event: InboundEvent) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            result = self.events.emit(event) => match result {
                Ok(()) => true,
                Err(BoundaryError::Closed) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to emit lifecycle event");
                    true
                }
            },
        }
    }

    async fn report_failure(&mut self, error: &ConnectionError) -> bool {
        metrics::record_connection_error(&self.config.host, error.stage());
        tracing::warn!(error = %error, "Connection error");

        self.report(InboundEvent::Connection(false)).await
            && self.report(InboundEvent::Error(error.to_string())).await
    }

    /// Drop commands queued before this connection existed.
    ///
    /// Returns `false` if a stop was among them.
    fn discard_stale_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Stop => return false,
                Command::Disconnect => tracing::debug!("Discarding stale disconnect"),
                Command::Send(bytes) => {
                    tracing::debug!(len = bytes.len(), "Discarding stale send");
                }
            }
        }
        true
    }

    /// Sleep between attempts. Returns `false` if stopped while waiting.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => return false,
                    Some(_) => tracing::debug!("Ignoring command while disconnected"),
                },
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Connection state changed");
            metrics::set_connected(&self.config.host, next.is_connected());
            self.state = next;
        }
    }
}
