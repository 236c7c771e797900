//! Processing Stage
//!
//! Drains the inbound channel, classifies frames, keeps statistics and fans
//! results out to observers. Statistics are updated under the tracker's lock;
//! observers are called after it is released.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::boundary::{InboundEvent, InboundReceiver};
use super::codec::FrameClassifier;
use crate::application::ports::StreamError;
use crate::domain::stats::StatsTracker;
use crate::infrastructure::metrics;
use crate::infrastructure::observer::ObserverRegistry;

/// Consumer side of a client.
#[derive(Debug)]
pub struct ProcessingStage {
    inbound: InboundReceiver,
    observers: Arc<ObserverRegistry>,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
    classifier: FrameClassifier,
    poll_interval: Duration,
}

impl ProcessingStage {
    /// Create a processing stage.
    #[must_use]
    pub const fn new(
        inbound: InboundReceiver,
        observers: Arc<ObserverRegistry>,
        stats: Arc<StatsTracker>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inbound,
            observers,
            stats,
            cancel,
            classifier: FrameClassifier::new(),
            poll_interval,
        }
    }

    /// Run until cancelled or the connection loop is gone and the queue is drained.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::debug!("Processing stage cancelled");
                    break;
                }

                next = tokio::time::timeout(self.poll_interval, self.inbound.recv()) => match next {
                    Err(_) => {}
                    Ok(Some(event)) => self.handle(event),
                    Ok(None) => {
                        tracing::debug!("Inbound channel closed");
                        break;
                    }
                },
            }
        }

        if self.stats.set_connected(false) {
            self.observers.notify_connection(false);
        }
        tracing::debug!("Processing stage stopped");
    }

    fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::Data(frame) => {
                let message = self.classifier.classify(&frame.payload);
                metrics::record_message_classified(message.format);
                self.stats.record_frame(frame.len(), message.timestamp);
                tracing::trace!(
                    message_type = %message.message_type,
                    format = message.format.as_str(),
                    len = frame.len(),
                    "Frame classified"
                );
                self.observers.notify_data(&message);
            }
            InboundEvent::Connection(connected) => {
                self.stats.set_connected(connected);
                self.observers.notify_connection(connected);
            }
            InboundEvent::Dropped { frames, bytes } => {
                tracing::debug!(frames, bytes, "Connection loop dropped frames");
                self.stats.record_dropped(frames, bytes);
            }
            InboundEvent::Error(description) => {
                self.observers
                    .notify_error(&StreamError::Connection(description));
            }
        }
    }
}
