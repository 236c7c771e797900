//! Port Interfaces
//!
//! Defines the contract collaborators implement to receive stream
//! notifications. Any `Send + Sync` type providing the callbacks below can
//! be attached to a client; there is no base type to inherit from.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamObserver`: receives data, connection and error notifications

use crate::domain::message::ParsedMessage;

// =============================================================================
// Errors
// =============================================================================

/// Failure reported by an observer callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ObserverError(String);

impl ObserverError {
    /// Create an observer error from a description.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The failure description.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Error delivered to observers through `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The connection loop hit a connect, read or write failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// One of this observer's own callbacks failed.
    #[error("observer {observer} failed: {reason}")]
    Observer {
        /// Name of the failing observer.
        observer: String,
        /// What went wrong.
        reason: String,
    },
}

// =============================================================================
// Observer Port
// =============================================================================

/// Subscriber notified of stream activity.
///
/// Callbacks run on the processing stage, outside any registry lock. A
/// callback that returns `Err` or panics is isolated from other observers
/// and reported back to the same observer through `on_error`.
pub trait StreamObserver: Send + Sync {
    /// A frame was received and classified.
    ///
    /// # Errors
    ///
    /// Implementations return an error when they cannot handle the message.
    fn on_data_received(&self, message: &ParsedMessage) -> Result<(), ObserverError>;

    /// The connection came up (`true`) or went down (`false`).
    ///
    /// # Errors
    ///
    /// Implementations return an error when they cannot handle the change.
    fn on_connection_changed(&self, connected: bool) -> Result<(), ObserverError> {
        let _ = connected;
        Ok(())
    }

    /// A connection or observer failure occurred.
    ///
    /// # Errors
    ///
    /// Implementations return an error when they cannot handle the report.
    fn on_error(&self, error: &StreamError) -> Result<(), ObserverError> {
        let _ = error;
        Ok(())
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
