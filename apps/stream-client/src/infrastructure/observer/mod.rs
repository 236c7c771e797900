//! Observer Registry
//!
//! Fan-out of stream notifications to attached observers.
//!
//! # Design
//!
//! The registry keeps an ordered, identity-unique list of observers behind a
//! `parking_lot::Mutex`. Every notification:
//!
//! 1. clones the list under the lock
//! 2. releases the lock
//! 3. calls each observer in registration order
//!
//! so observers may attach or detach (even themselves) from inside a
//! callback. A callback that returns `Err` or panics affects only that
//! observer: the failure is logged, counted, and reported back to the same
//! observer through one guarded `on_error` call.

mod logging;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

pub use logging::TracingObserver;

use crate::application::ports::{ObserverError, StreamError, StreamObserver};
use crate::domain::message::ParsedMessage;
use crate::infrastructure::metrics;

/// Shared observer handle.
pub type ObserverRef = Arc<dyn StreamObserver>;

/// Ordered set of observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<ObserverRef>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .observers
            .lock()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        f.debug_struct("ObserverRegistry")
            .field("observers", &names)
            .finish()
    }
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer. Returns `false` if it was already attached.
    pub fn attach(&self, observer: ObserverRef) -> bool {
        let mut observers = self.observers.lock();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        tracing::debug!(observer = observer.name(), "Observer attached");
        observers.push(observer);
        true
    }

    /// Detach an observer. Returns `false` if it was not attached.
    pub fn detach(&self, observer: &ObserverRef) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        let removed = observers.len() != before;
        if removed {
            tracing::debug!(observer = observer.name(), "Observer detached");
        }
        removed
    }

    /// Number of attached observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Whether no observers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    /// Point-in-time copy of the attached observers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObserverRef> {
        self.observers.lock().clone()
    }

    /// Deliver a parsed message.
    pub fn notify_data(&self, message: &ParsedMessage) {
        for observer in self.snapshot() {
            if let Err(reason) = guarded(|| observer.on_data_received(message)) {
                report_failure(&observer, "on_data_received", reason);
            }
        }
    }

    /// Deliver a connection state change.
    pub fn notify_connection(&self, connected: bool) {
        for observer in self.snapshot() {
            if let Err(reason) = guarded(|| observer.on_connection_changed(connected)) {
                report_failure(&observer, "on_connection_changed", reason);
            }
        }
    }

    /// Deliver an error. Failures here are logged only.
    pub fn notify_error(&self, error: &StreamError) {
        for observer in self.snapshot() {
            if let Err(reason) = guarded(|| observer.on_error(error)) {
                metrics::record_observer_failure(observer.name());
                tracing::warn!(
                    observer = observer.name(),
                    callback = "on_error",
                    %reason,
                    "Observer callback failed"
                );
            }
        }
    }
}

fn same_observer(a: &ObserverRef, b: &ObserverRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Run a callback, turning both `Err` and panics into a reason string.
fn guarded<F>(callback: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), ObserverError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.reason().to_string()),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

fn report_failure(observer: &ObserverRef, callback: &'static str, reason: String) {
    metrics::record_observer_failure(observer.name());
    tracing::warn!(
        observer = observer.name(),
        callback,
        %reason,
        "Observer callback failed"
    );

    let error = StreamError::Observer {
        observer: observer.name().to_string(),
        reason,
    };
    if let Err(reason) = guarded(|| observer.on_error(&error)) {
        tracing::warn!(
            observer = observer.name(),
            %reason,
            "Observer failed while handling its own error"
        );
    }
}
