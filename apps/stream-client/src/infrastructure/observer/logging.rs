//! Observer that logs every notification through `tracing`.

use crate::application::ports::{ObserverError, StreamError, StreamObserver};
use crate::domain::message::ParsedMessage;

/// Logs data at debug, connection changes at info and errors at warn.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    client: String,
}

impl TracingObserver {
    /// Create an observer labelled with a client name.
    #[must_use]
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }
}

impl StreamObserver for TracingObserver {
    fn on_data_received(&self, message: &ParsedMessage) -> Result<(), ObserverError> {
        tracing::debug!(
            client = %self.client,
            message_type = %message.message_type,
            format = message.format.as_str(),
            len = message.raw_data.len(),
            "Message received"
        );
        Ok(())
    }

    fn on_connection_changed(&self, connected: bool) -> Result<(), ObserverError> {
        tracing::info!(client = %self.client, connected, "Connection changed");
        Ok(())
    }

    fn on_error(&self, error: &StreamError) -> Result<(), ObserverError> {
        tracing::warn!(client = %self.client, error = %error, "Stream error");
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::tcp::codec::classify;

    #[test]
    fn never_fails() {
        let observer = TracingObserver::new("feed");
        assert!(observer.on_data_received(&classify(b"{}")).is_ok());
        assert!(observer.on_connection_changed(false).is_ok());
        assert!(
            observer
                .on_error(&StreamError::Connection("refused".to_string()))
                .is_ok()
        );
        assert_eq!(observer.name(), "tracing");
    }
}
