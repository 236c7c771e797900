//! Client Registry
//!
//! Named collection of stream clients shared by the binary and the health
//! server. The map lock is only held to look up, insert or remove entries;
//! client operations that await run after it is released.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ClientError, StreamClient};
use crate::domain::stats::Stats;
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::observer::ObserverRef;

/// Errors returned by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A client with this name already exists.
    #[error("client already exists: {0}")]
    AlreadyExists(String),

    /// No client with this name exists.
    #[error("client not found: {0}")]
    NotFound(String),

    /// The supplied configuration failed validation.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// A client operation failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Registry of named stream clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<BTreeMap<String, Arc<StreamClient>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a stopped client.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken or `InvalidConfig` if
    /// the configuration fails validation.
    pub fn create_client(
        &self,
        name: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Arc<StreamClient>, RegistryError> {
        let name = name.into();
        let mut clients = self.clients.write();
        if clients.contains_key(&name) {
            return Err(RegistryError::AlreadyExists(name));
        }

        let client = Arc::new(StreamClient::new(config)?);
        tracing::info!(client = %name, address = %client.config().address(), "Client registered");
        clients.insert(name, Arc::clone(&client));
        Ok(client)
    }

    /// Look up a client.
    #[must_use]
    pub fn get_client(&self, name: &str) -> Option<Arc<StreamClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Whether a client is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.clients.read().contains_key(name)
    }

    fn require(&self, name: &str) -> Result<Arc<StreamClient>, RegistryError> {
        self.get_client(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Attach an observer to a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    pub fn attach_listener(&self, name: &str, observer: ObserverRef) -> Result<bool, RegistryError> {
        Ok(self.require(name)?.attach(observer))
    }

    /// Detach an observer from a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    pub fn detach_listener(
        &self,
        name: &str,
        observer: &ObserverRef,
    ) -> Result<bool, RegistryError> {
        Ok(self.require(name)?.detach(observer))
    }

    /// Start a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist, or the client's
    /// start error.
    pub fn start_client(&self, name: &str) -> Result<(), RegistryError> {
        self.require(name)?.start()?;
        Ok(())
    }

    /// Stop a client, keeping it registered.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    pub async fn stop_client(&self, name: &str) -> Result<(), RegistryError> {
        let client = self.require(name)?;
        client.stop().await;
        Ok(())
    }

    /// Stop and unregister a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist.
    pub async fn remove_client(&self, name: &str) -> Result<(), RegistryError> {
        let client = self
            .clients
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        client.stop().await;
        tracing::info!(client = %name, "Client removed");
        Ok(())
    }

    /// Statistics for one client.
    #[must_use]
    pub fn client_stats(&self, name: &str) -> Option<Stats> {
        self.get_client(name).map(|c| c.get_stats())
    }

    /// Whether a client exists and is connected.
    #[must_use]
    pub fn is_connected(&self, name: &str) -> bool {
        self.get_client(name).is_some_and(|c| c.is_connected())
    }

    /// Registered client names, sorted.
    #[must_use]
    pub fn list_clients(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    /// Statistics for every client.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, Stats> {
        self.clients
            .read()
            .iter()
            .map(|(name, client)| (name.clone(), client.get_stats()))
            .collect()
    }

    /// Whether any registered client is connected.
    #[must_use]
    pub fn any_connected(&self) -> bool {
        self.clients.read().values().any(|c| c.is_connected())
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no clients are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Stop every client and clear the registry.
    pub async fn shutdown_all(&self) {
        let clients = std::mem::take(&mut *self.clients.write());
        for (name, client) in clients {
            tracing::debug!(client = %name, "Stopping client");
            client.stop().await;
        }
    }
}
