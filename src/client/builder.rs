use std::sync::Arc;

use tracing::info;

use super::Client;
use crate::store::KvStore;
use crate::Error;
use crate::Result;
use crate::Settings;

pub struct ClientBuilder {
    settings: Settings,
}

impl ClientBuilder {
    /// Create a new builder from loaded settings
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Override the root prefix relative keys resolve against
    pub fn root(
        mut self,
        root: impl Into<String>,
    ) -> Self {
        self.settings.store.root = root.into();
        self
    }

    /// Set connection and snapshot read timeout (default: 5s)
    pub fn timeout_seconds(
        mut self,
        seconds: u64,
    ) -> Self {
        self.settings.store.timeout_seconds = seconds;
        self
    }

    /// Log every applied event at debug level
    pub fn trace_events(
        mut self,
        enable: bool,
    ) -> Self {
        self.settings.watch.trace_events = enable;
        self
    }

    /// Validates settings and checks the store is reachable within the timeout.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] for invalid settings
    /// - [`Error::Connection`] if no endpoint answers in time
    pub async fn build(
        self,
        store: Arc<dyn KvStore>,
    ) -> Result<Client> {
        let settings = self.settings.validate()?;
        let timeout = settings.store.timeout();

        match tokio::time::timeout(timeout, store.health_check()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::Connection(format!(
                    "no endpoint of {:?} reachable: {e}",
                    settings.store.endpoints
                )))
            }
            Err(_) => {
                return Err(Error::Connection(format!(
                    "no endpoint of {:?} reachable within {timeout:?}",
                    settings.store.endpoints
                )))
            }
        }

        info!(endpoints = ?settings.store.endpoints, root = %settings.store.root, "Store client connected");
        Ok(Client::new(settings, store))
    }
}
