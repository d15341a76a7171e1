//! Driver context: the collaborators every driver operation works with.
//!
//! Built once when the driver is registered and dropped at shutdown.

use crate::application::backend_sync::{BackendSync, NETWORK_TYPE};
use crate::application::persistence::NetworkStore;
use crate::domain::entities::NotifyEvent;
use crate::domain::ports::{KvStore, NetworkBackend};
use crate::domain::errors::DriverError;
use crate::gossip::NotifyQueue;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Key-space prefix shared by all hosts of a cluster (default: "overlay")
    pub realm: String,
    /// Backend network type tag (default: "overlay")
    pub network_type: String,
    /// Attempts per store write before giving up on version conflicts (default: 3)
    pub write_attempts: usize,
    /// Capacity of the local endpoint notification queue (default: 256)
    pub notify_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            realm: "overlay".to_string(),
            network_type: NETWORK_TYPE.to_string(),
            write_attempts: 3,
            notify_capacity: 256,
        }
    }
}

impl DriverConfig {
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn write_attempts(mut self, attempts: usize) -> Self {
        self.write_attempts = attempts;
        self
    }

    pub fn notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity;
        self
    }
}

pub struct DriverContext {
    pub config: DriverConfig,
    pub backend: BackendSync,
    /// `None` while running local-only.
    store: RwLock<Option<Arc<NetworkStore>>>,
    pub notify: NotifyQueue,
}

impl DriverContext {
    /// Build the context and the receiving end of its notification queue.
    pub fn new(
        config: DriverConfig,
        backend: Arc<dyn NetworkBackend>,
        kv: Option<Arc<dyn KvStore>>,
    ) -> (Self, mpsc::Receiver<NotifyEvent>) {
        let (notify, notify_rx) = NotifyQueue::channel(config.notify_capacity);
        let store = kv.map(|kv| {
            Arc::new(NetworkStore::new(kv, config.realm.clone(), config.write_attempts))
        });
        let backend = BackendSync::new(backend, config.network_type.clone());

        (
            Self {
                config,
                backend,
                store: RwLock::new(store),
                notify,
            },
            notify_rx,
        )
    }

    pub fn store(&self) -> Option<Arc<NetworkStore>> {
        self.store.read().clone()
    }

    pub fn has_store(&self) -> bool {
        self.store.read().is_some()
    }

    /// Attach a cluster store to a driver that started local-only.
    pub fn attach_store(&self, kv: Arc<dyn KvStore>) -> Result<(), DriverError> {
        let mut store = self.store.write();
        if store.is_some() {
            return Err(DriverError::Forbidden(
                "cluster store already configured".to_string(),
            ));
        }
        *store = Some(Arc::new(NetworkStore::new(
            kv,
            self.config.realm.clone(),
            self.config.write_attempts,
        )));
        tracing::info!("cluster store attached, realm={}", self.config.realm);
        Ok(())
    }
}
