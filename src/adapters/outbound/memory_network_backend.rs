//! In-Memory Network Backend
//!
//! Implements NetworkBackend with DashMap tables. Stands in for the host's
//! network service when none is attached, and lets tests seed objects and
//! inject failures.

use crate::domain::ports::{
    BackendError, CreatedNetwork, EndpointDescriptor, NetworkBackend, NetworkDescriptor,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    CreateNetwork,
    DeleteNetwork,
    ListNetworks,
    CreateEndpoint,
    DeleteEndpoint,
    ListEndpoints,
}

/// DashMap-backed network backend.
pub struct InMemoryNetworkBackend {
    networks: Arc<DashMap<String, NetworkDescriptor>>,
    endpoints: Arc<DashMap<String, EndpointDescriptor>>,
    management_address: Option<String>,
    failing: Mutex<HashSet<BackendOp>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryNetworkBackend {
    pub fn new() -> Self {
        Self {
            networks: Arc::new(DashMap::new()),
            endpoints: Arc::new(DashMap::new()),
            management_address: None,
            failing: Mutex::new(HashSet::new()),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Report `addr` as the management address of every created network.
    pub fn with_management_address(mut self, addr: impl Into<String>) -> Self {
        self.management_address = Some(addr.into());
        self
    }

    /// Make every call of `op` fail until `heal` is called.
    pub fn fail(&self, op: BackendOp) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: BackendOp) {
        self.failing.lock().remove(&op);
    }

    /// Add an object as if it had been created before this process started.
    /// Returns the backend id.
    pub fn insert_network(&self, mut descriptor: NetworkDescriptor) -> String {
        let id = descriptor
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        descriptor.id = Some(id.clone());
        self.networks.insert(id.clone(), descriptor);
        id
    }

    pub fn insert_endpoint(&self, mut descriptor: EndpointDescriptor) -> String {
        let id = descriptor
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        descriptor.id = Some(id.clone());
        self.endpoints.insert(id.clone(), descriptor);
        id
    }

    pub fn network(&self, backend_id: &str) -> Option<NetworkDescriptor> {
        self.networks.get(backend_id).map(|e| e.value().clone())
    }

    pub fn network_by_name(&self, name: &str) -> Option<NetworkDescriptor> {
        self.networks
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    pub fn endpoint(&self, backend_id: &str) -> Option<EndpointDescriptor> {
        self.endpoints.get(backend_id).map(|e| e.value().clone())
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: BackendOp) -> Result<(), BackendError> {
        if self.failing.lock().contains(&op) {
            return Err(BackendError::Failed(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }
}

impl Default for InMemoryNetworkBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkBackend for InMemoryNetworkBackend {
    async fn create_network_object(
        &self,
        descriptor: &NetworkDescriptor,
    ) -> Result<CreatedNetwork, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check(BackendOp::CreateNetwork)?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut stored = descriptor.clone();
        stored.id = Some(id.clone());
        stored.management_address = self.management_address.clone();
        self.networks.insert(id.clone(), stored);

        tracing::debug!("backend created network object name={} id={}", descriptor.name, id);
        Ok(CreatedNetwork {
            backend_id: id,
            management_address: self.management_address.clone(),
        })
    }

    async fn delete_network_object(&self, backend_id: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check(BackendOp::DeleteNetwork)?;

        if self.networks.remove(backend_id).is_none() {
            return Err(BackendError::NotFound(backend_id.to_string()));
        }
        self.endpoints
            .retain(|_, ep| ep.network_backend_id != backend_id);
        Ok(())
    }

    async fn list_network_objects(
        &self,
        type_filter: &str,
    ) -> Result<Vec<NetworkDescriptor>, BackendError> {
        self.check(BackendOp::ListNetworks)?;
        Ok(self
            .networks
            .iter()
            .filter(|e| type_filter.is_empty() || e.value().network_type == type_filter)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn create_endpoint_object(
        &self,
        descriptor: &EndpointDescriptor,
    ) -> Result<String, BackendError> {
        self.check(BackendOp::CreateEndpoint)?;
        if !self.networks.contains_key(&descriptor.network_backend_id) {
            return Err(BackendError::NotFound(descriptor.network_backend_id.clone()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut stored = descriptor.clone();
        stored.id = Some(id.clone());
        self.endpoints.insert(id.clone(), stored);
        Ok(id)
    }

    async fn delete_endpoint_object(&self, backend_id: &str) -> Result<(), BackendError> {
        self.check(BackendOp::DeleteEndpoint)?;
        match self.endpoints.remove(backend_id) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(backend_id.to_string())),
        }
    }

    async fn list_endpoint_objects(&self) -> Result<Vec<EndpointDescriptor>, BackendError> {
        self.check(BackendOp::ListEndpoints)?;
        Ok(self.endpoints.iter().map(|e| e.value().clone()).collect())
    }
}
