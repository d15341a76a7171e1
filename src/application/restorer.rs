//! Startup restore.
//!
//! Rebuilds the registry from the backend objects that survived a restart.
//! The backend decides which networks exist and which backend ids they
//! carry; the store record, when present, supplies the display name, the
//! secure flag, the interface and the VNI of each subnet.

use crate::application::backend_sync::BackendSync;
use crate::application::persistence::merge_record;
use crate::application::registry::{Install, NetworkRegistry};
use crate::domain::entities::Network;
use crate::domain::errors::DriverError;
use crate::domain::ports::{EndpointDescriptor, NetworkDescriptor};
use std::sync::Arc;

/// What a restore pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    /// Network ids (or backend object names) that could not be restored.
    pub skipped: Vec<String>,
    pub endpoints: usize,
    /// Networks recorded in the store without a backend object on this host.
    /// They are loaded on first lookup.
    pub deferred: Vec<String>,
}

pub struct Restorer<'a> {
    registry: &'a NetworkRegistry,
}

impl<'a> Restorer<'a> {
    pub fn new(registry: &'a NetworkRegistry) -> Self {
        Self { registry }
    }

    /// Restore every overlay network the backend still has.
    ///
    /// Only a failure to list backend networks aborts the pass.
    pub async fn run(&self) -> Result<RestoreReport, DriverError> {
        let ctx = self.registry.context();
        let network_type = ctx.backend.network_type().to_string();

        let descriptors = ctx
            .backend
            .backend()
            .list_network_objects(&network_type)
            .await?;
        let endpoints = match ctx.backend.backend().list_endpoint_objects().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!("failed to list backend endpoints, restoring networks only: {}", e);
                Vec::new()
            }
        };

        let mut report = RestoreReport::default();
        for descriptor in descriptors.iter().filter(|d| d.network_type == network_type) {
            let label = if descriptor.name.is_empty() {
                descriptor.id.clone().unwrap_or_default()
            } else {
                descriptor.name.clone()
            };

            match self.restore_network(descriptor, &endpoints).await {
                Ok(Some(count)) => {
                    report.restored.push(label);
                    report.endpoints += count;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping restore of network {}: {}", label, e);
                    report.skipped.push(label);
                }
            }
        }

        if let Some(store) = ctx.store() {
            match store.list().await {
                Ok(records) => {
                    report.deferred = records
                        .into_iter()
                        .map(|r| r.id)
                        .filter(|id| !self.registry.contains(id))
                        .collect();
                }
                Err(e) => tracing::warn!("failed to list network records: {}", e),
            }
        }

        tracing::info!(
            "restored {} networks ({} endpoints), skipped {}, {} more recorded in store",
            report.restored.len(),
            report.endpoints,
            report.skipped.len(),
            report.deferred.len()
        );
        Ok(report)
    }

    /// Returns the number of attached endpoints, or `None` if the network
    /// was already known.
    async fn restore_network(
        &self,
        descriptor: &NetworkDescriptor,
        endpoints: &[EndpointDescriptor],
    ) -> Result<Option<usize>, DriverError> {
        let ctx = self.registry.context();
        let (id, state) = ctx.backend.translate_network(descriptor)?;

        if self.registry.contains(&id) {
            tracing::debug!("network {} already known, skipping restore", id);
            return Ok(None);
        }

        let backend_id = state.backend_id.clone().unwrap_or_default();
        let network = Arc::new(Network::new(id.clone(), state));

        if let Some(store) = ctx.store() {
            match store.read(&id).await {
                Ok(Some(stored)) => merge_record(&network, stored.state),
                Ok(None) => tracing::debug!("no record for restored network {}", id),
                Err(e) => tracing::warn!("record of network {} unreadable, using backend view: {}", id, e),
            }
        }

        match self.registry.try_install(network.clone()) {
            Install::Installed => {}
            Install::Exists(_) => return Ok(None),
            Install::VniTaken { vni, owner } => {
                return Err(DriverError::Conflict { vni, owner });
            }
        }

        let mut attached = 0;
        for descriptor in endpoints.iter().filter(|e| e.network_backend_id == backend_id) {
            match BackendSync::translate_endpoint(descriptor, &id) {
                Ok(endpoint) => {
                    if network.add_endpoint(endpoint) {
                        attached += 1;
                    }
                }
                Err(e) => tracing::warn!("skipping endpoint of network {}: {}", id, e),
            }
        }

        tracing::debug!("restored network {} with {} endpoints", id, attached);
        Ok(Some(attached))
    }
}
