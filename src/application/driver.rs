//! Overlay Driver
//!
//! Entry point used by the container runtime: network and endpoint
//! operations, discovery notifications and shutdown.

use crate::application::context::{DriverConfig, DriverContext};
use crate::application::options::CreateNetworkRequest;
use crate::application::registry::{CreateOutcome, NetworkRegistry, RegistryEvent};
use crate::application::restorer::{RestoreReport, Restorer};
use crate::domain::entities::{Endpoint, Network};
use crate::domain::errors::DriverError;
use crate::domain::ports::{GossipTransport, KvStore, NetworkBackend};
use crate::domain::value_objects::MacAddress;
use crate::gossip::{GossipConfig, GossipMembership, JoinState};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Discovery notification payloads.
#[derive(Clone)]
pub enum DiscoveryData {
    /// A host (this one when `is_self`) became reachable at `address`.
    NodeDiscovery {
        address: String,
        bind_address: Option<String>,
        is_self: bool,
    },
    /// Cluster store handed to a driver that started without one.
    DatastoreConfig { store: Arc<dyn KvStore> },
}

impl std::fmt::Debug for DiscoveryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeDiscovery {
                address,
                bind_address,
                is_self,
            } => f
                .debug_struct("NodeDiscovery")
                .field("address", address)
                .field("bind_address", bind_address)
                .field("is_self", is_self)
                .finish(),
            Self::DatastoreConfig { .. } => f.write_str("DatastoreConfig"),
        }
    }
}

pub struct OverlayDriver {
    ctx: Arc<DriverContext>,
    registry: Arc<NetworkRegistry>,
    gossip: GossipMembership,
    restored: RestoreReport,
}

impl OverlayDriver {
    /// Build the driver and restore the networks the backend still has.
    pub async fn new(
        config: DriverConfig,
        gossip_config: GossipConfig,
        backend: Arc<dyn NetworkBackend>,
        store: Option<Arc<dyn KvStore>>,
        transport: Arc<dyn GossipTransport>,
    ) -> Result<Self, DriverError> {
        gossip_config
            .validate()
            .map_err(|e| DriverError::Validation(e.to_string()))?;

        let (ctx, notify_rx) = DriverContext::new(config, backend, store);
        let ctx = Arc::new(ctx);
        let registry = Arc::new(NetworkRegistry::new(ctx.clone()));

        tracing::info!(
            "restoring {} networks from backend (store configured: {})",
            ctx.config.network_type,
            ctx.has_store()
        );
        let restored = Restorer::new(&registry).run().await?;

        let gossip = GossipMembership::new(
            gossip_config,
            transport,
            registry.clone(),
            ctx.notify.clone(),
            notify_rx,
        );

        Ok(Self {
            ctx,
            registry,
            gossip,
            restored,
        })
    }

    pub fn network_type(&self) -> &str {
        &self.ctx.config.network_type
    }

    pub fn node_id(&self) -> &str {
        self.gossip.node_id()
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn restore_report(&self) -> &RestoreReport {
        &self.restored
    }

    pub fn join_state(&self) -> JoinState {
        self.gossip.join_state()
    }

    pub fn is_local_only(&self) -> bool {
        !self.ctx.has_store() || self.gossip.is_disabled()
    }

    /// Subscribe to eviction notices.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    pub async fn create_network(&self, request: CreateNetworkRequest) -> Result<CreateOutcome, DriverError> {
        self.registry.create_network(request).await
    }

    pub async fn delete_network(&self, id: &str) -> Result<(), DriverError> {
        self.registry.delete_network(id).await
    }

    pub async fn network(&self, id: &str) -> Result<Arc<Network>, DriverError> {
        self.registry.lookup(id).await
    }

    pub async fn create_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
        mac: MacAddress,
        ip: Ipv4Addr,
    ) -> Result<Endpoint, DriverError> {
        self.registry.create_endpoint(network_id, endpoint_id, mac, ip).await
    }

    pub async fn delete_endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<(), DriverError> {
        self.registry.delete_endpoint(network_id, endpoint_id).await
    }

    /// Handle a discovery notification.
    pub async fn discover_new(&self, data: DiscoveryData) -> Result<(), DriverError> {
        match data {
            DiscoveryData::NodeDiscovery {
                address,
                bind_address,
                is_self,
            } => {
                let address = parse_ip(&address)?;
                let bind = match bind_address.as_deref() {
                    None | Some("") => None,
                    Some(raw) => Some(parse_ip(raw)?),
                };

                if !self.ctx.has_store() {
                    tracing::debug!("no cluster store, ignoring discovery of {}", address);
                    return Ok(());
                }

                if is_self {
                    self.gossip.discover_self(address, bind).await
                } else {
                    self.gossip.discover_neighbor(address).await;
                    Ok(())
                }
            }
            DiscoveryData::DatastoreConfig { store } => self.ctx.attach_store(store),
        }
    }

    /// Handle a discovery withdrawal. Nothing to do.
    pub async fn discover_delete(&self, data: DiscoveryData) -> Result<(), DriverError> {
        tracing::debug!("ignoring discovery withdrawal {:?}", data);
        Ok(())
    }

    /// Stop gossip and wait for the background task to exit.
    pub async fn shutdown(&self) {
        self.gossip.shutdown().await;
        tracing::info!("overlay driver stopped");
    }
}

fn parse_ip(raw: &str) -> Result<IpAddr, DriverError> {
    if raw.is_empty() {
        return Err(DriverError::Validation("discovery address is empty".to_string()));
    }
    raw.parse()
        .map_err(|_| DriverError::Validation(format!("invalid discovery address {:?}", raw)))
}
