//! Network Registry
//!
//! Authoritative in-memory map from network id to network, and the
//! create/delete/lookup operations that keep it consistent with the backend
//! and the cluster store.
//!
//! Lock order: the registry map lock may be held while taking a network
//! lock, never the reverse. Neither lock is held across an await.

use crate::application::context::DriverContext;
use crate::application::options::CreateNetworkRequest;
use crate::domain::entities::{Endpoint, Network, NetworkState, NotifyAction, NotifyEvent, Subnet};
use crate::domain::errors::DriverError;
use crate::domain::ports::PeerEvent;
use crate::domain::value_objects::{MacAddress, Vni};
use crate::gossip::PeerEventHandler;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Registry changes made on behalf of another operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// `network_id` was removed because `replaced_by` claimed `vni`.
    NetworkEvicted {
        network_id: String,
        vni: Vni,
        replaced_by: String,
    },
}

/// Result of a successful create.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub network: Arc<Network>,
    /// Ids of networks removed because they held one of the new network's VNIs.
    pub evicted: Vec<String>,
}

/// Outcome of installing a network that was not created locally.
pub enum Install {
    Installed,
    /// Another caller installed the same id first.
    Exists(Arc<Network>),
    /// An installed network already holds one of its VNIs.
    VniTaken { vni: Vni, owner: String },
}

pub struct NetworkRegistry {
    ctx: Arc<DriverContext>,
    networks: Mutex<HashMap<String, Arc<Network>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl NetworkRegistry {
    pub fn new(ctx: Arc<DriverContext>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            ctx,
            networks: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn context(&self) -> &Arc<DriverContext> {
        &self.ctx
    }

    /// Subscribe to eviction notices.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Network by id, memory only.
    pub fn get(&self, id: &str) -> Option<Arc<Network>> {
        self.networks.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.networks.lock().contains_key(id)
    }

    pub fn networks(&self) -> Vec<Arc<Network>> {
        self.networks.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.networks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.lock().is_empty()
    }

    /// Network holding `vni`, if any.
    pub fn owner_of(&self, vni: Vni) -> Option<Arc<Network>> {
        self.networks
            .lock()
            .values()
            .find(|n| n.holds_vni(vni))
            .cloned()
    }

    /// Insert `network` and return every other network that shares one of
    /// its VNIs, paired with the first shared VNI. The returned networks are
    /// still in the map.
    fn insert_with_conflicts(&self, network: Arc<Network>) -> Vec<(Arc<Network>, Vni)> {
        let vnis = network.vnis();
        let mut map = self.networks.lock();

        let conflicts = map
            .values()
            .filter(|other| other.id() != network.id())
            .filter_map(|other| {
                vnis.iter()
                    .find(|v| other.holds_vni(**v))
                    .map(|v| (other.clone(), *v))
            })
            .collect();

        map.insert(network.id().to_string(), network);
        conflicts
    }

    /// Install a network unless its id or one of its VNIs is already taken.
    pub fn try_install(&self, network: Arc<Network>) -> Install {
        let mut map = self.networks.lock();

        if let Some(existing) = map.get(network.id()) {
            return Install::Exists(existing.clone());
        }
        for vni in network.vnis() {
            if let Some(owner) = map.values().find(|n| n.holds_vni(vni)) {
                return Install::VniTaken {
                    vni,
                    owner: owner.id().to_string(),
                };
            }
        }

        map.insert(network.id().to_string(), network);
        Install::Installed
    }

    /// Remove `network` only if the map still holds this exact instance.
    fn remove_exact(&self, network: &Arc<Network>) -> bool {
        let mut map = self.networks.lock();
        match map.get(network.id()) {
            Some(current) if Arc::ptr_eq(current, network) => {
                map.remove(network.id());
                true
            }
            _ => false,
        }
    }

    /// Create a network, evicting any network holding one of its VNIs.
    ///
    /// An existing network with the same id is deleted first. If the backend
    /// object or the record cannot be created, the registry is left without
    /// the new network; evictions already performed stay.
    pub async fn create_network(
        &self,
        request: CreateNetworkRequest,
    ) -> Result<CreateOutcome, DriverError> {
        let pairs = request.validate()?;
        let id = request.id.clone();

        if let Some(existing) = self.get(&id) {
            tracing::debug!("network {} preexists, deleting before recreate", id);
            if let Err(e) = self.remove_network(&existing, false).await {
                tracing::error!("error deleting stale network {}: {}", id, e);
            }
        }

        let options = request.options;
        let state = NetworkState {
            name: options.name.unwrap_or_else(|| id.clone()),
            subnets: pairs
                .into_iter()
                .map(|(pool, vni)| Subnet::new(vni, pool.pool, pool.gateway))
                .collect(),
            backend_id: options.backend_id,
            interface_name: options.interface_name,
            secure: options.secure,
            ..Default::default()
        };
        let preexisting_backend = state.backend_id.is_some();
        let network = Arc::new(Network::new(id.clone(), state));

        let mut evicted = Vec::new();
        for (stale, vni) in self.insert_with_conflicts(network.clone()) {
            tracing::warn!(
                "evicting network {} holding vni {} now claimed by network {}",
                stale.id(),
                vni,
                id
            );
            if let Err(e) = self.remove_network(&stale, true).await {
                tracing::warn!("evicted network {} left state behind: {}", stale.id(), e);
            }
            let _ = self.events.send(RegistryEvent::NetworkEvicted {
                network_id: stale.id().to_string(),
                vni,
                replaced_by: id.clone(),
            });
            evicted.push(stale.id().to_string());
        }

        if let Err(e) = self.ctx.backend.materialize(&network).await {
            self.remove_exact(&network);
            return Err(e);
        }

        if let Some(store) = self.ctx.store() {
            // The request is authoritative over any record another host left behind.
            let requested = network.snapshot();
            let intent = |s: &mut NetworkState| {
                s.name = requested.name.clone();
                s.subnets = requested.subnets.clone();
                s.interface_name = requested.interface_name.clone();
                s.secure = requested.secure;
            };
            if let Err(e) = store.write_with(&network, intent).await {
                tracing::error!("failed to persist network {}: {}", id, e);
                if !preexisting_backend {
                    if let Err(de) = self.ctx.backend.dematerialize(&network).await {
                        tracing::warn!("backend object of network {} may linger: {}", id, de);
                    }
                }
                self.remove_exact(&network);
                return Err(e);
            }
        }

        tracing::info!(
            "created network {} vnis={:?} backend_id={:?}",
            id,
            network.vnis().iter().map(|v| v.value()).collect::<Vec<_>>(),
            network.backend_id()
        );
        Ok(CreateOutcome { network, evicted })
    }

    /// Delete a network known to this host.
    ///
    /// A backend failure is reported as `Forbidden` and leaves the network
    /// in place.
    pub async fn delete_network(&self, id: &str) -> Result<(), DriverError> {
        if id.is_empty() {
            return Err(DriverError::Validation("invalid network id".to_string()));
        }
        let network = self
            .get(id)
            .ok_or_else(|| DriverError::network_not_found(id))?;

        self.remove_network(&network, false).await?;
        tracing::info!("deleted network {}", id);
        Ok(())
    }

    /// Tear down `network`: backend object, registry entry, store record.
    ///
    /// With `force`, a backend failure is logged and the entry is removed anyway.
    async fn remove_network(&self, network: &Arc<Network>, force: bool) -> Result<(), DriverError> {
        if let Err(e) = self.ctx.backend.dematerialize(network).await {
            if !force {
                return Err(DriverError::Forbidden(format!(
                    "could not delete backend object of network {}: {}",
                    network.id(),
                    e
                )));
            }
            tracing::warn!(
                "divergence: backend object of network {} may linger: {}",
                network.id(),
                e
            );
        }

        self.remove_exact(network);

        if let Some(store) = self.ctx.store() {
            store.delete(network).await?;
        }
        Ok(())
    }

    /// Network by id, reading through to the store and backend on a miss.
    ///
    /// A record whose VNIs collide with an installed network is stale and
    /// reads as not found.
    pub async fn lookup(&self, id: &str) -> Result<Arc<Network>, DriverError> {
        if let Some(network) = self.get(id) {
            return Ok(network);
        }

        let store = match self.ctx.store() {
            Some(store) => store,
            None => return Err(DriverError::network_not_found(id)),
        };
        let stored = store
            .read(id)
            .await?
            .ok_or_else(|| DriverError::network_not_found(id))?;

        let network = Arc::new(Network::new(id, stored.state));
        for vni in network.vnis() {
            if let Some(owner) = self.owner_of(vni) {
                tracing::warn!(
                    "divergence: record of network {} claims vni {} owned by network {}, ignoring record",
                    id,
                    vni,
                    owner.id()
                );
                return Err(DriverError::network_not_found(id));
            }
        }

        if let Some(backend_id) = network.backend_id() {
            if !self.ctx.backend.network_exists(&backend_id).await? {
                tracing::warn!(
                    "divergence: backend object {} of network {} is gone, recreating",
                    backend_id,
                    id
                );
                network.with_state(|s| s.backend_id = None);
            }
        }

        let created_here = network.backend_id().is_none();
        if created_here {
            self.ctx.backend.materialize(&network).await?;
        }

        match self.try_install(network.clone()) {
            Install::Installed => {}
            Install::Exists(winner) => {
                if created_here {
                    self.discard_backend(&network).await;
                }
                return Ok(winner);
            }
            Install::VniTaken { vni, owner } => {
                tracing::warn!(
                    "divergence: network {} lost vni {} to network {} during lookup",
                    id,
                    vni,
                    owner
                );
                if created_here {
                    self.discard_backend(&network).await;
                }
                return Err(DriverError::network_not_found(id));
            }
        }

        if created_here {
            if let Err(e) = store.write(&network).await {
                tracing::warn!("could not record new backend id of network {}: {}", id, e);
            }
        }

        tracing::debug!("network {} loaded from store", id);
        Ok(network)
    }

    async fn discard_backend(&self, network: &Network) {
        if let Err(e) = self.ctx.backend.dematerialize(network).await {
            tracing::warn!("backend object of network {} may linger: {}", network.id(), e);
        }
    }

    /// Create a local endpoint and announce it to peers.
    pub async fn create_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
        mac: MacAddress,
        ip: Ipv4Addr,
    ) -> Result<Endpoint, DriverError> {
        if endpoint_id.is_empty() {
            return Err(DriverError::Validation("invalid endpoint id".to_string()));
        }
        let network = self.lookup(network_id).await?;

        if network.endpoint(endpoint_id).is_some() {
            return Err(DriverError::Forbidden(format!(
                "endpoint {} already exists in network {}",
                endpoint_id, network_id
            )));
        }
        if !network.contains(ip) {
            return Err(DriverError::Validation(format!(
                "address {} is outside the subnets of network {}",
                ip, network_id
            )));
        }

        let mut endpoint = Endpoint {
            id: endpoint_id.to_string(),
            backend_id: None,
            network_id: network_id.to_string(),
            mac,
            ip,
            remote: false,
        };
        self.ctx.backend.materialize_endpoint(&network, &mut endpoint).await?;

        if !network.add_endpoint(endpoint.clone()) {
            if let Err(e) = self.ctx.backend.dematerialize_endpoint(&endpoint).await {
                tracing::warn!("backend endpoint {} may linger: {}", endpoint_id, e);
            }
            return Err(DriverError::Forbidden(format!(
                "endpoint {} already exists in network {}",
                endpoint_id, network_id
            )));
        }

        tracing::debug!("created endpoint {} in network {} ip={}", endpoint_id, network_id, ip);
        self.ctx
            .notify
            .push(NotifyEvent {
                action: NotifyAction::Join,
                network,
                endpoint: endpoint.clone(),
            })
            .await;
        Ok(endpoint)
    }

    /// Delete a local endpoint and announce it to peers. Remote endpoints are refused.
    pub async fn delete_endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<(), DriverError> {
        let network = self
            .get(network_id)
            .ok_or_else(|| DriverError::network_not_found(network_id))?;
        let endpoint = network
            .endpoint(endpoint_id)
            .ok_or_else(|| DriverError::endpoint_not_found(endpoint_id))?;

        if endpoint.remote {
            return Err(DriverError::Forbidden(format!(
                "endpoint {} belongs to another host",
                endpoint_id
            )));
        }

        self.ctx.backend.dematerialize_endpoint(&endpoint).await?;
        network.remove_endpoint(endpoint_id);

        tracing::debug!("deleted endpoint {} from network {}", endpoint_id, network_id);
        self.ctx
            .notify
            .push(NotifyEvent {
                action: NotifyAction::Leave,
                network,
                endpoint,
            })
            .await;
        Ok(())
    }

    /// Local endpoints of every network, for re-announcing after a join.
    pub fn local_endpoints(&self) -> Vec<(Arc<Network>, Endpoint)> {
        self.networks()
            .into_iter()
            .flat_map(|n| {
                n.endpoints()
                    .into_iter()
                    .filter(|e| !e.remote)
                    .map(move |e| (n.clone(), e))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    async fn add_remote_endpoint(&self, event: &PeerEvent) -> Result<(), DriverError> {
        let network = self.lookup(&event.network_id).await?;

        if let Some(existing) = network.endpoint(&event.endpoint_id) {
            if !existing.remote {
                tracing::warn!(
                    "peer {} announced endpoint {} that is local here, ignoring",
                    event.origin,
                    event.endpoint_id
                );
            }
            return Ok(());
        }
        if !network.contains(event.ip) {
            return Err(DriverError::Validation(format!(
                "remote endpoint {} address {} is outside network {}",
                event.endpoint_id, event.ip, event.network_id
            )));
        }

        let mut endpoint = Endpoint {
            id: event.endpoint_id.clone(),
            backend_id: None,
            network_id: event.network_id.clone(),
            mac: event.mac,
            ip: event.ip,
            remote: true,
        };
        self.ctx.backend.materialize_endpoint(&network, &mut endpoint).await?;
        if !network.add_endpoint(endpoint.clone()) {
            self.ctx.backend.dematerialize_endpoint(&endpoint).await?;
        }
        tracing::debug!(
            "added remote endpoint {} from {} to network {}",
            event.endpoint_id,
            event.origin,
            event.network_id
        );
        Ok(())
    }

    async fn remove_remote_endpoint(&self, event: &PeerEvent) -> Result<(), DriverError> {
        let network = match self.get(&event.network_id) {
            Some(n) => n,
            None => return Ok(()),
        };
        match network.endpoint(&event.endpoint_id) {
            Some(endpoint) if endpoint.remote => {
                self.ctx.backend.dematerialize_endpoint(&endpoint).await?;
                network.remove_endpoint(&event.endpoint_id);
                tracing::debug!(
                    "removed remote endpoint {} from network {}",
                    event.endpoint_id,
                    event.network_id
                );
            }
            Some(_) => tracing::warn!(
                "peer {} withdrew endpoint {} that is local here, ignoring",
                event.origin,
                event.endpoint_id
            ),
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl PeerEventHandler for NetworkRegistry {
    async fn handle_peer_event(&self, event: PeerEvent) {
        let result = match event.action {
            NotifyAction::Join => self.add_remote_endpoint(&event).await,
            NotifyAction::Leave => self.remove_remote_endpoint(&event).await,
        };
        if let Err(e) = result {
            tracing::warn!(
                "failed to apply {} of endpoint {} from {}: {}",
                event.action.as_str(),
                event.endpoint_id,
                event.origin,
                e
            );
        }
    }

    fn owned_endpoints(&self) -> Vec<(Arc<Network>, Endpoint)> {
        self.local_endpoints()
    }
}
