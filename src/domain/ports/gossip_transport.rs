//! Gossip Transport Port
//!
//! Membership and best-effort event dissemination between hosts. Only the
//! join/leave/broadcast contract is visible to the driver.

use crate::domain::entities::{NotifyAction, NotifyEvent};
use crate::domain::value_objects::MacAddress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::sync::mpsc;

/// Endpoint change as carried between hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub action: NotifyAction,
    pub network_id: String,
    pub endpoint_id: String,
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
    /// Node id of the host that owns the endpoint.
    pub origin: String,
}

impl PeerEvent {
    pub fn from_notify(event: &NotifyEvent, origin: &str) -> Self {
        Self {
            action: event.action,
            network_id: event.network.id().to_string(),
            endpoint_id: event.endpoint.id.clone(),
            mac: event.endpoint.mac,
            ip: event.endpoint.ip,
            origin: origin.to_string(),
        }
    }
}

/// Gossip transport failures.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("gossip transport not started")]
    NotStarted,
    #[error("join to {0} timed out")]
    JoinTimeout(SocketAddr),
    #[error("gossip io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gossip encode: {0}")]
    Encode(String),
}

/// Outbound port to the gossip layer.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Start listening on `local`. Returns the stream of events received from peers.
    async fn start(&self, local: SocketAddr) -> Result<mpsc::Receiver<PeerEvent>, GossipError>;

    /// Join the cluster through the node at `addr`.
    async fn join(&self, addr: SocketAddr) -> Result<(), GossipError>;

    /// Announce departure and stop the transport.
    async fn leave(&self);

    /// Fire-and-forget, at-most-once delivery to current members.
    async fn broadcast(&self, event: &PeerEvent) -> Result<(), GossipError>;
}
