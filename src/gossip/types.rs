//! Gossip wire types.

use crate::domain::ports::{GossipError, PeerEvent};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Unique identifier for a host in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peer event with a CRC32 over its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: PeerEvent,
    pub checksum: u32,
}

impl EventEnvelope {
    pub fn new(event: PeerEvent) -> Self {
        let checksum = Self::compute_checksum(&event);
        Self { event, checksum }
    }

    pub fn verify(&self) -> bool {
        self.checksum == Self::compute_checksum(&self.event)
    }

    fn compute_checksum(event: &PeerEvent) -> u32 {
        let bytes = bincode::serialize(event).unwrap_or_default();
        crc32fast::hash(&bytes)
    }
}

/// Message types for the gossip protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Liveness probe
    Ping {
        sender_id: String,
        sender_addr: SocketAddr,
        incarnation: u64,
    },
    /// Response to ping
    Ack {
        sender_id: String,
        sender_addr: SocketAddr,
        incarnation: u64,
    },
    /// Request to join through the receiver
    Join { node_id: String, addr: SocketAddr },
    /// Reply to a join: every member the responder knows, itself included
    MemberList {
        members: Vec<(String, SocketAddr, u64)>, // (id, addr, incarnation)
    },
    /// Orderly departure
    Leave { node_id: String },
    /// Endpoint change broadcast
    Event(EventEnvelope),
}

impl GossipMessage {
    pub fn encode(&self) -> Result<Vec<u8>, GossipError> {
        bincode::serialize(self).map_err(|e| GossipError::Encode(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, GossipError> {
        bincode::deserialize(data).map_err(|e| GossipError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::NotifyAction;

    fn event() -> PeerEvent {
        PeerEvent {
            action: NotifyAction::Join,
            network_id: "net1".to_string(),
            endpoint_id: "ep1".to_string(),
            mac: "02:42:ac:14:00:05".parse().unwrap(),
            ip: "172.20.0.5".parse().unwrap(),
            origin: "node-a".to_string(),
        }
    }

    #[test]
    fn test_node_id() {
        let id = NodeId::new("node-a");
        assert_eq!(id.as_str(), "node-a");
        assert_eq!(id.to_string(), "node-a");
        assert_eq!(NodeId::from("node-a"), id);
    }

    #[test]
    fn test_envelope_checksum() {
        let envelope = EventEnvelope::new(event());
        assert!(envelope.verify());

        let mut tampered = envelope.clone();
        tampered.event.endpoint_id = "ep2".to_string();
        assert!(!tampered.verify());
    }

    #[test]
    fn test_message_encoding() {
        let msg = GossipMessage::Event(EventEnvelope::new(event()));
        let decoded = GossipMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            GossipMessage::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(GossipError::Encode(_))
        ));
    }
}
