//! Gossip membership and event dissemination between hosts.

pub mod config;
pub mod join_gate;
pub mod membership;
pub mod notify;
pub mod protocol;
pub mod types;
pub mod udp_transport;

pub use config::{ConfigError, GossipConfig};
pub use join_gate::{JoinGate, JoinState};
pub use membership::{GossipMembership, PeerEventHandler};
pub use notify::NotifyQueue;
pub use types::{GossipMessage, NodeId};
pub use udp_transport::UdpGossipTransport;
