//! Overlay network driver library
//!
//! Exposes the driver components for use in integration tests and as a
//! library embedded by a container runtime.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod gossip;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{CreateNetworkRequest, DiscoveryData, DriverConfig, OverlayDriver};
pub use config::load_config;
pub use domain::entities::{Endpoint, Network, NetworkState, Subnet};
pub use domain::errors::DriverError;
pub use domain::ports::{GossipTransport, KvStore, NetworkBackend};
pub use domain::value_objects::{MacAddress, Vni};
pub use gossip::{GossipConfig, UdpGossipTransport};
