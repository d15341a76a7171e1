mod gossip_transport;
mod kv_store;
mod network_backend;

pub use gossip_transport::{GossipError, GossipTransport, PeerEvent};
pub use kv_store::{KvEntry, KvStore, StoreError, StoreKey};
pub use network_backend::{
    BackendError, CreatedNetwork, EndpointDescriptor, NetworkBackend, NetworkDescriptor,
    SubnetDescriptor,
};
