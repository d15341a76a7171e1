//! Domain Entities - Core driver objects
//!
//! A `Network` is shared as `Arc<Network>` between the registry, the gossip
//! sender and callers. Its mutable fields live behind its own lock; the
//! registry-wide map lock never covers them.

use crate::domain::value_objects::{MacAddress, Vni};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// One IPv4 subnet of an overlay network, with its VXLAN identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub vni: Vni,
    pub prefix: Ipv4Net,
    pub gateway: Option<Ipv4Addr>,
}

impl Subnet {
    pub fn new(vni: Vni, prefix: Ipv4Net, gateway: Option<Ipv4Addr>) -> Self {
        Self {
            vni,
            prefix,
            gateway,
        }
    }

    /// Same prefix length and same network address.
    pub fn matches_prefix(&self, prefix: &Ipv4Net) -> bool {
        self.prefix.prefix_len() == prefix.prefix_len() && self.prefix.addr() == prefix.addr()
    }
}

/// A network attachment point.
///
/// `remote` endpoints were learned from a peer host; they are never removed
/// by a local delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub backend_id: Option<String>,
    pub network_id: String,
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
    pub remote: bool,
}

/// Mutable state of a network, guarded by the network lock.
#[derive(Debug, Clone, Default)]
pub struct NetworkState {
    pub name: String,
    pub subnets: Vec<Subnet>,
    pub backend_id: Option<String>,
    pub provider_address: Option<String>,
    pub interface_name: Option<String>,
    pub secure: bool,
    /// Version index of the persisted record this state was read from or last written as.
    pub db_index: u64,
    pub db_exists: bool,
    pub endpoints: HashMap<String, Endpoint>,
}

/// An overlay network known to this host.
#[derive(Debug)]
pub struct Network {
    id: String,
    state: Mutex<NetworkState>,
}

impl Network {
    pub fn new(id: impl Into<String>, state: NetworkState) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> NetworkState {
        self.state.lock().clone()
    }

    /// Run `f` with the network lock held. `f` must not block.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut NetworkState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn backend_id(&self) -> Option<String> {
        self.state.lock().backend_id.clone()
    }

    pub fn subnets(&self) -> Vec<Subnet> {
        self.state.lock().subnets.clone()
    }

    pub fn vnis(&self) -> Vec<Vni> {
        self.state.lock().subnets.iter().map(|s| s.vni).collect()
    }

    pub fn holds_vni(&self, vni: Vni) -> bool {
        self.state.lock().subnets.iter().any(|s| s.vni == vni)
    }

    /// VNI of the subnet whose prefix matches `prefix`.
    pub fn vxlan_id(&self, prefix: &Ipv4Net) -> Option<Vni> {
        self.state
            .lock()
            .subnets
            .iter()
            .find(|s| s.matches_prefix(prefix))
            .map(|s| s.vni)
    }

    /// Update the VNI of the subnet matching `prefix`. Returns false if no subnet matches.
    pub fn set_vxlan_id(&self, prefix: &Ipv4Net, vni: Vni) -> bool {
        let mut state = self.state.lock();
        match state.subnets.iter_mut().find(|s| s.matches_prefix(prefix)) {
            Some(subnet) => {
                subnet.vni = vni;
                true
            }
            None => false,
        }
    }

    /// True if `ip` belongs to one of the network's subnets.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.state.lock().subnets.iter().any(|s| s.prefix.contains(&ip))
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<Endpoint> {
        self.state.lock().endpoints.get(endpoint_id).cloned()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().endpoints.values().cloned().collect()
    }

    /// Insert an endpoint. Returns false, leaving the existing entry, on a duplicate id.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> bool {
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&endpoint.id) {
            return false;
        }
        state.endpoints.insert(endpoint.id.clone(), endpoint);
        true
    }

    pub fn remove_endpoint(&self, endpoint_id: &str) -> Option<Endpoint> {
        self.state.lock().endpoints.remove(endpoint_id)
    }

    pub fn db_index(&self) -> (u64, bool) {
        let state = self.state.lock();
        (state.db_index, state.db_exists)
    }

    pub fn set_db_index(&self, index: u64) {
        let mut state = self.state.lock();
        state.db_index = index;
        state.db_exists = true;
    }
}

/// Kind of local endpoint change propagated to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyAction {
    Join,
    Leave,
}

impl NotifyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

/// Ephemeral message handed from the registry to the gossip sender.
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    pub action: NotifyAction,
    pub network: Arc<Network>,
    pub endpoint: Endpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(cidr: &str, vni: u32) -> Subnet {
        Subnet::new(Vni::new(vni).unwrap(), cidr.parse().unwrap(), None)
    }

    fn endpoint(id: &str, ip: [u8; 4]) -> Endpoint {
        Endpoint {
            id: id.to_string(),
            backend_id: None,
            network_id: "net1".to_string(),
            mac: MacAddress::new([2, 0, 0, 0, 0, ip[3]]),
            ip: Ipv4Addr::from(ip),
            remote: false,
        }
    }

    fn network() -> Network {
        Network::new(
            "net1",
            NetworkState {
                name: "net1".to_string(),
                subnets: vec![net("172.20.0.0/24", 100), net("172.21.0.0/16", 200)],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_subnet_matches_prefix_requires_same_length() {
        let s = net("10.0.0.0/24", 1);
        assert!(s.matches_prefix(&"10.0.0.0/24".parse().unwrap()));
        assert!(!s.matches_prefix(&"10.0.0.0/16".parse().unwrap()));
        assert!(!s.matches_prefix(&"10.0.1.0/24".parse().unwrap()));
    }

    #[test]
    fn test_network_vnis_and_holds() {
        let n = network();
        assert_eq!(n.vnis(), vec![Vni::new(100).unwrap(), Vni::new(200).unwrap()]);
        assert!(n.holds_vni(Vni::new(200).unwrap()));
        assert!(!n.holds_vni(Vni::new(300).unwrap()));
    }

    #[test]
    fn test_network_set_vxlan_id_by_prefix() {
        let n = network();
        let prefix: Ipv4Net = "172.21.0.0/16".parse().unwrap();
        assert!(n.set_vxlan_id(&prefix, Vni::new(201).unwrap()));
        assert_eq!(n.vxlan_id(&prefix), Some(Vni::new(201).unwrap()));

        let missing: Ipv4Net = "192.168.0.0/24".parse().unwrap();
        assert!(!n.set_vxlan_id(&missing, Vni::new(5).unwrap()));
        assert_eq!(n.vxlan_id(&missing), None);
    }

    #[test]
    fn test_network_contains() {
        let n = network();
        assert!(n.contains(Ipv4Addr::new(172, 20, 0, 9)));
        assert!(n.contains(Ipv4Addr::new(172, 21, 9, 9)));
        assert!(!n.contains(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_endpoint_ids_unique() {
        let n = network();
        assert!(n.add_endpoint(endpoint("ep1", [172, 20, 0, 2])));
        assert!(!n.add_endpoint(endpoint("ep1", [172, 20, 0, 3])));
        assert_eq!(n.endpoints().len(), 1);
        assert_eq!(n.endpoint("ep1").unwrap().ip, Ipv4Addr::new(172, 20, 0, 2));

        assert!(n.remove_endpoint("ep1").is_some());
        assert!(n.remove_endpoint("ep1").is_none());
    }

    #[test]
    fn test_db_index() {
        let n = network();
        assert_eq!(n.db_index(), (0, false));
        n.set_db_index(7);
        assert_eq!(n.db_index(), (7, true));
    }

    #[test]
    fn test_notify_action_str() {
        assert_eq!(NotifyAction::Join.as_str(), "join");
        assert_eq!(NotifyAction::Leave.as_str(), "leave");
    }
}
