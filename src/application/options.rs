//! Create-network request and options.

use crate::domain::errors::DriverError;
use crate::domain::value_objects::Vni;
use ipnet::Ipv4Net;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

/// Display name label.
pub const LABEL_NETWORK_NAME: &str = "overlay.network.name";
/// Host interface the backend should attach the network to.
pub const LABEL_INTERFACE: &str = "overlay.network.interface";
/// Backend object id of a network that already exists in the backend.
pub const LABEL_BACKEND_ID: &str = "overlay.network.backend_id";
/// Comma-separated VNIs, one per IPv4 pool, in pool order.
pub const LABEL_VXLAN_ID_LIST: &str = "overlay.vxlan_id_list";
/// Request encrypted data-plane traffic.
pub const LABEL_ENCRYPTED: &str = "overlay.encrypted";

/// An IPv4 pool already resolved by address management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Pool {
    pub pool: Ipv4Net,
    pub gateway: Option<Ipv4Addr>,
}

impl Ipv4Pool {
    pub fn new(pool: Ipv4Net, gateway: Option<Ipv4Addr>) -> Self {
        Self { pool, gateway }
    }

    /// `0.0.0.0/0` is what address management hands out when it has nothing.
    pub fn is_unspecified(&self) -> bool {
        self.pool.prefix_len() == 0 && self.pool.addr().is_unspecified()
    }
}

/// Options accepted by create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkOptions {
    pub name: Option<String>,
    pub interface_name: Option<String>,
    pub backend_id: Option<String>,
    pub vnis: Vec<u32>,
    pub secure: bool,
}

impl NetworkOptions {
    /// Parse options from a generic label map. Unknown labels are ignored.
    pub fn from_labels(labels: &HashMap<String, String>) -> Result<Self, DriverError> {
        let mut options = Self::default();

        for (label, value) in labels {
            match label.as_str() {
                LABEL_NETWORK_NAME => options.name = non_empty(value),
                LABEL_INTERFACE => options.interface_name = non_empty(value),
                LABEL_BACKEND_ID => options.backend_id = non_empty(value),
                LABEL_VXLAN_ID_LIST => {
                    for raw in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        let vni = raw.parse::<u32>().map_err(|_| {
                            DriverError::Validation(format!("invalid vxlan id value {:?} passed", raw))
                        })?;
                        options.vnis.push(vni);
                    }
                }
                LABEL_ENCRYPTED => {
                    options.secure = value.is_empty() || value == "1" || value.eq_ignore_ascii_case("true")
                }
                _ => {}
            }
        }

        Ok(options)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A create-network request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNetworkRequest {
    pub id: String,
    pub ipv4_pools: Vec<Ipv4Pool>,
    pub options: NetworkOptions,
}

impl CreateNetworkRequest {
    pub fn new(id: impl Into<String>, ipv4_pools: Vec<Ipv4Pool>) -> Self {
        Self {
            id: id.into(),
            ipv4_pools,
            options: NetworkOptions::default(),
        }
    }

    pub fn with_options(mut self, options: NetworkOptions) -> Self {
        self.options = options;
        self
    }

    /// Take options from a label map, see [`NetworkOptions::from_labels`].
    pub fn with_labels(self, labels: &HashMap<String, String>) -> Result<Self, DriverError> {
        Ok(self.with_options(NetworkOptions::from_labels(labels)?))
    }

    /// Check the request and pair each pool with its VNI.
    pub fn validate(&self) -> Result<Vec<(Ipv4Pool, Vni)>, DriverError> {
        if self.id.is_empty() {
            return Err(DriverError::Validation("invalid network id".to_string()));
        }

        match self.ipv4_pools.first() {
            None => return Err(DriverError::Validation("ipv4 pool is empty".to_string())),
            Some(first) if first.is_unspecified() => {
                return Err(DriverError::Validation("ipv4 pool is empty".to_string()))
            }
            Some(_) => {}
        }

        if self.options.vnis.len() < self.ipv4_pools.len() {
            return Err(DriverError::Validation(format!(
                "insufficient vnis({}) passed to overlay, one per ipv4 pool is required",
                self.options.vnis.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.ipv4_pools.len());
        for (pool, raw) in self.ipv4_pools.iter().zip(&self.options.vnis) {
            let vni = Vni::new(*raw).map_err(|e| DriverError::Validation(e.to_string()))?;
            if !seen.insert(vni) {
                return Err(DriverError::Validation(format!(
                    "vni {} requested for more than one subnet",
                    vni
                )));
            }
            out.push((pool.clone(), vni));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(cidr: &str) -> Ipv4Pool {
        Ipv4Pool::new(cidr.parse().unwrap(), None)
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_labels() {
        let opts = NetworkOptions::from_labels(&labels(&[
            (LABEL_NETWORK_NAME, "frontend"),
            (LABEL_INTERFACE, "eth1"),
            (LABEL_VXLAN_ID_LIST, "4096, 4097"),
            (LABEL_ENCRYPTED, ""),
            ("com.example.unrelated", "x"),
        ]))
        .unwrap();

        assert_eq!(opts.name.as_deref(), Some("frontend"));
        assert_eq!(opts.interface_name.as_deref(), Some("eth1"));
        assert_eq!(opts.vnis, vec![4096, 4097]);
        assert!(opts.secure);
        assert!(opts.backend_id.is_none());
    }

    #[test]
    fn test_from_labels_rejects_bad_vni() {
        let err = NetworkOptions::from_labels(&labels(&[(LABEL_VXLAN_ID_LIST, "10,abc")])).unwrap_err();
        assert!(matches!(err, DriverError::Validation(ref m) if m.contains("abc")));
    }

    #[test]
    fn test_validate_empty_id() {
        let req = CreateNetworkRequest::new("", vec![pool("10.0.0.0/24")]);
        assert!(matches!(req.validate(), Err(DriverError::Validation(_))));
    }

    #[test]
    fn test_validate_no_pool_or_unspecified_pool() {
        let req = CreateNetworkRequest::new("n1", vec![]);
        assert!(matches!(req.validate(), Err(DriverError::Validation(_))));

        let req = CreateNetworkRequest::new("n1", vec![pool("0.0.0.0/0")]).with_options(NetworkOptions {
            vnis: vec![1],
            ..Default::default()
        });
        assert!(matches!(req.validate(), Err(DriverError::Validation(_))));
    }

    #[test]
    fn test_validate_insufficient_vnis() {
        let req = CreateNetworkRequest::new("n1", vec![pool("10.0.0.0/24"), pool("10.0.1.0/24")])
            .with_options(NetworkOptions {
                vnis: vec![1],
                ..Default::default()
            });
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("insufficient vnis"));
    }

    #[test]
    fn test_validate_vni_range_and_duplicates() {
        let req = CreateNetworkRequest::new("n1", vec![pool("10.0.0.0/24")]).with_options(NetworkOptions {
            vnis: vec![1 << 24],
            ..Default::default()
        });
        assert!(matches!(req.validate(), Err(DriverError::Validation(_))));

        let req = CreateNetworkRequest::new("n1", vec![pool("10.0.0.0/24"), pool("10.0.1.0/24")])
            .with_options(NetworkOptions {
                vnis: vec![7, 7],
                ..Default::default()
            });
        assert!(matches!(req.validate(), Err(DriverError::Validation(_))));
    }

    #[test]
    fn test_validate_pairs_pools_with_vnis() {
        let req = CreateNetworkRequest::new("n1", vec![pool("10.0.0.0/24"), pool("10.0.1.0/24")])
            .with_options(NetworkOptions {
                vnis: vec![100, 101, 102],
                ..Default::default()
            });
        let pairs = req.validate().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].1.value(), 101);
    }
}
