//! Backend Synchronization
//!
//! Translates between in-memory networks/endpoints and backend descriptors,
//! and creates or removes the matching backend objects.

use crate::domain::entities::{Endpoint, Network, NetworkState, Subnet};
use crate::domain::errors::DriverError;
use crate::domain::ports::{
    BackendError, EndpointDescriptor, NetworkBackend, NetworkDescriptor, SubnetDescriptor,
};
use crate::domain::value_objects::{MacAddress, Vni};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Backend type tag of overlay networks.
pub const NETWORK_TYPE: &str = "overlay";

const VSID_POLICY_TYPE: &str = "VSID";

/// Subnet policy carrying the VXLAN identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsidPolicy {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "VSID")]
    pub vsid: u32,
}

impl VsidPolicy {
    pub fn new(vni: Vni) -> Self {
        Self {
            kind: VSID_POLICY_TYPE.to_string(),
            vsid: vni.value(),
        }
    }

    /// First VSID policy among opaque policy documents.
    pub fn find(policies: &[serde_json::Value]) -> Option<Self> {
        policies
            .iter()
            .filter_map(|p| serde_json::from_value::<VsidPolicy>(p.clone()).ok())
            .find(|p| p.kind == VSID_POLICY_TYPE)
    }
}

pub struct BackendSync {
    backend: Arc<dyn NetworkBackend>,
    network_type: String,
}

impl BackendSync {
    pub fn new(backend: Arc<dyn NetworkBackend>, network_type: impl Into<String>) -> Self {
        Self {
            backend,
            network_type: network_type.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn NetworkBackend> {
        &self.backend
    }

    pub fn network_type(&self) -> &str {
        &self.network_type
    }

    /// Descriptor for a network. The backend object is named after the
    /// network id so it can be matched on restore.
    pub fn network_descriptor(&self, id: &str, state: &NetworkState) -> NetworkDescriptor {
        let subnets = state
            .subnets
            .iter()
            .map(|s| SubnetDescriptor {
                address_prefix: s.prefix.to_string(),
                gateway_address: s.gateway.map(|g| g.to_string()),
                policies: vec![serde_json::json!({
                    "Type": VSID_POLICY_TYPE,
                    "VSID": s.vni.value(),
                })],
            })
            .collect();

        NetworkDescriptor {
            id: None,
            name: id.to_string(),
            network_type: self.network_type.clone(),
            subnets,
            adapter_name: state.interface_name.clone(),
            management_address: None,
        }
    }

    /// Ensure a backend object exists for `network`.
    ///
    /// A network that already carries a backend id is left alone.
    pub async fn materialize(&self, network: &Network) -> Result<(), DriverError> {
        let descriptor = network.with_state(|s| {
            if s.backend_id.is_some() {
                None
            } else {
                Some(self.network_descriptor(network.id(), s))
            }
        });
        let descriptor = match descriptor {
            Some(d) => d,
            None => return Ok(()),
        };

        let created = self.backend.create_network_object(&descriptor).await.map_err(|e| {
            tracing::error!("failed to create backend network {}: {}", network.id(), e);
            DriverError::Backend(e)
        })?;

        tracing::debug!(
            "network {} materialized as backend object {}",
            network.id(),
            created.backend_id
        );
        network.with_state(|s| {
            s.backend_id = Some(created.backend_id);
            s.provider_address = created.management_address;
        });
        Ok(())
    }

    /// Remove the backend object of `network`. An object the backend no
    /// longer knows is treated as removed.
    pub async fn dematerialize(&self, network: &Network) -> Result<(), DriverError> {
        let backend_id = match network.backend_id() {
            Some(id) => id,
            None => return Ok(()),
        };

        match self.backend.delete_network_object(&backend_id).await {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                tracing::debug!("backend network {} already gone", backend_id);
            }
            Err(e) => return Err(DriverError::Backend(e)),
        }

        network.with_state(|s| s.backend_id = None);
        Ok(())
    }

    /// True if the backend lists a network object with `backend_id`.
    pub async fn network_exists(&self, backend_id: &str) -> Result<bool, DriverError> {
        let listed = self.backend.list_network_objects(&self.network_type).await?;
        Ok(listed
            .iter()
            .any(|d| d.id.as_deref() == Some(backend_id)))
    }

    /// Build network state from a backend object. Returns the network id
    /// (the object name) and its state.
    pub fn translate_network(
        &self,
        descriptor: &NetworkDescriptor,
    ) -> Result<(String, NetworkState), DriverError> {
        if descriptor.name.is_empty() {
            return Err(DriverError::Validation(
                "backend network object has no name".to_string(),
            ));
        }
        let backend_id = descriptor.id.clone().ok_or_else(|| {
            DriverError::Validation(format!("backend network {} has no id", descriptor.name))
        })?;

        let subnets = descriptor
            .subnets
            .iter()
            .map(translate_subnet)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                DriverError::Validation(format!("backend network {}: {}", descriptor.name, e))
            })?;

        let state = NetworkState {
            name: descriptor.name.clone(),
            subnets,
            backend_id: Some(backend_id),
            provider_address: descriptor.management_address.clone(),
            interface_name: descriptor.adapter_name.clone(),
            ..Default::default()
        };
        Ok((descriptor.name.clone(), state))
    }

    /// Descriptor for an endpoint of a materialized network.
    pub fn endpoint_descriptor(network_backend_id: &str, endpoint: &Endpoint) -> EndpointDescriptor {
        EndpointDescriptor {
            id: None,
            name: endpoint.id.clone(),
            network_backend_id: network_backend_id.to_string(),
            mac_address: endpoint.mac.to_string(),
            ip_address: Some(IpAddr::V4(endpoint.ip)),
            is_remote: endpoint.remote,
        }
    }

    /// Build an endpoint from a backend object attached to `network_id`.
    pub fn translate_endpoint(
        descriptor: &EndpointDescriptor,
        network_id: &str,
    ) -> Result<Endpoint, DriverError> {
        let mac: MacAddress = descriptor
            .mac_address
            .parse()
            .map_err(|e| DriverError::Validation(format!("endpoint {}: {}", descriptor.name, e)))?;
        let ip = match descriptor.ip_address {
            Some(IpAddr::V4(ip)) => ip,
            other => {
                return Err(DriverError::Validation(format!(
                    "endpoint {} has no ipv4 address ({:?})",
                    descriptor.name, other
                )))
            }
        };

        Ok(Endpoint {
            id: descriptor.name.clone(),
            backend_id: descriptor.id.clone(),
            network_id: network_id.to_string(),
            mac,
            ip,
            remote: descriptor.is_remote,
        })
    }

    /// Create the backend object of `endpoint` and record its id.
    pub async fn materialize_endpoint(
        &self,
        network: &Network,
        endpoint: &mut Endpoint,
    ) -> Result<(), DriverError> {
        let network_backend_id = network.backend_id().ok_or_else(|| {
            DriverError::Forbidden(format!("network {} has no backend object", network.id()))
        })?;

        let descriptor = Self::endpoint_descriptor(&network_backend_id, endpoint);
        let id = self.backend.create_endpoint_object(&descriptor).await?;
        endpoint.backend_id = Some(id);
        Ok(())
    }

    pub async fn dematerialize_endpoint(&self, endpoint: &Endpoint) -> Result<(), DriverError> {
        let backend_id = match &endpoint.backend_id {
            Some(id) => id,
            None => return Ok(()),
        };
        match self.backend.delete_endpoint_object(backend_id).await {
            Ok(()) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(DriverError::Backend(e)),
        }
    }
}

fn translate_subnet(descriptor: &SubnetDescriptor) -> Result<Subnet, String> {
    let prefix: Ipv4Net = descriptor
        .address_prefix
        .parse()
        .map_err(|e| format!("subnet {:?}: {}", descriptor.address_prefix, e))?;

    let gateway = match descriptor.gateway_address.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<Ipv4Addr>()
                .map_err(|e| format!("gateway {:?}: {}", raw, e))?,
        ),
    };

    let vni = match VsidPolicy::find(&descriptor.policies) {
        Some(policy) => Vni::new(policy.vsid).map_err(|e| e.to_string())?,
        None => {
            tracing::warn!("divergence: subnet {} has no VSID policy, assuming vni 0", prefix);
            Vni::default()
        }
    };

    Ok(Subnet::new(vni, prefix, gateway))
}
