//! Network Backend Port
//!
//! Defines the interface to the local network backend service that programs
//! virtual switches and policies. The driver only sees descriptors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Backend representation of one subnet.
///
/// `policies` are opaque JSON documents; the VXLAN identifier travels as a
/// `{"Type": "VSID", "VSID": <vni>}` policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetDescriptor {
    pub address_prefix: String,
    pub gateway_address: Option<String>,
    pub policies: Vec<serde_json::Value>,
}

/// Backend representation of a network object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Backend-assigned identifier; `None` on create requests.
    pub id: Option<String>,
    pub name: String,
    pub network_type: String,
    pub subnets: Vec<SubnetDescriptor>,
    pub adapter_name: Option<String>,
    pub management_address: Option<String>,
}

/// Backend representation of an endpoint object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub id: Option<String>,
    pub name: String,
    /// Backend identifier of the owning network object.
    pub network_backend_id: String,
    pub mac_address: String,
    pub ip_address: Option<IpAddr>,
    pub is_remote: bool,
}

/// Result of a network object creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedNetwork {
    pub backend_id: String,
    pub management_address: Option<String>,
}

/// Backend failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend object {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// Outbound port to the network backend service.
///
/// Calls are expected to be fast local service calls; implementations that
/// can hang must enforce their own timeout and report it as `Failed`.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    async fn create_network_object(
        &self,
        descriptor: &NetworkDescriptor,
    ) -> Result<CreatedNetwork, BackendError>;

    /// Delete a network object. Deleting an absent object is not an error.
    async fn delete_network_object(&self, backend_id: &str) -> Result<(), BackendError>;

    async fn list_network_objects(
        &self,
        type_filter: &str,
    ) -> Result<Vec<NetworkDescriptor>, BackendError>;

    /// Create an endpoint object, returning its backend identifier.
    async fn create_endpoint_object(
        &self,
        descriptor: &EndpointDescriptor,
    ) -> Result<String, BackendError>;

    /// Delete an endpoint object. Deleting an absent object is not an error.
    async fn delete_endpoint_object(&self, backend_id: &str) -> Result<(), BackendError>;

    async fn list_endpoint_objects(&self) -> Result<Vec<EndpointDescriptor>, BackendError>;
}
