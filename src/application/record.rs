//! Persisted network record codec.
//!
//! Records are written as `{"formatVersion": 2, "payload": {...}}`. Reads also
//! accept the two shapes older releases wrote: a bare map (version 1) and a
//! bare list of subnets (version 0). Unknown fields are ignored.

use crate::domain::entities::{NetworkState, Subnet};
use crate::domain::value_objects::Vni;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;

pub const CURRENT_FORMAT_VERSION: u32 = 2;
const FORMAT_VERSION_FIELD: &str = "formatVersion";

/// Shape a record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// Bare array of subnets.
    LegacyList,
    /// Bare map without a version tag.
    Map,
    /// Versioned envelope.
    Envelope,
}

impl RecordFormat {
    pub fn version(&self) -> u32 {
        match self {
            Self::LegacyList => 0,
            Self::Map => 1,
            Self::Envelope => CURRENT_FORMAT_VERSION,
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Self::Envelope)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported record format version {0}")]
    UnsupportedVersion(u32),
    #[error("record is neither a map nor a subnet list")]
    Shape,
    #[error("invalid subnet {subnet:?}: {reason}")]
    Subnet { subnet: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    #[serde(rename = "subnetIP", alias = "SubnetIP")]
    pub subnet_ip: String,
    #[serde(rename = "gatewayIP", alias = "GwIP", default)]
    pub gateway_ip: String,
    #[serde(alias = "Vni")]
    pub vni: u32,
}

impl SubnetRecord {
    pub fn from_subnet(subnet: &Subnet) -> Self {
        Self {
            subnet_ip: subnet.prefix.to_string(),
            gateway_ip: subnet.gateway.map(|g| g.to_string()).unwrap_or_default(),
            vni: subnet.vni.value(),
        }
    }

    pub fn to_subnet(&self) -> Result<Subnet, RecordError> {
        let invalid = |reason: String| RecordError::Subnet {
            subnet: self.subnet_ip.clone(),
            reason,
        };

        let prefix: Ipv4Net = self.subnet_ip.parse().map_err(|e| invalid(format!("{}", e)))?;
        // Older writers stored an absent gateway as "<nil>".
        let gateway = match self.gateway_ip.as_str() {
            "" | "<nil>" => None,
            raw => Some(
                raw.parse::<Ipv4Addr>()
                    .map_err(|e| invalid(format!("gateway {:?}: {}", raw, e)))?,
            ),
        };
        let vni = Vni::new(self.vni).map_err(|e| invalid(e.to_string()))?;
        Ok(Subnet::new(vni, prefix, gateway))
    }
}

/// Current record payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub subnets: Vec<SubnetRecord>,
    #[serde(default)]
    pub interface_name: String,
    #[serde(default)]
    pub provider_address: String,
    #[serde(default, alias = "hnsId")]
    pub backend_id: String,
    #[serde(default)]
    pub name: String,
}

impl NetworkRecord {
    pub fn from_state(state: &NetworkState) -> Self {
        Self {
            secure: state.secure,
            subnets: state.subnets.iter().map(SubnetRecord::from_subnet).collect(),
            interface_name: state.interface_name.clone().unwrap_or_default(),
            provider_address: state.provider_address.clone().unwrap_or_default(),
            backend_id: state.backend_id.clone().unwrap_or_default(),
            name: state.name.clone(),
        }
    }

    /// Build network state. Endpoints and version fields are left empty.
    pub fn to_state(&self) -> Result<NetworkState, RecordError> {
        let subnets = self
            .subnets
            .iter()
            .map(SubnetRecord::to_subnet)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NetworkState {
            name: self.name.clone(),
            subnets,
            backend_id: non_empty(&self.backend_id),
            provider_address: non_empty(&self.provider_address),
            interface_name: non_empty(&self.interface_name),
            secure: self.secure,
            ..Default::default()
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "formatVersion")]
    format_version: u32,
    payload: T,
}

/// Encode a record in the current format.
pub fn encode(record: &NetworkRecord) -> Result<Vec<u8>, RecordError> {
    let envelope = Envelope {
        format_version: CURRENT_FORMAT_VERSION,
        payload: record,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode any supported record shape.
pub fn decode(bytes: &[u8]) -> Result<(NetworkRecord, RecordFormat), RecordError> {
    let value: Value = serde_json::from_slice(bytes)?;

    if value.get(FORMAT_VERSION_FIELD).is_some() {
        let envelope: Envelope<Value> = serde_json::from_value(value)?;
        let record = match envelope.format_version {
            CURRENT_FORMAT_VERSION | 1 => serde_json::from_value(envelope.payload)?,
            0 => legacy(envelope.payload)?,
            other => return Err(RecordError::UnsupportedVersion(other)),
        };
        return Ok((record, RecordFormat::Envelope));
    }

    if value.is_object() {
        return Ok((serde_json::from_value(value)?, RecordFormat::Map));
    }

    if value.is_array() {
        return Ok((legacy(value)?, RecordFormat::LegacyList));
    }

    Err(RecordError::Shape)
}

fn legacy(value: Value) -> Result<NetworkRecord, RecordError> {
    let subnets: Vec<SubnetRecord> = serde_json::from_value(value)?;
    Ok(NetworkRecord {
        subnets,
        ..Default::default()
    })
}
