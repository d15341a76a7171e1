//! Driver error taxonomy.

use crate::domain::ports::{BackendError, StoreError};
use crate::domain::value_objects::Vni;

/// Errors surfaced by driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Malformed create request or option.
    #[error("invalid request: {0}")]
    Validation(String),

    /// VNI already owned by another network. Resolved internally by eviction
    /// during create; only surfaced when a network cannot be installed.
    #[error("vni {vni} is owned by network {owner}")]
    Conflict { vni: Vni, owner: String },

    /// Operation on an unknown network or endpoint.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Operation refused; the registry is unchanged and the caller may retry.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Backend create/delete failure.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// Optimistic-concurrency write race; retry with a fresh read.
    #[error("persistence conflict on {key}")]
    PersistenceConflict { key: String },

    /// Store failure other than a version race.
    #[error("store: {0}")]
    Store(String),

    /// Invalid self address; the driver stays in local-only mode.
    #[error("discovery: {0}")]
    Discovery(String),
}

impl DriverError {
    pub fn network_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "network",
            id: id.into(),
        }
    }

    pub fn endpoint_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "endpoint",
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for DriverError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { key } => Self::PersistenceConflict { key },
            other => Self::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_persistence_conflict() {
        let err: DriverError = StoreError::Conflict {
            key: "overlay/network/n1".to_string(),
        }
        .into();
        assert!(matches!(err, DriverError::PersistenceConflict { ref key } if key == "overlay/network/n1"));
    }

    #[test]
    fn test_store_io_maps_to_store() {
        let err: DriverError = StoreError::Io("disk full".to_string()).into();
        assert!(matches!(err, DriverError::Store(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_not_found_helpers() {
        let err = DriverError::network_not_found("net1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "network net1 not found");

        let err = DriverError::endpoint_not_found("ep1");
        assert_eq!(err.to_string(), "endpoint ep1 not found");
    }

    #[test]
    fn test_backend_error_converts() {
        let err: DriverError = BackendError::Failed("switch offline".to_string()).into();
        assert!(matches!(err, DriverError::Backend(_)));
    }
}
