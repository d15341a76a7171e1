//! Gossip Configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the gossip membership.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Unique identifier for this host
    pub node_id: String,

    /// Port the gossip transport listens on (default: 7946)
    pub gossip_port: u16,

    /// Address to bind, overriding the advertised address (default: none)
    pub bind_addr: Option<SocketAddr>,

    /// Probe interval (default: 500ms)
    pub gossip_interval: Duration,

    /// Silence after which a member is declared dead (default: 30s)
    pub failure_timeout: Duration,

    /// How long a join waits for the member list reply (default: 3s)
    pub join_timeout: Duration,

    /// Capacity of the received-event channel (default: 1024)
    pub event_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            gossip_port: 7946,
            bind_addr: None,
            gossip_interval: Duration::from_millis(500),
            failure_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(3),
            event_capacity: 1024,
        }
    }
}

impl GossipConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn gossip_port(mut self, port: u16) -> Self {
        self.gossip_port = port;
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    pub fn failure_timeout(mut self, timeout: Duration) -> Self {
        self.failure_timeout = timeout;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.bind_addr.is_none() && self.gossip_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.gossip_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("gossip_interval"));
        }
        // The failure sweep runs three times per timeout.
        if (self.failure_timeout / 3).is_zero() {
            return Err(ConfigError::ZeroInterval("failure_timeout"));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("node_id is required")]
    MissingNodeId,
    #[error("queue capacity must be non-zero")]
    ZeroCapacity,
    #[error("gossip_port must be non-zero")]
    ZeroPort,
    #[error("{0} is too short to drive a timer")]
    ZeroInterval(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GossipConfig::default();
        assert!(config.node_id.is_empty());
        assert_eq!(config.gossip_port, 7946);
        assert_eq!(config.join_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_builder_pattern() {
        let config = GossipConfig::new("node-a")
            .gossip_port(8000)
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .join_timeout(Duration::from_millis(200));

        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.gossip_port, 8000);
        assert_eq!(config.bind_addr.unwrap().port(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_errors() {
        assert_eq!(GossipConfig::default().validate(), Err(ConfigError::MissingNodeId));
        assert_eq!(
            GossipConfig::new("n").gossip_port(0).validate(),
            Err(ConfigError::ZeroPort)
        );

        let mut config = GossipConfig::new("n");
        config.event_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        assert_eq!(
            GossipConfig::new("n").gossip_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroInterval("gossip_interval"))
        );
        assert_eq!(
            GossipConfig::new("n")
                .failure_timeout(Duration::from_nanos(2))
                .validate(),
            Err(ConfigError::ZeroInterval("failure_timeout"))
        );
        assert!(GossipConfig::new("n")
            .failure_timeout(Duration::from_nanos(3))
            .validate()
            .is_ok());
    }
}
