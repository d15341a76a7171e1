use crate::application::DriverConfig;
use crate::gossip::GossipConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Driver settings
    pub realm: String,
    pub network_type: String,
    pub store_path: Option<String>,
    pub write_attempts: usize,
    pub notify_queue: usize,
    pub debug: bool,

    // Discovery and gossip settings
    pub node_id: String,
    pub advertise_addr: Option<String>,
    pub bind_addr: Option<String>,
    pub neighbors: Vec<String>,
    pub gossip_port: u16,
    pub join_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            realm: "overlay".to_string(),
            network_type: "overlay".to_string(),
            store_path: None,
            write_attempts: 3,
            notify_queue: 256,
            debug: false,
            node_id: uuid::Uuid::new_v4().to_string(),
            advertise_addr: None,
            bind_addr: None,
            neighbors: Vec::new(),
            gossip_port: 7946,
            join_timeout_ms: 3000,
        }
    }
}

impl Config {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            network_type: self.network_type.clone(),
            ..DriverConfig::default()
        }
        .realm(self.realm.clone())
        .write_attempts(self.write_attempts)
        .notify_capacity(self.notify_queue)
    }

    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig::new(self.node_id.clone())
            .gossip_port(self.gossip_port)
            .join_timeout(Duration::from_millis(self.join_timeout_ms))
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = Config::default();

    let realm = std::env::var("OVERLAY_REALM").unwrap_or(defaults.realm);

    let network_type = std::env::var("OVERLAY_NETWORK_TYPE").unwrap_or(defaults.network_type);

    let store_path = std::env::var("OVERLAY_STORE_PATH").ok().filter(|p| !p.is_empty());

    let write_attempts = std::env::var("OVERLAY_WRITE_ATTEMPTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or(defaults.write_attempts);

    let notify_queue = std::env::var("OVERLAY_NOTIFY_QUEUE")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or(defaults.notify_queue);

    let debug = std::env::var("DEBUG").is_ok();

    let node_id = std::env::var("OVERLAY_NODE_ID")
        .ok()
        .filter(|id| !id.is_empty())
        .unwrap_or(defaults.node_id);

    let advertise_addr = std::env::var("OVERLAY_ADVERTISE_ADDR").ok().filter(|a| !a.is_empty());

    let bind_addr = std::env::var("OVERLAY_BIND_ADDR").ok().filter(|a| !a.is_empty());

    let neighbors = std::env::var("OVERLAY_NEIGHBORS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let gossip_port = std::env::var("OVERLAY_GOSSIP_PORT")
        .unwrap_or_else(|_| defaults.gossip_port.to_string())
        .parse()
        .unwrap_or(defaults.gossip_port);

    let join_timeout_ms = std::env::var("OVERLAY_JOIN_TIMEOUT_MS")
        .unwrap_or_else(|_| defaults.join_timeout_ms.to_string())
        .parse()
        .unwrap_or(defaults.join_timeout_ms);

    Ok(Config {
        realm,
        network_type,
        store_path,
        write_attempts,
        notify_queue,
        debug,
        node_id,
        advertise_addr,
        bind_addr,
        neighbors,
        gossip_port,
        join_timeout_ms,
    })
}
