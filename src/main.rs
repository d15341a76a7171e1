//! overlay-driver - VXLAN-style overlay network driver
//!
//! This is the composition root that wires together all the components.

use overlay_driver::adapters::outbound::{InMemoryNetworkBackend, SqliteKvStore};
use overlay_driver::config::load_config;
use overlay_driver::infrastructure::shutdown_signal;
use overlay_driver::{DiscoveryData, KvStore, OverlayDriver, UdpGossipTransport};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting overlay driver node={} realm={} store={:?}",
        cfg.node_id,
        cfg.realm,
        cfg.store_path
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let store: Option<Arc<dyn KvStore>> = match &cfg.store_path {
        Some(path) => {
            let store = SqliteKvStore::open(path.clone())?;
            tracing::info!("cluster store opened at {}", path);
            Some(Arc::new(store))
        }
        None => {
            tracing::info!("no cluster store configured, running local-only");
            None
        }
    };

    let backend = Arc::new(InMemoryNetworkBackend::new());

    let gossip_config = cfg.gossip_config();
    let transport = Arc::new(UdpGossipTransport::new(gossip_config.clone()));

    // 2. Driver (restores backend networks before returning)
    let driver = OverlayDriver::new(cfg.driver_config(), gossip_config, backend, store, transport).await?;
    tracing::info!(
        "restored {} networks ({} skipped)",
        driver.restore_report().restored.len(),
        driver.restore_report().skipped.len()
    );

    // 3. Discovery
    if let Some(address) = &cfg.advertise_addr {
        let self_discovery = DiscoveryData::NodeDiscovery {
            address: address.clone(),
            bind_address: cfg.bind_addr.clone(),
            is_self: true,
        };
        if let Err(e) = driver.discover_new(self_discovery).await {
            tracing::error!("self discovery failed, staying local-only: {}", e);
        }
    }

    for neighbor in &cfg.neighbors {
        let discovery = DiscoveryData::NodeDiscovery {
            address: neighbor.clone(),
            bind_address: None,
            is_self: false,
        };
        if let Err(e) = driver.discover_new(discovery).await {
            tracing::warn!("ignoring neighbor {}: {}", neighbor, e);
        }
    }

    // 4. Run until signalled
    shutdown_signal().await;
    driver.shutdown().await;

    Ok(())
}
