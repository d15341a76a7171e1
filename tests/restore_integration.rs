//! Integration tests for startup restore
//!
//! Seeds the in-memory backend with objects left behind by an earlier run
//! and checks what a freshly constructed driver rebuilds from them.

use overlay_driver::adapters::outbound::{BackendOp, DashMapKvStore, InMemoryNetworkBackend};
use overlay_driver::domain::ports::{EndpointDescriptor, NetworkDescriptor, StoreKey, SubnetDescriptor};
use overlay_driver::{DriverConfig, DriverError, GossipConfig, KvStore, OverlayDriver, UdpGossipTransport};
use std::sync::Arc;

async fn start(
    backend: Arc<InMemoryNetworkBackend>,
    store: Option<Arc<dyn KvStore>>,
) -> Result<OverlayDriver, DriverError> {
    let gossip = GossipConfig::new("node-a");
    let transport = Arc::new(UdpGossipTransport::new(gossip.clone()));
    OverlayDriver::new(DriverConfig::default(), gossip, backend, store, transport).await
}

fn overlay_network(name: &str, prefix: &str, vsid: u32) -> NetworkDescriptor {
    NetworkDescriptor {
        name: name.to_string(),
        network_type: "overlay".to_string(),
        subnets: vec![SubnetDescriptor {
            address_prefix: prefix.to_string(),
            gateway_address: None,
            policies: vec![serde_json::json!({"Type": "VSID", "VSID": vsid})],
        }],
        management_address: Some("192.0.2.10".to_string()),
        ..Default::default()
    }
}

fn endpoint(name: &str, network_backend_id: &str, ip: &str, is_remote: bool) -> EndpointDescriptor {
    EndpointDescriptor {
        name: name.to_string(),
        network_backend_id: network_backend_id.to_string(),
        mac_address: "02-42-0a-00-00-05".to_string(),
        ip_address: Some(ip.parse().unwrap()),
        is_remote,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_restore_rebuilds_networks_and_endpoints() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    let net1 = backend.insert_network(overlay_network("net1", "10.0.0.0/24", 100));
    backend.insert_endpoint(endpoint("ep-local", &net1, "10.0.0.5", false));
    backend.insert_endpoint(endpoint("ep-remote", &net1, "10.0.0.6", true));
    backend.insert_network(NetworkDescriptor {
        name: "bridge".to_string(),
        network_type: "nat".to_string(),
        ..Default::default()
    });

    let driver = start(backend, None).await.unwrap();
    let report = driver.restore_report();
    assert_eq!(report.restored, vec!["net1".to_string()]);
    assert_eq!(report.endpoints, 2);
    assert!(driver.registry().get("bridge").is_none());

    let network = driver.network("net1").await.unwrap();
    assert_eq!(network.backend_id(), Some(net1));
    assert_eq!(network.snapshot().provider_address.as_deref(), Some("192.0.2.10"));
    assert!(network.endpoint("ep-remote").unwrap().remote);

    // Only local endpoints are announced to peers.
    let owned = driver.registry().local_endpoints();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].1.id, "ep-local");
}

#[tokio::test]
async fn test_restore_skips_second_owner_of_vni() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    backend.insert_network(overlay_network("net1", "10.0.0.0/24", 100));
    backend.insert_network(overlay_network("net2", "10.1.0.0/24", 100));

    let driver = start(backend, None).await.unwrap();
    let report = driver.restore_report();
    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(driver.registry().len(), 1);
}

#[tokio::test]
async fn test_restore_skips_network_with_bad_subnet() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    backend.insert_network(overlay_network("broken", "not-a-prefix", 100));
    backend.insert_network(overlay_network("net1", "10.0.0.0/24", 200));

    let driver = start(backend, None).await.unwrap();
    assert_eq!(driver.restore_report().restored, vec!["net1".to_string()]);
    assert_eq!(driver.restore_report().skipped, vec!["broken".to_string()]);
}

#[tokio::test]
async fn test_store_record_supplies_name_and_flags() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    let backend_id = backend.insert_network(overlay_network("net1", "10.0.0.0/24", 100));

    let kv = Arc::new(DashMapKvStore::new());
    let record = format!(
        r#"{{"formatVersion": 2, "payload": {{"name": "frontend", "secure": true, "interfaceName": "eth1", "backendId": "{}", "subnets": [{{"subnetIP": "10.0.0.0/24", "gatewayIP": "", "vni": 4100}}]}}}}"#,
        backend_id
    );
    kv.insert_raw(&StoreKey::new(["overlay", "network", "net1"]), record.as_bytes());

    let driver = start(backend, Some(kv as Arc<dyn KvStore>)).await.unwrap();
    let state = driver.network("net1").await.unwrap().snapshot();
    assert_eq!(state.name, "frontend");
    assert!(state.secure);
    assert_eq!(state.interface_name.as_deref(), Some("eth1"));
    assert_eq!(state.subnets[0].vni.value(), 4100);
    let (index, exists) = driver.registry().get("net1").unwrap().db_index();
    assert!(exists);
    assert!(index > 0);
}

#[tokio::test]
async fn test_endpoint_listing_failure_restores_networks_only() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    let net1 = backend.insert_network(overlay_network("net1", "10.0.0.0/24", 100));
    backend.insert_endpoint(endpoint("ep1", &net1, "10.0.0.5", false));
    backend.fail(BackendOp::ListEndpoints);

    let driver = start(backend, None).await.unwrap();
    assert_eq!(driver.restore_report().restored, vec!["net1".to_string()]);
    assert_eq!(driver.restore_report().endpoints, 0);
}

#[tokio::test]
async fn test_network_listing_failure_aborts_startup() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    backend.insert_network(overlay_network("net1", "10.0.0.0/24", 100));
    backend.fail(BackendOp::ListNetworks);

    let err = start(backend, None).await.err().unwrap();
    assert!(matches!(err, DriverError::Backend(_)));
}

#[tokio::test]
async fn test_network_without_vsid_policy_is_restored() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    let mut bare = overlay_network("net1", "10.0.0.0/24", 0);
    bare.subnets[0].policies.clear();
    backend.insert_network(bare);

    let mut recorded = overlay_network("net2", "10.1.0.0/24", 0);
    recorded.subnets[0].policies.clear();
    backend.insert_network(recorded);
    let kv = Arc::new(DashMapKvStore::new());
    kv.insert_raw(
        &StoreKey::new(["overlay", "network", "net2"]),
        br#"{"formatVersion": 2, "payload": {"name": "net2", "subnets": [{"subnetIP": "10.1.0.0/24", "gatewayIP": "", "vni": 4200}]}}"#,
    );

    let driver = start(backend, Some(kv as Arc<dyn KvStore>)).await.unwrap();
    let report = driver.restore_report();
    assert_eq!(report.restored.len(), 2);
    assert!(report.skipped.is_empty());

    let net1 = driver.registry().get("net1").unwrap();
    assert_eq!(net1.vnis()[0].value(), 0);
    let net2 = driver.registry().get("net2").unwrap();
    assert_eq!(net2.vnis()[0].value(), 4200);
}

#[tokio::test]
async fn test_records_without_backend_object_are_deferred() {
    let backend = Arc::new(InMemoryNetworkBackend::new());
    backend.insert_network(overlay_network("net1", "10.0.0.0/24", 100));

    let kv = Arc::new(DashMapKvStore::new());
    kv.insert_raw(
        &StoreKey::new(["overlay", "network", "net1"]),
        br#"{"formatVersion": 2, "payload": {"name": "net1", "subnets": [{"subnetIP": "10.0.0.0/24", "gatewayIP": "", "vni": 100}]}}"#,
    );
    kv.insert_raw(
        &StoreKey::new(["overlay", "network", "net9"]),
        br#"{"formatVersion": 2, "payload": {"name": "net9", "subnets": [{"subnetIP": "10.9.0.0/24", "gatewayIP": "", "vni": 900}]}}"#,
    );

    let driver = start(backend.clone(), Some(kv as Arc<dyn KvStore>)).await.unwrap();
    assert_eq!(driver.restore_report().restored, vec!["net1".to_string()]);
    assert_eq!(driver.restore_report().deferred, vec!["net9".to_string()]);
    assert!(driver.registry().get("net9").is_none());

    let network = driver.network("net9").await.unwrap();
    assert_eq!(network.vnis()[0].value(), 900);
    assert!(backend.network_by_name("net9").is_some());
}
