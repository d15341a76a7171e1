//! Network record persistence.
//!
//! Records live at `(realm, "network", id)` in the cluster key-value store.
//! Writes are optimistic: a conflicting write re-reads the stored record,
//! folds it into the local network, reapplies the caller's intent on top and
//! tries again a bounded number of times.

use crate::application::record::{self, NetworkRecord, RecordFormat};
use crate::domain::entities::{Network, NetworkState};
use crate::domain::errors::DriverError;
use crate::domain::ports::{KvStore, StoreError, StoreKey};
use std::sync::Arc;

const NETWORK_KEY: &str = "network";

/// A record read back from the store.
#[derive(Debug, Clone)]
pub struct StoredNetwork {
    pub id: String,
    pub state: NetworkState,
    pub index: u64,
    pub format: RecordFormat,
}

pub struct NetworkStore {
    kv: Arc<dyn KvStore>,
    realm: String,
    write_attempts: usize,
}

impl NetworkStore {
    pub fn new(kv: Arc<dyn KvStore>, realm: impl Into<String>, write_attempts: usize) -> Self {
        Self {
            kv,
            realm: realm.into(),
            write_attempts: write_attempts.max(1),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn key(&self, id: &str) -> StoreKey {
        StoreKey::new([self.realm.as_str(), NETWORK_KEY, id])
    }

    pub fn prefix(&self) -> StoreKey {
        StoreKey::new([self.realm.as_str(), NETWORK_KEY])
    }

    /// Read the record for `id`.
    pub async fn read(&self, id: &str) -> Result<Option<StoredNetwork>, DriverError> {
        let key = self.key(id);
        let entry = match self.kv.get(&key).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        decode_entry(id, &key, &entry.value, entry.index).map(Some)
    }

    /// Every record in the realm. Records that fail to decode are logged and skipped.
    pub async fn list(&self) -> Result<Vec<StoredNetwork>, DriverError> {
        let entries = self.kv.list(&self.prefix()).await?;
        let mut out = Vec::with_capacity(entries.len());

        for (key, entry) in entries {
            let id = match key.last() {
                Some(id) if key.parts().len() == 3 => id.to_string(),
                _ => continue,
            };
            match decode_entry(&id, &key, &entry.value, entry.index) {
                Ok(stored) => out.push(stored),
                Err(e) => tracing::warn!("skipping unreadable record {}: {}", key, e),
            }
        }
        Ok(out)
    }

    /// Write the network's current state, retrying on version conflicts.
    ///
    /// On success the network carries the new version index.
    pub async fn write(&self, network: &Network) -> Result<u64, DriverError> {
        self.write_with(network, |_| {}).await
    }

    /// Write the network, running `intent` on its state before every attempt.
    ///
    /// On a version conflict the stored record is read back and folded into
    /// the network with [`merge_record`], so a change another host made in
    /// between survives unless `intent` sets the same field again.
    pub async fn write_with<F>(&self, network: &Network, intent: F) -> Result<u64, DriverError>
    where
        F: Fn(&mut NetworkState) + Send + Sync,
    {
        let key = self.key(network.id());

        for attempt in 1..=self.write_attempts {
            let (record, expected) = network.with_state(|s| {
                intent(s);
                (
                    NetworkRecord::from_state(s),
                    if s.db_exists { Some(s.db_index) } else { None },
                )
            });
            let bytes = record::encode(&record).map_err(|e| DriverError::Store(e.to_string()))?;

            match self.kv.put_atomic(&key, &bytes, expected).await {
                Ok(index) => {
                    network.set_db_index(index);
                    tracing::debug!("persisted network {} at index {}", network.id(), index);
                    return Ok(index);
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(
                        "write conflict on {} (attempt {}/{}), merging stored record",
                        key,
                        attempt,
                        self.write_attempts
                    );
                    self.reload(network, &key).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!("giving up writing {} after {} conflicts", key, self.write_attempts);
        Err(DriverError::PersistenceConflict {
            key: key.to_path(),
        })
    }

    /// Delete the record for `network`, retrying on version conflicts.
    ///
    /// A record that is already gone counts as deleted.
    pub async fn delete(&self, network: &Network) -> Result<(), DriverError> {
        let key = self.key(network.id());
        let (mut index, mut exists) = network.db_index();

        for attempt in 1..=self.write_attempts {
            if !exists {
                match self.kv.get(&key).await? {
                    Some(entry) => index = entry.index,
                    None => return Ok(()),
                }
            }

            match self.kv.delete_atomic(&key, index).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {
                    network.with_state(|s| s.db_exists = false);
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(
                        "delete conflict on {} (attempt {}/{})",
                        key,
                        attempt,
                        self.write_attempts
                    );
                    exists = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DriverError::PersistenceConflict {
            key: key.to_path(),
        })
    }

    /// Fold the current stored record into `network` after a lost race.
    async fn reload(&self, network: &Network, key: &StoreKey) -> Result<(), DriverError> {
        match self.kv.get(key).await? {
            Some(entry) => match decode_entry(network.id(), key, &entry.value, entry.index) {
                Ok(stored) => merge_record(network, stored.state),
                Err(e) => {
                    tracing::warn!("stored record {} unreadable, overwriting it: {}", key, e);
                    network.set_db_index(entry.index);
                }
            },
            None => network.with_state(|s| {
                s.db_exists = false;
                s.db_index = 0;
            }),
        }
        Ok(())
    }
}

/// Fold a stored record into a live network.
///
/// The record wins for the display name, the secure flag, the interface and
/// the VNI of each subnet matched by prefix. The backend id stays local and
/// the provider address is taken from the record only when missing.
pub fn merge_record(network: &Network, record: NetworkState) {
    let id = network.id();
    let NetworkState {
        name,
        subnets: recorded,
        backend_id,
        provider_address,
        interface_name,
        secure,
        db_index,
        db_exists,
        ..
    } = record;

    let prefixes: Vec<_> = network.with_state(|state| {
        if let (Some(live), Some(recorded)) = (&state.backend_id, &backend_id) {
            if live != recorded {
                tracing::warn!(
                    "divergence: network {} backend id is {} but record says {}",
                    id,
                    live,
                    recorded
                );
            }
        }
        if state.provider_address.is_none() {
            state.provider_address = provider_address;
        }
        if !name.is_empty() {
            state.name = name;
        }
        state.secure = secure;
        if interface_name.is_some() {
            state.interface_name = interface_name;
        }
        state.db_index = db_index;
        state.db_exists = db_exists;
        state.subnets.iter().map(|s| s.prefix).collect()
    });

    for prefix in prefixes {
        let live = network.vxlan_id(&prefix);
        match recorded.iter().find(|r| r.matches_prefix(&prefix)) {
            Some(r) if live != Some(r.vni) => {
                tracing::warn!(
                    "divergence: network {} subnet {} has vni {:?} locally but {} in record",
                    id,
                    prefix,
                    live.map(|v| v.value()),
                    r.vni
                );
                network.set_vxlan_id(&prefix, r.vni);
            }
            Some(_) => {}
            None => tracing::warn!("divergence: network {} subnet {} missing from record", id, prefix),
        }
    }
}

fn decode_entry(
    id: &str,
    key: &StoreKey,
    bytes: &[u8],
    index: u64,
) -> Result<StoredNetwork, DriverError> {
    let (record, format) =
        record::decode(bytes).map_err(|e| DriverError::Store(format!("{}: {}", key, e)))?;
    if !format.is_current() {
        tracing::debug!(
            "record {} is in format version {}, next write upgrades it",
            key,
            format.version()
        );
    }

    let mut state = record
        .to_state()
        .map_err(|e| DriverError::Store(format!("{}: {}", key, e)))?;
    state.db_index = index;
    state.db_exists = true;

    Ok(StoredNetwork {
        id: id.to_string(),
        state,
        index,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapKvStore;
    use crate::domain::entities::Subnet;
    use crate::domain::ports::KvEntry;
    use crate::domain::value_objects::Vni;

    fn network(id: &str, vni: u32) -> Network {
        Network::new(
            id,
            NetworkState {
                name: id.to_string(),
                subnets: vec![Subnet::new(
                    Vni::new(vni).unwrap(),
                    "10.0.0.0/24".parse().unwrap(),
                    Some("10.0.0.1".parse().unwrap()),
                )],
                backend_id: Some("B-1".to_string()),
                ..Default::default()
            },
        )
    }

    fn store() -> (Arc<DashMapKvStore>, NetworkStore) {
        let kv = Arc::new(DashMapKvStore::new());
        (kv.clone(), NetworkStore::new(kv, "overlay", 3))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_, store) = store();
        let n = network("n1", 100);
        let idx = store.write(&n).await.unwrap();
        assert_eq!(n.db_index(), (idx, true));

        let stored = store.read("n1").await.unwrap().unwrap();
        assert_eq!(stored.index, idx);
        assert_eq!(stored.format, RecordFormat::Envelope);
        assert_eq!(stored.state.subnets, n.subnets());
        assert_eq!(stored.state.backend_id.as_deref(), Some("B-1"));
        assert!(stored.state.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (_, store) = store();
        assert!(store.read("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_write_keeps_concurrent_vni_change() {
        let kv: Arc<dyn KvStore> = Arc::new(DashMapKvStore::new());
        let host_a = NetworkStore::new(kv.clone(), "overlay", 3);
        let host_b = NetworkStore::new(kv, "overlay", 3);

        let a = network("n1", 100);
        host_a.write(&a).await.unwrap();

        let b = Network::new("n1", host_b.read("n1").await.unwrap().unwrap().state);
        let prefix = "10.0.0.0/24".parse().unwrap();
        b.set_vxlan_id(&prefix, Vni::new(200).unwrap());
        host_b.write(&b).await.unwrap();

        // Host A still holds the index of its own first write.
        let idx = host_a.write(&a).await.unwrap();
        let stored = host_a.read("n1").await.unwrap().unwrap();
        assert_eq!(stored.index, idx);
        assert_eq!(stored.state.subnets[0].vni.value(), 200);
        assert_eq!(a.vxlan_id(&prefix), Some(Vni::new(200).unwrap()));
        assert_eq!(a.backend_id().as_deref(), Some("B-1"));
    }

    #[tokio::test]
    async fn test_intent_is_reapplied_after_conflict() {
        let (_, store) = store();
        let a = network("n1", 100);
        store.write(&a).await.unwrap();

        let b = Network::new("n1", store.read("n1").await.unwrap().unwrap().state);
        b.with_state(|s| s.secure = true);
        store.write(&b).await.unwrap();

        a.with_state(|s| s.name = "renamed".to_string());
        store
            .write_with(&a, |s| s.name = "renamed".to_string())
            .await
            .unwrap();

        let stored = store.read("n1").await.unwrap().unwrap();
        assert_eq!(stored.state.name, "renamed");
        assert!(stored.state.secure);
    }

    /// Store whose compare-and-swap always loses.
    struct ContendedKv(DashMapKvStore);

    #[async_trait::async_trait]
    impl KvStore for ContendedKv {
        async fn get(&self, key: &StoreKey) -> Result<Option<KvEntry>, StoreError> {
            self.0.get(key).await
        }

        async fn put_atomic(
            &self,
            key: &StoreKey,
            _value: &[u8],
            _expected_index: Option<u64>,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Conflict { key: key.to_path() })
        }

        async fn delete_atomic(&self, key: &StoreKey, expected_index: u64) -> Result<(), StoreError> {
            self.0.delete_atomic(key, expected_index).await
        }

        async fn list(&self, prefix: &StoreKey) -> Result<Vec<(StoreKey, KvEntry)>, StoreError> {
            self.0.list(prefix).await
        }
    }

    #[tokio::test]
    async fn test_write_gives_up_after_bounded_conflicts() {
        let store = NetworkStore::new(Arc::new(ContendedKv(DashMapKvStore::new())), "overlay", 2);
        let err = store.write(&network("n1", 100)).await.unwrap_err();
        assert!(matches!(err, DriverError::PersistenceConflict { ref key } if key.ends_with("n1")));
    }

    #[tokio::test]
    async fn test_write_over_unknown_existing_record() {
        let (kv, store) = store();
        kv.insert_raw(&store.key("n1"), br#"[{"SubnetIP":"10.9.0.0/24","GwIP":"","Vni":9}]"#);

        let n = network("n1", 100);
        store.write(&n).await.unwrap();
        let stored = store.read("n1").await.unwrap().unwrap();
        assert_eq!(stored.state.subnets[0].vni.value(), 100);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (kv, store) = store();
        let n = network("n1", 100);
        store.write(&n).await.unwrap();

        store.delete(&n).await.unwrap();
        assert!(kv.is_empty());
        assert_eq!(n.db_index().1, false);

        store.delete(&n).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_after_concurrent_update() {
        let (kv, store) = store();
        let n = network("n1", 100);
        store.write(&n).await.unwrap();
        kv.insert_raw(&store.key("n1"), b"{}");

        store.delete(&n).await.unwrap();
        assert!(store.read("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_records() {
        let (kv, store) = store();
        store.write(&network("a", 1)).await.unwrap();
        store.write(&network("b", 2)).await.unwrap();
        kv.insert_raw(&store.key("broken"), b"not json");
        kv.insert_raw(&StoreKey::new(["other", "network", "c"]), b"{}");

        let listed = store.list().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_legacy_record_is_upgraded_on_write() {
        let (kv, store) = store();
        kv.insert_raw(
            &store.key("n1"),
            br#"{"subnets":[{"SubnetIP":"10.0.0.0/24","GwIP":"10.0.0.1","Vni":100}],"hnsId":"B-1","name":"n1"}"#,
        );

        let stored = store.read("n1").await.unwrap().unwrap();
        assert_eq!(stored.format, RecordFormat::Map);

        let n = Network::new("n1", stored.state);
        store.write(&n).await.unwrap();
        let upgraded = store.read("n1").await.unwrap().unwrap();
        assert_eq!(upgraded.format, RecordFormat::Envelope);
        assert_eq!(upgraded.state.subnets, n.subnets());
    }
}
