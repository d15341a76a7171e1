//! DashMap Key-Value Store
//!
//! Implements KvStore in memory using DashMap. Used for single-host setups
//! and tests; versions come from one store-wide counter.

use crate::domain::ports::{KvEntry, KvStore, StoreError, StoreKey};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// DashMap-backed key-value store with compare-and-swap writes.
pub struct DashMapKvStore {
    entries: Arc<DashMap<String, KvEntry>>,
    last_index: AtomicU64,
}

impl DashMapKvStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            last_index: AtomicU64::new(0),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write a raw value without a version check, e.g. to seed records
    /// produced by an older release.
    pub fn insert_raw(&self, key: &StoreKey, value: &[u8]) -> u64 {
        let index = self.next_index();
        self.entries.insert(
            key.to_path(),
            KvEntry {
                value: value.to_vec(),
                index,
            },
        );
        index
    }

    fn next_index(&self) -> u64 {
        self.last_index.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for DashMapKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for DashMapKvStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<KvEntry>, StoreError> {
        Ok(self.entries.get(&key.to_path()).map(|e| e.value().clone()))
    }

    async fn put_atomic(
        &self,
        key: &StoreKey,
        value: &[u8],
        expected_index: Option<u64>,
    ) -> Result<u64, StoreError> {
        let path = key.to_path();
        match self.entries.entry(path.clone()) {
            Entry::Occupied(mut occupied) => {
                if expected_index != Some(occupied.get().index) {
                    return Err(StoreError::Conflict { key: path });
                }
                let index = self.next_index();
                *occupied.get_mut() = KvEntry {
                    value: value.to_vec(),
                    index,
                };
                Ok(index)
            }
            Entry::Vacant(vacant) => {
                if expected_index.is_some() {
                    return Err(StoreError::Conflict { key: path });
                }
                let index = self.next_index();
                vacant.insert(KvEntry {
                    value: value.to_vec(),
                    index,
                });
                Ok(index)
            }
        }
    }

    async fn delete_atomic(&self, key: &StoreKey, expected_index: u64) -> Result<(), StoreError> {
        let path = key.to_path();
        match self.entries.entry(path.clone()) {
            Entry::Occupied(occupied) => {
                if occupied.get().index != expected_index {
                    return Err(StoreError::Conflict { key: path });
                }
                occupied.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(path)),
        }
    }

    async fn list(&self, prefix: &StoreKey) -> Result<Vec<(StoreKey, KvEntry)>, StoreError> {
        let prefix = prefix.to_prefix();
        let mut out: Vec<(StoreKey, KvEntry)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| (StoreKey::from_path(e.key()), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
