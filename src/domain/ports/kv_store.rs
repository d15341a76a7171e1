//! Key-Value Store Port
//!
//! Global store holding authoritative network records, with optimistic
//! concurrency on every write.

use async_trait::async_trait;
use std::fmt;

/// Hierarchical store key, e.g. `(realm, "network", id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(Vec<String>);

impl StoreKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Last component, the object id for full keys.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Slash-joined path used by stores with flat keyspaces.
    pub fn to_path(&self) -> String {
        self.0.join("/")
    }

    /// Path prefix matching every key below this one.
    pub fn to_prefix(&self) -> String {
        format!("{}/", self.to_path())
    }

    pub fn from_path(path: &str) -> Self {
        Self(path.split('/').map(str::to_string).collect())
    }

    pub fn is_prefix_of(&self, other: &StoreKey) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

/// Stored value with its version index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub index: u64,
}

/// Store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Stored index no longer matches the caller's expected index.
    #[error("version conflict on {key}")]
    Conflict { key: String },
    #[error("key {0} not found")]
    NotFound(String),
    #[error("store io: {0}")]
    Io(String),
}

/// Outbound port to the cluster key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value and its version index.
    async fn get(&self, key: &StoreKey) -> Result<Option<KvEntry>, StoreError>;

    /// Write `value` if the stored index equals `expected_index`.
    ///
    /// `None` means the key must not exist yet. Returns the new index, which
    /// is strictly greater than any index previously handed out.
    async fn put_atomic(
        &self,
        key: &StoreKey,
        value: &[u8],
        expected_index: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Delete a key if the stored index equals `expected_index`.
    async fn delete_atomic(&self, key: &StoreKey, expected_index: u64) -> Result<(), StoreError>;

    /// All entries strictly below `prefix`.
    async fn list(&self, prefix: &StoreKey) -> Result<Vec<(StoreKey, KvEntry)>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_key_path() {
        let key = StoreKey::new(["overlay", "network", "net1"]);
        assert_eq!(key.to_path(), "overlay/network/net1");
        assert_eq!(key.last(), Some("net1"));
        assert_eq!(key.to_string(), "overlay/network/net1");
        assert_eq!(StoreKey::from_path("overlay/network/net1"), key);
    }

    #[test]
    fn test_store_key_prefix() {
        let prefix = StoreKey::new(["overlay", "network"]);
        let key = StoreKey::new(["overlay", "network", "net1"]);
        let other = StoreKey::new(["other", "network", "net1"]);

        assert_eq!(prefix.to_prefix(), "overlay/network/");
        assert!(prefix.is_prefix_of(&key));
        assert!(!prefix.is_prefix_of(&prefix));
        assert!(!prefix.is_prefix_of(&other));
    }
}
