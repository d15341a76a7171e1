//! SQLite Key-Value Store
//!
//! Implements KvStore on a SQLite file shared by the hosts of a cluster
//! (replicated or on shared storage). Every write runs in a transaction that
//! checks the stored version index before updating it.

use crate::domain::ports::{KvEntry, KvStore, StoreError, StoreKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::Arc;

/// SQLite-backed key-value store.
///
/// Version indexes come from a single counter row so they never repeat,
/// even after a key is deleted and written again.
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl SqliteKvStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(io)?;
        Self::init(conn, path)
    }

    /// Private in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(io)?;
        Self::init(conn, ":memory:".to_string())
    }

    fn init(conn: Connection, path: String) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                idx INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS kv_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                last_index INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO kv_meta (id, last_index) VALUES (0, 0);",
        )
        .map_err(io)?;

        tracing::info!("kv store initialized, path={}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Io(format!("spawn_blocking: {}", e)))?
    }
}

fn io(err: rusqlite::Error) -> StoreError {
    StoreError::Io(err.to_string())
}

fn stored_index(tx: &Transaction<'_>, key: &str) -> Result<Option<u64>, StoreError> {
    tx.query_row("SELECT idx FROM kv WHERE key = ?1", [key], |row| {
        row.get::<_, i64>(0)
    })
    .optional()
    .map(|idx| idx.map(|i| i as u64))
    .map_err(io)
}

fn next_index(tx: &Transaction<'_>) -> Result<u64, StoreError> {
    tx.execute("UPDATE kv_meta SET last_index = last_index + 1 WHERE id = 0", [])
        .map_err(io)?;
    tx.query_row("SELECT last_index FROM kv_meta WHERE id = 0", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|i| i as u64)
    .map_err(io)
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<KvEntry>, StoreError> {
        let path = key.to_path();
        self.run(move |conn| {
            conn.query_row("SELECT value, idx FROM kv WHERE key = ?1", [&path], |row| {
                Ok(KvEntry {
                    value: row.get(0)?,
                    index: row.get::<_, i64>(1)? as u64,
                })
            })
            .optional()
            .map_err(io)
        })
        .await
    }

    async fn put_atomic(
        &self,
        key: &StoreKey,
        value: &[u8],
        expected_index: Option<u64>,
    ) -> Result<u64, StoreError> {
        let path = key.to_path();
        let value = value.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(io)?;
            if stored_index(&tx, &path)? != expected_index {
                return Err(StoreError::Conflict { key: path });
            }

            let index = next_index(&tx)?;
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value, idx) VALUES (?1, ?2, ?3)",
                params![path, value, index as i64],
            )
            .map_err(io)?;
            tx.commit().map_err(io)?;
            Ok(index)
        })
        .await
    }

    async fn delete_atomic(&self, key: &StoreKey, expected_index: u64) -> Result<(), StoreError> {
        let path = key.to_path();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(io)?;
            match stored_index(&tx, &path)? {
                None => return Err(StoreError::NotFound(path)),
                Some(idx) if idx != expected_index => {
                    return Err(StoreError::Conflict { key: path })
                }
                Some(_) => {}
            }
            tx.execute("DELETE FROM kv WHERE key = ?1", [&path])
                .map_err(io)?;
            tx.commit().map_err(io)
        })
        .await
    }

    async fn list(&self, prefix: &StoreKey) -> Result<Vec<(StoreKey, KvEntry)>, StoreError> {
        let prefix = prefix.to_prefix();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT key, value, idx FROM kv
                     WHERE substr(key, 1, length(?1)) = ?1
                     ORDER BY key",
                )
                .map_err(io)?;

            let rows = stmt
                .query_map([&prefix], |row| {
                    let key: String = row.get(0)?;
                    Ok((
                        StoreKey::from_path(&key),
                        KvEntry {
                            value: row.get(1)?,
                            index: row.get::<_, i64>(2)? as u64,
                        },
                    ))
                })
                .map_err(io)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(io)?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn key(id: &str) -> StoreKey {
        StoreKey::new(["overlay", "network", id])
    }

    #[tokio::test]
    async fn test_open_file_and_roundtrip() {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteKvStore::open(temp.path().to_str().unwrap()).unwrap();

        let idx = store.put_atomic(&key("n1"), b"{}", None).await.unwrap();
        let entry = store.get(&key("n1")).await.unwrap().unwrap();
        assert_eq!(entry.value, b"{}");
        assert_eq!(entry.index, idx);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        assert!(store.get(&key("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        let first = store.put_atomic(&key("n1"), b"a", None).await.unwrap();
        let second = store.put_atomic(&key("n1"), b"b", Some(first)).await.unwrap();
        assert!(second > first);

        let err = store.put_atomic(&key("n1"), b"c", Some(first)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let err = store.put_atomic(&key("n1"), b"c", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        assert_eq!(store.get(&key("n1")).await.unwrap().unwrap().value, b"b");
    }

    #[tokio::test]
    async fn test_delete_then_recreate_gets_higher_index() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        let first = store.put_atomic(&key("n1"), b"a", None).await.unwrap();

        let err = store.delete_atomic(&key("n1"), first + 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store.delete_atomic(&key("n1"), first).await.unwrap();
        let err = store.delete_atomic(&key("n1"), first).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let again = store.put_atomic(&key("n1"), b"a", None).await.unwrap();
        assert!(again > first);
    }

    #[tokio::test]
    async fn test_list_prefix_is_literal() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.put_atomic(&key("net_1"), b"1", None).await.unwrap();
        store.put_atomic(&key("net%2"), b"2", None).await.unwrap();
        store
            .put_atomic(&StoreKey::new(["overlayx", "network", "n"]), b"3", None)
            .await
            .unwrap();

        let listed = store.list(&StoreKey::new(["overlay", "network"])).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0.last(), Some("net%2"));
        assert_eq!(listed[1].0.last(), Some("net_1"));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap().to_string();

        let idx = {
            let store = SqliteKvStore::open(path.clone()).unwrap();
            store.put_atomic(&key("n1"), b"persisted", None).await.unwrap()
        };

        let store = SqliteKvStore::open(path).unwrap();
        let entry = store.get(&key("n1")).await.unwrap().unwrap();
        assert_eq!(entry.value, b"persisted");
        assert_eq!(entry.index, idx);

        let next = store.put_atomic(&key("n2"), b"x", None).await.unwrap();
        assert!(next > idx);
    }
}
