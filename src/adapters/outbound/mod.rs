mod dashmap_kv_store;
mod memory_network_backend;
mod sqlite_kv_store;

pub use dashmap_kv_store::DashMapKvStore;
pub use memory_network_backend::{BackendOp, InMemoryNetworkBackend};
pub use sqlite_kv_store::SqliteKvStore;
