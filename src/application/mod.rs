//! Application Layer
//!
//! Network registry, persistence, backend synchronization, restore and the
//! driver entry point built on them.

pub mod backend_sync;
pub mod context;
pub mod driver;
pub mod options;
pub mod persistence;
pub mod record;
pub mod registry;
pub mod restorer;

pub use backend_sync::{BackendSync, NETWORK_TYPE};
pub use context::{DriverConfig, DriverContext};
pub use driver::{DiscoveryData, OverlayDriver};
pub use options::{CreateNetworkRequest, Ipv4Pool, NetworkOptions};
pub use persistence::{merge_record, NetworkStore, StoredNetwork};
pub use record::{NetworkRecord, RecordFormat};
pub use registry::{CreateOutcome, NetworkRegistry, RegistryEvent};
pub use restorer::{RestoreReport, Restorer};
