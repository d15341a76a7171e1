//! Domain Layer
//!
//! Entities, value objects, errors and the outbound ports the driver talks through.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod value_objects;

pub use entities::{Endpoint, Network, NetworkState, NotifyAction, NotifyEvent, Subnet};
pub use errors::DriverError;
pub use value_objects::{MacAddress, Vni};
