//! Infrastructure Layer
//!
//! Process-level concerns.

pub mod shutdown;

pub use shutdown::shutdown_signal;
