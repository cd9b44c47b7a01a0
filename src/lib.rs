// Lockbox: Library root
//
// Re-exports the enclave, tenant, store, config, telemetry and CLI modules.

pub mod cli;
pub mod config;
pub mod enclave;
pub mod error;
pub mod store;
pub mod telemetry;
pub mod tenant;

pub use error::{LockboxError, Result};
