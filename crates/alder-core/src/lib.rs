//! Shared primitives for the alder write-consistency core.
//!
//! This crate defines the types every other alder crate speaks:
//!
//! - [`NodeIdentity`] - who this process is (id, function name, deployment)
//! - [`NodeConfig`] - validated process configuration
//! - [`InodeRef`] - the slice of an inode the consistency core needs
//! - [`ShutdownSignal`] - cooperative teardown plumbing
//! - [`Backoff`] - bounded exponential retry delays
//!
//! It deliberately contains no I/O: storage, membership, and event
//! subsystems live in their own crates and take these types as inputs.

mod backoff;
mod config;
mod identity;
mod shutdown;

pub use backoff::Backoff;
pub use config::ConfigError;
pub use config::NodeConfig;
pub use identity::DeploymentId;
pub use identity::InodeRef;
pub use identity::NodeId;
pub use identity::NodeIdentity;
pub use identity::OpId;
pub use shutdown::ShutdownSignal;

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Transaction start timestamps carried by ack and invalidation rows use
/// this resolution.
pub fn now_unix_ms() -> i64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
