//! Deployment routing for the alder consistency core.
//!
//! The inode namespace is partitioned across a fixed number of
//! deployments by consistent-hashing each inode's **parent** id, so that
//! siblings land in the same deployment and directory-local operations
//! stay within one cache shard.
//!
//! # Components
//!
//! - [`jump_hash`]: Jump consistent hash, stable across restarts and
//!   implementations
//! - [`DeploymentRouter`]: maps inodes to deployments and rejects writes
//!   the local node is not authorized to perform

mod consistent_hash;
mod router;

pub use consistent_hash::jump_hash;
pub use router::DeploymentRouter;
pub use router::RoutingError;
