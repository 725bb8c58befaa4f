//! Shared-store error type.

use alder_core::NodeId;
use alder_core::OpId;
use thiserror::Error;

/// Errors surfaced by [`crate::ConsistencyStore`] and
/// [`crate::ChangeEventSource`] implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A batch insert hit an existing primary key; the whole batch was
    /// rolled back.
    #[error("ack row for node {target}, op {op_id} already exists; batch aborted")]
    DuplicateAck { target: NodeId, op_id: OpId },

    /// A batch insert hit an existing invalidation primary key; the whole
    /// batch was rolled back.
    #[error("invalidation row for inode {inode_id}, leader {leader}, op {op_id} already exists; batch aborted")]
    DuplicateInvalidation {
        inode_id: i64,
        leader: NodeId,
        op_id: OpId,
    },

    /// An acknowledgement update targeted a row that does not exist.
    #[error("no ack row for node {target}, op {op_id}")]
    AckNotFound { target: NodeId, op_id: OpId },

    /// An event operation referenced a subscription that was never
    /// registered.
    #[error("no event registered under '{name}'")]
    UnknownEvent { name: String },

    /// The store could not serve the request; retrying may succeed.
    #[error("shared store unavailable: {reason}")]
    Unavailable { reason: String },
}
