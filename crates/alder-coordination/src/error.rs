//! Protocol error taxonomy.

use alder_core::NodeId;
use alder_core::OpId;
use alder_events::EventError;
use alder_membership::MembershipError;
use alder_routing::RoutingError;
use alder_store::StoreError;
use thiserror::Error;

/// Why an in-flight wait was aborted from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The membership session was lost; no freshness guarantee survives.
    SessionLost,
    /// The node is tearing down.
    ShuttingDown,
}

/// A write's consistency protocol could not complete; the caller must
/// abort the write.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The write touched an inode owned by another deployment. Raised
    /// before any side effect.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The peer snapshot needed to build the pending set could not be
    /// taken.
    #[error("failed to snapshot deployment members: {source}")]
    Membership { source: MembershipError },

    /// Pending-ack rows could not be persisted.
    #[error("failed to persist pending acknowledgements: {source}")]
    AckInsert { source: StoreError },

    /// The ack-table subscription could not be established before
    /// invalidations were issued.
    #[error("failed to subscribe to acknowledgement events: {source}")]
    Subscription { source: EventError },

    /// Invalidation rows could not be persisted.
    #[error("failed to persist invalidations: {source}")]
    InvalidationInsert { source: StoreError },

    /// The membership session was lost while waiting for acks.
    #[error("membership session lost while awaiting acknowledgements for op {op_id}")]
    SessionLost { op_id: OpId },

    /// The node shut down while waiting for acks.
    #[error("node shut down while awaiting acknowledgements for op {op_id}")]
    ShuttingDown { op_id: OpId },

    /// An acknowledgement arrived from a peer that owes none. Indicates
    /// state corruption; not recoverable within the write.
    #[error("acknowledgement from node {peer} which is not pending for op {op_id}")]
    UnexpectedAck { peer: NodeId, op_id: OpId },
}
