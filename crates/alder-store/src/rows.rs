//! Row types for the ack and invalidation tables.

use alder_core::DeploymentId;
use alder_core::NodeId;
use alder_core::OpId;
use serde::Deserialize;
use serde::Serialize;

/// One pending acknowledgement: `target` must confirm that it has evicted
/// the leader's inodes from its cache.
///
/// Inserted by the leader with `acknowledged = false`; the peer flips the
/// flag; the leader deletes the row once the write completes. Primary key
/// is `(target, op_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// The peer node that owes the acknowledgement.
    pub target: NodeId,
    /// Deployment the row lives in; echoes the table partition.
    pub deployment: DeploymentId,
    /// Whether the peer has acknowledged yet.
    pub acknowledged: bool,
    /// The write operation this acknowledgement belongs to.
    pub op_id: OpId,
    /// Transaction start time (Unix millis) of the leader's write.
    pub timestamp: i64,
    /// The node performing the write.
    pub leader: NodeId,
}

impl WriteAck {
    /// Build the un-acknowledged row the leader inserts.
    pub fn pending(target: NodeId, deployment: DeploymentId, op_id: OpId, timestamp: i64, leader: NodeId) -> Self {
        Self {
            target,
            deployment,
            acknowledged: false,
            op_id,
            timestamp,
            leader,
        }
    }

    /// Primary key within the deployment's ack table.
    pub fn key(&self) -> (NodeId, OpId) {
        (self.target, self.op_id)
    }
}

/// One cache invalidation: peers that see this row evict `inode_id`.
///
/// Primary key is `(inode_id, leader, op_id)`, so concurrent writes to
/// the same inode by different leaders never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub inode_id: i64,
    pub parent_id: i64,
    /// The node that issued the invalidation.
    pub leader: NodeId,
    /// Transaction start time (Unix millis) of the leader's write.
    pub tx_start: i64,
    pub op_id: OpId,
}

impl Invalidation {
    /// Primary key within the deployment's invalidation table.
    pub fn key(&self) -> (i64, NodeId, OpId) {
        (self.inode_id, self.leader, self.op_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_rows_start_unacknowledged() {
        let row = WriteAck::pending(NodeId(8), DeploymentId(1), OpId(42), 1_700_000_000_000, NodeId(7));
        assert!(!row.acknowledged);
        assert_eq!(row.key(), (NodeId(8), OpId(42)));
    }

    #[test]
    fn ack_rows_serialize_with_stable_field_names() {
        let row = WriteAck::pending(NodeId(8), DeploymentId(1), OpId(42), 1_700_000_000_000, NodeId(7));
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"target\":8"));
        assert!(json.contains("\"acknowledged\":false"));
        assert!(json.contains("\"op_id\":42"));
    }

    #[test]
    fn invalidation_key_distinguishes_leaders() {
        let a = Invalidation {
            inode_id: 100,
            parent_id: 50,
            leader: NodeId(7),
            tx_start: 1,
            op_id: OpId(42),
        };
        let mut b = a.clone();
        b.leader = NodeId(9);
        assert_ne!(a.key(), b.key());
    }
}
