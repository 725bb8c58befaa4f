//! Per-deployment table and event naming.
//!
//! Every deployment `N` owns exactly two tables,
//! `write_acks_deployment{N}` and `invalidations_deployment{N}`, and one
//! canonical ack-event subscription name, `ack-events-{N}`. Names are
//! derived for any deployment number rather than enumerated.

use alder_core::DeploymentId;

/// Column names of the per-deployment ack tables.
pub mod ack_columns {
    pub const NAMENODE_ID: &str = "namenode_id";
    pub const DEPLOYMENT_NUMBER: &str = "deployment_number";
    pub const ACKNOWLEDGED: &str = "acknowledged";
    pub const OP_ID: &str = "op_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const LEADER_ID: &str = "leader_id";
}

/// Column names of the per-deployment invalidation tables.
pub mod invalidation_columns {
    pub const INODE_ID: &str = "inode_id";
    pub const PARENT_ID: &str = "parent_id";
    pub const LEADER_ID: &str = "leader_id";
    pub const TX_START: &str = "tx_start";
    pub const OP_ID: &str = "op_id";
}

/// The column set an ack-table event subscription watches.
pub const ACK_TABLE_COLUMNS: &[&str] = &[
    ack_columns::NAMENODE_ID,
    ack_columns::DEPLOYMENT_NUMBER,
    ack_columns::ACKNOWLEDGED,
    ack_columns::OP_ID,
    ack_columns::TIMESTAMP,
    ack_columns::LEADER_ID,
];

/// Name of the ack table for a deployment.
pub fn write_acks_table(deployment: DeploymentId) -> String {
    format!("write_acks_deployment{deployment}")
}

/// Name of the invalidation table for a deployment.
pub fn invalidations_table(deployment: DeploymentId) -> String {
    format!("invalidations_deployment{deployment}")
}

/// Canonical name of the ack-table event subscription for a deployment.
pub fn ack_event_name(deployment: DeploymentId) -> String {
    format!("ack-events-{deployment}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_parametrized_by_deployment() {
        assert_eq!(write_acks_table(DeploymentId(0)), "write_acks_deployment0");
        assert_eq!(write_acks_table(DeploymentId(11)), "write_acks_deployment11");
        assert_eq!(invalidations_table(DeploymentId(2)), "invalidations_deployment2");
        assert_eq!(ack_event_name(DeploymentId(2)), "ack-events-2");
    }

    #[test]
    fn ack_column_set_is_complete() {
        assert_eq!(ACK_TABLE_COLUMNS.len(), 6);
        assert!(ACK_TABLE_COLUMNS.contains(&ack_columns::ACKNOWLEDGED));
        assert!(ACK_TABLE_COLUMNS.contains(&ack_columns::OP_ID));
    }
}
