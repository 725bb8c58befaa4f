//! Data-access seams over the shared store.

use alder_core::DeploymentId;
use alder_core::NodeId;
use alder_core::OpId;
use async_trait::async_trait;

use crate::error::StoreError;
use crate::events::EventStream;
use crate::rows::Invalidation;
use crate::rows::WriteAck;

/// Persistence of ack and invalidation rows, partitioned per deployment.
///
/// All batch writes are single-statement transactions: they apply fully
/// or not at all. Atomicity across deployments is never needed because a
/// single write operates within one deployment.
#[async_trait]
pub trait ConsistencyStore: Send + Sync {
    /// Insert pending-ack rows atomically. A duplicate primary key fails
    /// the whole batch.
    async fn insert_acks(&self, rows: &[WriteAck], deployment: DeploymentId) -> Result<(), StoreError>;

    /// Delete ack rows atomically. Rows already gone are not an error.
    async fn delete_acks(&self, rows: &[WriteAck], deployment: DeploymentId) -> Result<(), StoreError>;

    /// Flip one ack row to acknowledged. Peer-side write: leaders insert
    /// and delete rows but never acknowledge them.
    async fn update_ack(&self, target: NodeId, op_id: OpId, deployment: DeploymentId) -> Result<(), StoreError>;

    /// Insert invalidation rows atomically.
    async fn insert_invalidations(&self, rows: &[Invalidation], deployment: DeploymentId) -> Result<(), StoreError>;

    /// Unacknowledged rows inserted by `leader` at or after `since`.
    /// Diagnostic read; no correctness role.
    async fn pending_acks_for_leader(
        &self,
        leader: NodeId,
        since: i64,
        deployment: DeploymentId,
    ) -> Result<Vec<WriteAck>, StoreError>;
}

/// Row-change event subscriptions on the shared store.
///
/// A subscription is registered once under a stable name, then opened as
/// an *event operation* to obtain a live stream. Registration without an
/// open operation costs nothing at runtime.
#[async_trait]
pub trait ChangeEventSource: Send + Sync {
    /// Register a named subscription on `table` watching `columns`.
    ///
    /// Returns `true` if the descriptor was created, `false` if an
    /// existing one was reused. With `recreate` set, an existing
    /// descriptor is dropped and created fresh.
    async fn register_event(
        &self,
        name: &str,
        table: &str,
        columns: &[&str],
        recreate: bool,
    ) -> Result<bool, StoreError>;

    /// Drop a subscription descriptor. Returns `true` if one existed.
    async fn unregister_event(&self, name: &str) -> Result<bool, StoreError>;

    /// Open a live change stream for a registered subscription.
    async fn open_event_stream(&self, name: &str) -> Result<EventStream, StoreError>;

    /// Close every open stream of a subscription.
    async fn close_event_stream(&self, name: &str) -> Result<(), StoreError>;
}
