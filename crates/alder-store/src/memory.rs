//! Deterministic in-process shared store.
//!
//! Backs tests and single-process hosts. Tables are plain ordered maps
//! guarded by one mutex; committed mutations synthesize row-change
//! events for every matching open stream, in commit order, before the
//! mutating call returns.

use std::collections::BTreeMap;
use std::collections::HashMap;

use alder_core::DeploymentId;
use alder_core::NodeId;
use alder_core::OpId;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::events::ChangeKind;
use crate::events::ColumnValue;
use crate::events::EventStream;
use crate::events::RowChangeEvent;
use crate::events::RowImage;
use crate::rows::Invalidation;
use crate::rows::WriteAck;
use crate::tables::ack_columns;
use crate::tables::invalidation_columns;
use crate::tables::invalidations_table;
use crate::tables::write_acks_table;
use crate::traits::ChangeEventSource;
use crate::traits::ConsistencyStore;

/// In-memory implementation of [`ConsistencyStore`] and
/// [`ChangeEventSource`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// deployment -> (target, op_id) -> row
    acks: HashMap<u32, BTreeMap<(i64, i64), WriteAck>>,
    /// deployment -> (inode_id, leader, op_id) -> row
    invalidations: HashMap<u32, BTreeMap<(i64, i64, i64), Invalidation>>,
    /// subscription name -> descriptor
    descriptors: HashMap<String, EventDescriptor>,
    /// subscription name -> open stream senders
    streams: HashMap<String, Vec<mpsc::UnboundedSender<RowChangeEvent>>>,
}

struct EventDescriptor {
    table: String,
    columns: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently in a deployment's ack table, in key order.
    pub fn ack_rows(&self, deployment: DeploymentId) -> Vec<WriteAck> {
        let inner = self.inner.lock();
        inner
            .acks
            .get(&deployment.as_u32())
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Rows currently in a deployment's invalidation table, in key order.
    pub fn invalidation_rows(&self, deployment: DeploymentId) -> Vec<Invalidation> {
        let inner = self.inner.lock();
        inner
            .invalidations
            .get(&deployment.as_u32())
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Inner {
    /// Deliver one committed change to every open stream whose
    /// subscription watches `table`.
    fn emit(&mut self, table: &str, kind: ChangeKind, post: RowImage, pre: Option<RowImage>) {
        let matches: Vec<(String, Vec<String>)> = self
            .descriptors
            .iter()
            .filter(|(_, descriptor)| descriptor.table == table)
            .map(|(name, descriptor)| (name.clone(), descriptor.columns.clone()))
            .collect();

        for (name, columns) in matches {
            let Some(senders) = self.streams.get_mut(&name) else {
                continue;
            };
            let event = RowChangeEvent {
                kind,
                event: name.clone(),
                table: table.to_string(),
                post: project(&post, &columns),
                pre: pre.as_ref().map(|image| project(image, &columns)),
            };
            senders.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }
}

/// Restrict a row image to the columns a subscription watches.
fn project(image: &RowImage, columns: &[String]) -> RowImage {
    let mut projected = RowImage::new();
    for column in columns {
        if let Some(value) = image.get(column) {
            projected = projected.with(column, value.clone());
        }
    }
    projected
}

fn ack_image(row: &WriteAck) -> RowImage {
    RowImage::new()
        .with(ack_columns::NAMENODE_ID, ColumnValue::Int(row.target.as_i64()))
        .with(
            ack_columns::DEPLOYMENT_NUMBER,
            ColumnValue::Int(i64::from(row.deployment.as_u32())),
        )
        .with(ack_columns::ACKNOWLEDGED, ColumnValue::Bool(row.acknowledged))
        .with(ack_columns::OP_ID, ColumnValue::Int(row.op_id.as_i64()))
        .with(ack_columns::TIMESTAMP, ColumnValue::Int(row.timestamp))
        .with(ack_columns::LEADER_ID, ColumnValue::Int(row.leader.as_i64()))
}

fn invalidation_image(row: &Invalidation) -> RowImage {
    RowImage::new()
        .with(invalidation_columns::INODE_ID, ColumnValue::Int(row.inode_id))
        .with(invalidation_columns::PARENT_ID, ColumnValue::Int(row.parent_id))
        .with(invalidation_columns::LEADER_ID, ColumnValue::Int(row.leader.as_i64()))
        .with(invalidation_columns::TX_START, ColumnValue::Int(row.tx_start))
        .with(invalidation_columns::OP_ID, ColumnValue::Int(row.op_id.as_i64()))
}

#[async_trait]
impl ConsistencyStore for MemoryStore {
    async fn insert_acks(&self, rows: &[WriteAck], deployment: DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let table = inner.acks.entry(deployment.as_u32()).or_default();

        // Validate the whole batch before touching the table.
        let mut staged: Vec<(i64, i64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let key = (row.target.as_i64(), row.op_id.as_i64());
            if table.contains_key(&key) || staged.contains(&key) {
                return Err(StoreError::DuplicateAck {
                    target: row.target,
                    op_id: row.op_id,
                });
            }
            staged.push(key);
        }

        for row in rows {
            table.insert((row.target.as_i64(), row.op_id.as_i64()), row.clone());
        }
        let table_name = write_acks_table(deployment);
        for row in rows {
            let image = ack_image(row);
            inner.emit(&table_name, ChangeKind::Insert, image, None);
        }
        Ok(())
    }

    async fn delete_acks(&self, rows: &[WriteAck], deployment: DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let table_name = write_acks_table(deployment);
        let mut removed = Vec::new();
        if let Some(table) = inner.acks.get_mut(&deployment.as_u32()) {
            for row in rows {
                if let Some(existing) = table.remove(&(row.target.as_i64(), row.op_id.as_i64())) {
                    removed.push(existing);
                }
            }
        }
        for row in removed {
            let image = ack_image(&row);
            inner.emit(&table_name, ChangeKind::Delete, image.clone(), Some(image));
        }
        Ok(())
    }

    async fn update_ack(&self, target: NodeId, op_id: OpId, deployment: DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let table = inner
            .acks
            .get_mut(&deployment.as_u32())
            .ok_or(StoreError::AckNotFound { target, op_id })?;
        let row = table
            .get_mut(&(target.as_i64(), op_id.as_i64()))
            .ok_or(StoreError::AckNotFound { target, op_id })?;

        let before = ack_image(row);
        row.acknowledged = true;
        let after = ack_image(row);

        debug!(peer = %target, op_id = %op_id, "ack row flipped to acknowledged");
        let table_name = write_acks_table(deployment);
        inner.emit(&table_name, ChangeKind::Update, after, Some(before));
        Ok(())
    }

    async fn insert_invalidations(&self, rows: &[Invalidation], deployment: DeploymentId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let table = inner.invalidations.entry(deployment.as_u32()).or_default();

        let mut staged: Vec<(i64, i64, i64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let key = (row.inode_id, row.leader.as_i64(), row.op_id.as_i64());
            if table.contains_key(&key) || staged.contains(&key) {
                return Err(StoreError::DuplicateInvalidation {
                    inode_id: row.inode_id,
                    leader: row.leader,
                    op_id: row.op_id,
                });
            }
            staged.push(key);
        }

        for row in rows {
            table.insert((row.inode_id, row.leader.as_i64(), row.op_id.as_i64()), row.clone());
        }
        let table_name = invalidations_table(deployment);
        for row in rows {
            let image = invalidation_image(row);
            inner.emit(&table_name, ChangeKind::Insert, image, None);
        }
        Ok(())
    }

    async fn pending_acks_for_leader(
        &self,
        leader: NodeId,
        since: i64,
        deployment: DeploymentId,
    ) -> Result<Vec<WriteAck>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .acks
            .get(&deployment.as_u32())
            .map(|table| {
                table
                    .values()
                    .filter(|row| row.leader == leader && row.timestamp >= since && !row.acknowledged)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChangeEventSource for MemoryStore {
    async fn register_event(
        &self,
        name: &str,
        table: &str,
        columns: &[&str],
        recreate: bool,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.descriptors.contains_key(name) {
            if !recreate {
                return Ok(false);
            }
            // Recreation invalidates any stream opened against the old
            // descriptor.
            inner.streams.remove(name);
        }
        inner.descriptors.insert(
            name.to_string(),
            EventDescriptor {
                table: table.to_string(),
                columns: columns.iter().map(|column| column.to_string()).collect(),
            },
        );
        Ok(true)
    }

    async fn unregister_event(&self, name: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        inner.streams.remove(name);
        Ok(inner.descriptors.remove(name).is_some())
    }

    async fn open_event_stream(&self, name: &str) -> Result<EventStream, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.descriptors.contains_key(name) {
            return Err(StoreError::UnknownEvent { name: name.to_string() });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.streams.entry(name.to_string()).or_default().push(tx);
        Ok(EventStream { rx })
    }

    async fn close_event_stream(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.streams.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alder_core::DeploymentId;
    use alder_core::NodeId;
    use alder_core::OpId;

    use super::*;
    use crate::tables::ACK_TABLE_COLUMNS;
    use crate::tables::ack_event_name;

    const D: DeploymentId = DeploymentId(1);

    fn ack(target: i64, op: i64) -> WriteAck {
        WriteAck::pending(NodeId(target), D, OpId(op), 1_000, NodeId(7))
    }

    async fn subscribed(store: &MemoryStore) -> EventStream {
        let name = ack_event_name(D);
        store
            .register_event(&name, &write_acks_table(D), ACK_TABLE_COLUMNS, false)
            .await
            .unwrap();
        store.open_event_stream(&name).await.unwrap()
    }

    #[tokio::test]
    async fn duplicate_key_fails_the_whole_batch() {
        let store = MemoryStore::new();
        store.insert_acks(&[ack(8, 42)], D).await.unwrap();

        let err = store.insert_acks(&[ack(9, 42), ack(8, 42)], D).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateAck {
                target: NodeId(8),
                op_id: OpId(42),
            }
        );
        // The non-duplicate row must not have been inserted.
        assert_eq!(store.ack_rows(D).len(), 1);
    }

    #[tokio::test]
    async fn update_ack_emits_pre_and_post_images() {
        let store = MemoryStore::new();
        let mut stream = subscribed(&store).await;

        store.insert_acks(&[ack(8, 42)], D).await.unwrap();
        store.update_ack(NodeId(8), OpId(42), D).await.unwrap();

        let insert = stream.recv().await.unwrap();
        assert_eq!(insert.kind, ChangeKind::Insert);

        let update = stream.recv().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.post.flag(ack_columns::ACKNOWLEDGED), Some(true));
        assert_eq!(update.pre.unwrap().flag(ack_columns::ACKNOWLEDGED), Some(false));
        assert_eq!(update.post.int(ack_columns::OP_ID), Some(42));
        assert_eq!(update.post.int(ack_columns::NAMENODE_ID), Some(8));
    }

    #[tokio::test]
    async fn update_ack_requires_an_existing_row() {
        let store = MemoryStore::new();
        let err = store.update_ack(NodeId(8), OpId(42), D).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::AckNotFound {
                target: NodeId(8),
                op_id: OpId(42),
            }
        );
    }

    #[tokio::test]
    async fn same_row_updates_arrive_in_commit_order() {
        let store = MemoryStore::new();
        let mut stream = subscribed(&store).await;

        store.insert_acks(&[ack(8, 1), ack(8, 2)], D).await.unwrap();
        store.update_ack(NodeId(8), OpId(1), D).await.unwrap();
        store.update_ack(NodeId(8), OpId(2), D).await.unwrap();

        let kinds: Vec<ChangeKind> = {
            let mut kinds = Vec::new();
            for _ in 0..4 {
                kinds.push(stream.recv().await.unwrap().kind);
            }
            kinds
        };
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Insert, ChangeKind::Update, ChangeKind::Update]
        );
    }

    #[tokio::test]
    async fn delete_is_tolerant_of_missing_rows() {
        let store = MemoryStore::new();
        store.insert_acks(&[ack(8, 42)], D).await.unwrap();
        // Second delete of the same rows is a no-op.
        store.delete_acks(&[ack(8, 42), ack(9, 42)], D).await.unwrap();
        store.delete_acks(&[ack(8, 42)], D).await.unwrap();
        assert!(store.ack_rows(D).is_empty());
    }

    #[tokio::test]
    async fn open_stream_requires_registration() {
        let store = MemoryStore::new();
        let err = store.open_event_stream("ack-events-1").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownEvent { .. }));
    }

    #[tokio::test]
    async fn register_is_idempotent_unless_recreating() {
        let store = MemoryStore::new();
        let name = ack_event_name(D);
        let table = write_acks_table(D);

        assert!(store.register_event(&name, &table, ACK_TABLE_COLUMNS, false).await.unwrap());
        assert!(!store.register_event(&name, &table, ACK_TABLE_COLUMNS, false).await.unwrap());
        assert!(store.register_event(&name, &table, ACK_TABLE_COLUMNS, true).await.unwrap());
    }

    #[tokio::test]
    async fn events_are_scoped_to_the_watched_table() {
        let store = MemoryStore::new();
        let mut stream = subscribed(&store).await;

        // Invalidations live in a different table; the ack subscription
        // must not see them.
        let invalidation = Invalidation {
            inode_id: 100,
            parent_id: 50,
            leader: NodeId(7),
            tx_start: 1_000,
            op_id: OpId(42),
        };
        store.insert_invalidations(&[invalidation], D).await.unwrap();
        store.insert_acks(&[ack(8, 42)], D).await.unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.table, write_acks_table(D));
        assert_eq!(event.kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn pending_acks_filters_by_leader_and_time() {
        let store = MemoryStore::new();
        let mut old = ack(8, 1);
        old.timestamp = 500;
        let mut other_leader = ack(9, 2);
        other_leader.leader = NodeId(99);
        store.insert_acks(&[old, ack(10, 3), other_leader], D).await.unwrap();

        let pending = store.pending_acks_for_leader(NodeId(7), 1_000, D).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target, NodeId(10));
    }
}
