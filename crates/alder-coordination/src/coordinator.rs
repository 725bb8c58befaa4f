//! The per-write protocol driver.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use alder_core::InodeRef;
use alder_core::NodeId;
use alder_core::NodeIdentity;
use alder_core::OpId;
use alder_core::ShutdownSignal;
use alder_events::EventCallback;
use alder_events::EventSubscriber;
use alder_events::ListenerId;
use alder_membership::GroupMembership;
use alder_membership::WatchId;
use alder_routing::DeploymentRouter;
use alder_store::ACK_TABLE_COLUMNS;
use alder_store::ChangeKind;
use alder_store::ConsistencyStore;
use alder_store::Invalidation;
use alder_store::RowChangeEvent;
use alder_store::WriteAck;
use alder_store::ack_columns;
use alder_store::ack_event_name;
use alder_store::write_acks_table;
use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use crate::error::AbortReason;
use crate::error::ProtocolError;
use crate::latch::AckLatch;
use crate::latch::LatchFailure;

/// What one successful protocol run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolReport {
    pub op_id: OpId,
    /// Peers that owed an acknowledgement when the write began.
    pub initial_peers: usize,
    /// Peers that acknowledged.
    pub acked: usize,
    /// Peers that left the group instead of acknowledging.
    pub dropped: usize,
}

/// Runs the cache-consistency handshake for writes issued by one node.
///
/// Constructed once per node with explicit collaborators; every write
/// calls [`WriteCoordinator::run_consistency_protocol`] with the inodes
/// it is about to modify, while holding the locks that serialize those
/// inodes against other writers.
pub struct WriteCoordinator {
    identity: NodeIdentity,
    router: DeploymentRouter,
    store: Arc<dyn ConsistencyStore>,
    events: Arc<EventSubscriber>,
    membership: Arc<dyn GroupMembership>,
    shutdown: ShutdownSignal,
    /// Latches of in-flight writes, aborted wholesale on session loss or
    /// shutdown.
    active: Mutex<HashMap<OpId, Arc<AckLatch>>>,
}

/// Per-write handles that cleanup must release.
struct WriteSession {
    event_name: String,
    listener: Option<ListenerId>,
    watch: Option<WatchId>,
}

impl WriteCoordinator {
    pub fn new(
        identity: NodeIdentity,
        router: DeploymentRouter,
        store: Arc<dyn ConsistencyStore>,
        events: Arc<EventSubscriber>,
        membership: Arc<dyn GroupMembership>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            identity,
            router,
            store,
            events,
            membership,
            shutdown,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Run the consistency protocol for one write.
    ///
    /// On `Ok` the caller may commit: every peer that was alive at the
    /// start has either evicted the touched inodes from its cache or left
    /// the group. On `Err` the caller must abort the write; no pending
    /// ack rows remain either way.
    pub async fn run_consistency_protocol(
        &self,
        invalidated: &[InodeRef],
        tx_start: i64,
    ) -> Result<ProtocolReport, ProtocolError> {
        let op_id = OpId::generate();

        // A write that invalidates nothing has nothing to coordinate.
        if invalidated.is_empty() {
            return Ok(ProtocolReport {
                op_id,
                initial_peers: 0,
                acked: 0,
                dropped: 0,
            });
        }
        if self.shutdown.is_triggered() {
            return Err(ProtocolError::ShuttingDown { op_id });
        }

        debug!(
            op_id = %op_id,
            tx_start,
            inodes = invalidated.len(),
            leader = %self.identity.id,
            "consistency protocol started"
        );

        // No side effects may precede authorization.
        self.router.authorize_all(invalidated)?;

        // Build the pending set from the current group and persist one
        // un-acknowledged row per peer.
        let tokens = self
            .membership
            .list_members(&self.identity.function_name)
            .await
            .map_err(|source| ProtocolError::Membership { source })?;
        let peers = peer_ids(&tokens, self.identity.id);
        let rows: Vec<WriteAck> = peers
            .iter()
            .map(|peer| WriteAck::pending(*peer, self.identity.deployment, op_id, tx_start, self.identity.id))
            .collect();
        if !rows.is_empty() {
            self.store
                .insert_acks(&rows, self.identity.deployment)
                .await
                .map_err(|source| ProtocolError::AckInsert { source })?;
        }
        debug!(op_id = %op_id, peers = peers.len(), "pending acknowledgements persisted");

        let latch = Arc::new(AckLatch::new(peers.iter().copied().collect::<HashSet<NodeId>>()));
        self.active.lock().insert(op_id, Arc::clone(&latch));

        let mut session = WriteSession {
            event_name: ack_event_name(self.identity.deployment),
            listener: None,
            watch: None,
        };
        let outcome = self.execute(op_id, tx_start, invalidated, &rows, &latch, &mut session).await;
        self.cleanup(op_id, &rows, &mut session).await;
        self.active.lock().remove(&op_id);

        outcome.map(|()| {
            let (initial, _, acked, dropped) = latch.counts();
            debug!(op_id = %op_id, acked, dropped, "consistency protocol finished");
            ProtocolReport {
                op_id,
                initial_peers: initial,
                acked,
                dropped,
            }
        })
    }

    /// Abort every in-flight wait. Invoked from the membership
    /// session-loss hook and from node teardown; the aborted writes run
    /// their own cleanup.
    pub fn abort_outstanding(&self, reason: AbortReason) {
        let latches: Vec<Arc<AckLatch>> = self.active.lock().values().cloned().collect();
        if latches.is_empty() {
            return;
        }
        warn!(count = latches.len(), ?reason, "aborting in-flight consistency waits");
        for latch in latches {
            latch.abort(reason);
        }
    }

    /// Number of writes currently inside the protocol.
    pub fn outstanding(&self) -> usize {
        self.active.lock().len()
    }

    /// Steps between ack persistence and cleanup. Any error aborts the
    /// write; cleanup still runs.
    async fn execute(
        &self,
        op_id: OpId,
        tx_start: i64,
        invalidated: &[InodeRef],
        rows: &[WriteAck],
        latch: &Arc<AckLatch>,
        session: &mut WriteSession,
    ) -> Result<(), ProtocolError> {
        let deployment = self.identity.deployment;
        let has_peers = !rows.is_empty();

        // Subscribe to ack-table changes before issuing invalidations, so
        // a peer acking immediately after it sees the invalidation cannot
        // be missed. The subscription is shared across this node's
        // concurrent writes; the listener filters by op id. With no peers
        // there is nothing to hear and the subscription is skipped.
        if has_peers {
            self.events
                .register_event(&session.event_name, &write_acks_table(deployment), ACK_TABLE_COLUMNS, false)
                .await
                .map_err(|source| ProtocolError::Subscription { source })?;
            session.listener = Some(
                self.events
                    .add_listener(&session.event_name, ack_listener(Arc::clone(latch), op_id)),
            );
            self.events
                .create_event_operation(&session.event_name)
                .await
                .map_err(|source| ProtocolError::Subscription { source })?;
            debug!(op_id = %op_id, event = %session.event_name, "subscribed to ack events");
        }

        // Issue one invalidation per touched inode. Peers react to these
        // rows by evicting and then acking.
        let invalidations: Vec<Invalidation> = invalidated
            .iter()
            .map(|inode| Invalidation {
                inode_id: inode.inode_id,
                parent_id: inode.parent_id,
                leader: self.identity.id,
                tx_start,
                op_id,
            })
            .collect();
        self.store
            .insert_invalidations(&invalidations, deployment)
            .await
            .map_err(|source| ProtocolError::InvalidationInsert { source })?;
        debug!(op_id = %op_id, invalidations = invalidations.len(), "invalidations issued");

        if !has_peers {
            return Ok(());
        }

        // Watch the group so peers that die mid-wait are dropped from the
        // pending set, then reconcile once by hand: a peer may have left
        // between the member snapshot and the watch registration.
        let watch = self
            .membership
            .add_watch(&self.identity.function_name, self.membership_watch(op_id, latch))
            .await
            .map_err(|source| ProtocolError::Membership { source })?;
        session.watch = Some(watch);
        reconcile_against_group(&self.membership, &self.identity.function_name, latch, op_id).await;

        let waited = tokio::select! {
            waited = latch.wait_drained() => waited,
            // Shutdown also aborts the latch through the registry; the
            // select covers the window before this write was registered.
            _ = self.shutdown.triggered() => Err(LatchFailure::Aborted(AbortReason::ShuttingDown)),
        };
        match waited {
            Ok(()) => Ok(()),
            Err(LatchFailure::UnexpectedAck { peer }) => Err(ProtocolError::UnexpectedAck { peer, op_id }),
            Err(LatchFailure::Aborted(AbortReason::SessionLost)) => Err(ProtocolError::SessionLost { op_id }),
            Err(LatchFailure::Aborted(AbortReason::ShuttingDown)) => Err(ProtocolError::ShuttingDown { op_id }),
        }
    }

    /// Release per-write resources. Failures here are logged, never
    /// escalated: by this point the protocol has either delivered its
    /// guarantee or aborted, and leftover state is harmless to peers.
    async fn cleanup(&self, op_id: OpId, rows: &[WriteAck], session: &mut WriteSession) {
        if let Some(watch) = session.watch.take() {
            if let Err(error) = self.membership.remove_watch(&self.identity.function_name, watch).await {
                warn!(op_id = %op_id, %error, "failed to remove membership watch");
            }
        }

        // Removing the last listener of the event also stops the shared
        // change-stream pump.
        if let Some(listener) = session.listener.take() {
            self.events.remove_listener(&session.event_name, listener).await;
        }

        if !rows.is_empty() {
            if let Err(error) = self.store.delete_acks(rows, self.identity.deployment).await {
                warn!(op_id = %op_id, %error, "failed to delete pending ack rows");
            }
        }
    }

    /// Children-changed callback: reconcile the pending set against a
    /// fresh member snapshot.
    fn membership_watch(&self, op_id: OpId, latch: &Arc<AckLatch>) -> alder_membership::WatchCallback {
        let membership = Arc::clone(&self.membership);
        let group = self.identity.function_name.clone();
        let latch = Arc::clone(latch);
        // Watch callbacks may fire from the membership client's own
        // threads; reconcile on the runtime this write runs on.
        let runtime = tokio::runtime::Handle::current();
        Arc::new(move |_event| {
            let membership = Arc::clone(&membership);
            let group = group.clone();
            let latch = Arc::clone(&latch);
            runtime.spawn(async move {
                reconcile_against_group(&membership, &group, &latch, op_id).await;
            });
        })
    }
}

/// Drop every pending peer that is missing from the group's current
/// member snapshot. Safe to call concurrently and repeatedly: the latch
/// serializes the mutation, and a peer can only be removed once.
async fn reconcile_against_group(
    membership: &Arc<dyn GroupMembership>,
    group: &str,
    latch: &AckLatch,
    op_id: OpId,
) {
    match membership.list_members(group).await {
        Ok(tokens) => {
            let members: HashSet<NodeId> = tokens.iter().filter_map(|token| NodeId::from_token(token)).collect();
            let dropped = latch.retain_members(&members);
            if dropped > 0 {
                warn!(op_id = %op_id, dropped, "stopped waiting on peers that left the group");
            }
        }
        Err(error) => {
            // Best effort: the next watch fire retries, and session loss
            // aborts the wait through the loss hook.
            warn!(op_id = %op_id, %error, "failed to snapshot group members");
        }
    }
}

/// Parse member tokens into peer ids, excluding the local node.
fn peer_ids(tokens: &[String], self_id: NodeId) -> Vec<NodeId> {
    let mut peers = Vec::new();
    for token in tokens {
        match NodeId::from_token(token) {
            Some(id) if id == self_id => {}
            Some(id) => peers.push(id),
            None => warn!(%token, "ignoring malformed member token"),
        }
    }
    peers
}

/// The ack-event filter: extract the acking peer from a delivery, or
/// `None` when the delivery is not an acknowledgement of `op_id`.
///
/// Inserts are the leader's own row creation and never count. Updates
/// for other op ids belong to concurrent writes sharing the
/// subscription. Updates that do not flip `acknowledged` to true are
/// noise.
fn ack_from_event(event: &RowChangeEvent, op_id: OpId) -> Option<NodeId> {
    if event.kind == ChangeKind::Insert {
        return None;
    }
    if event.post.int(ack_columns::OP_ID)? != op_id.as_i64() {
        return None;
    }
    if !event.post.flag(ack_columns::ACKNOWLEDGED)? {
        return None;
    }
    let peer = event.post.int(ack_columns::NAMENODE_ID)?;
    Some(NodeId(peer))
}

fn ack_listener(latch: Arc<AckLatch>, op_id: OpId) -> EventCallback {
    Arc::new(move |event| {
        if let Some(peer) = ack_from_event(event, op_id) {
            debug!(op_id = %op_id, peer = %peer, "acknowledgement received");
            latch.ack(peer);
        }
    })
}
