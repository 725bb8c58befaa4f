//! Fixtures for consistency-protocol integration tests.
//!
//! A test cluster is one in-memory shared store plus one in-process
//! membership hub. Leaders get the full subsystem stack; peers are plain
//! group members that the tests drive by hand (or via
//! [`spawn_reactive_peer`], which mimics a real follower).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use alder_core::DeploymentId;
use alder_core::NodeId;
use alder_core::NodeIdentity;
use alder_core::ShutdownSignal;
use alder_coordination::AbortReason;
use alder_coordination::WriteCoordinator;
use alder_events::EventSubscriber;
use alder_events::RetryPolicy;
use alder_membership::GroupMembership;
use alder_membership::LocalMembershipClient;
use alder_membership::LocalMembershipHub;
use alder_routing::DeploymentRouter;
use alder_routing::jump_hash;
use alder_store::ChangeEventSource;
use alder_store::ChangeKind;
use alder_store::ConsistencyStore;
use alder_store::MemoryStore;
use alder_store::WriteAck;
use alder_store::invalidation_columns;
use alder_store::invalidations_table;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

static LOGGING: Once = Once::new();

/// Route test logs through the tracing subscriber once per process.
/// Enable with `RUST_LOG=debug`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One in-memory store and membership hub shared by every node of a
/// test.
pub struct TestCluster {
    pub store: Arc<MemoryStore>,
    pub hub: Arc<LocalMembershipHub>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            hub: Arc::new(LocalMembershipHub::new()),
        }
    }
}

/// A fully wired writing node.
pub struct LeaderNode {
    pub identity: NodeIdentity,
    pub coordinator: Arc<WriteCoordinator>,
    pub events: Arc<EventSubscriber>,
    #[allow(dead_code)]
    pub shutdown: ShutdownSignal,
    /// Set by the session-loss hook, standing in for a real cache wipe.
    pub cache_invalidated: Arc<AtomicBool>,
}

/// Build a leader with the given id, join it to `group`, and wire its
/// session-loss hook to abort outstanding writes.
pub async fn start_leader(
    cluster: &TestCluster,
    id: i64,
    num_deployments: u32,
    deployment: u32,
    group: &str,
) -> LeaderNode {
    let identity = NodeIdentity {
        id: NodeId(id),
        function_name: group.to_string(),
        deployment: DeploymentId(deployment),
    };

    let client = Arc::new(LocalMembershipClient::connect(Arc::clone(&cluster.hub)).await.expect("hub connect"));
    let cache_invalidated = Arc::new(AtomicBool::new(false));
    let coordinator_slot: Arc<Mutex<Option<Arc<WriteCoordinator>>>> = Arc::new(Mutex::new(None));
    let hook = {
        let cache_invalidated = Arc::clone(&cache_invalidated);
        let coordinator_slot = Arc::clone(&coordinator_slot);
        Arc::new(move || {
            cache_invalidated.store(true, std::sync::atomic::Ordering::SeqCst);
            if let Some(coordinator) = coordinator_slot.lock().as_ref() {
                coordinator.abort_outstanding(AbortReason::SessionLost);
            }
        })
    };
    client
        .create_and_join(group, &identity.id.to_token(), hook)
        .await
        .expect("join group");

    let shutdown = ShutdownSignal::new();
    let events = Arc::new(EventSubscriber::new(
        Arc::clone(&cluster.store) as Arc<dyn ChangeEventSource>,
        RetryPolicy::new(Duration::from_millis(10), 3),
        shutdown.child(),
    ));
    let coordinator = Arc::new(WriteCoordinator::new(
        identity.clone(),
        DeploymentRouter::new(num_deployments, identity.deployment),
        Arc::clone(&cluster.store) as Arc<dyn ConsistencyStore>,
        Arc::clone(&events),
        client as Arc<dyn GroupMembership>,
        shutdown.child(),
    ));
    *coordinator_slot.lock() = Some(Arc::clone(&coordinator));

    LeaderNode {
        identity,
        coordinator,
        events,
        shutdown,
        cache_invalidated,
    }
}

/// Join a bare peer (membership only) to the group.
pub async fn join_peer(cluster: &TestCluster, group: &str, id: i64) -> Arc<LocalMembershipClient> {
    let client = Arc::new(LocalMembershipClient::connect(Arc::clone(&cluster.hub)).await.expect("hub connect"));
    client
        .create_and_join(group, &NodeId(id).to_token(), Arc::new(|| {}))
        .await
        .expect("join group");
    client
}

/// The deployment a parent inode id routes to.
pub fn deployment_of_parent(parent_id: i64, num_deployments: u32) -> u32 {
    jump_hash(parent_id as u64, num_deployments)
}

/// Poll the ack table until `count` rows are present.
pub async fn wait_for_ack_rows(store: &MemoryStore, deployment: DeploymentId, count: usize) -> Vec<WriteAck> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let rows = store.ack_rows(deployment);
            if rows.len() >= count {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("ack rows never appeared")
}

/// Poll the invalidation table until `count` rows are present. Since
/// invalidations commit after the ack subscription is in place, this is
/// also the signal that the leader is listening.
pub async fn wait_for_invalidation_rows(store: &MemoryStore, deployment: DeploymentId, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if store.invalidation_rows(deployment).len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("invalidation rows never appeared");
}

/// Run a follower: watch the invalidation table and acknowledge this
/// peer's pending row once per observed operation.
pub fn spawn_reactive_peer(store: Arc<MemoryStore>, peer: NodeId, deployment: DeploymentId) -> JoinHandle<()> {
    tokio::spawn(async move {
        let subscription = format!("inv-watch-{peer}");
        store
            .register_event(
                &subscription,
                &invalidations_table(deployment),
                &[invalidation_columns::INODE_ID, invalidation_columns::OP_ID],
                false,
            )
            .await
            .expect("register invalidation watch");
        let mut stream = store.open_event_stream(&subscription).await.expect("open stream");

        let mut acked = HashSet::new();
        while let Some(event) = stream.recv().await {
            if event.kind != ChangeKind::Insert {
                continue;
            }
            let Some(op) = event.post.int(invalidation_columns::OP_ID) else {
                continue;
            };
            if !acked.insert(op) {
                continue;
            }
            // The pending row must already be there: ack rows commit
            // before invalidations.
            store
                .update_ack(peer, alder_core::OpId(op), deployment)
                .await
                .expect("pending ack row missing when invalidation arrived");
        }
    })
}
