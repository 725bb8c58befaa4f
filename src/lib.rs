//! alder: write-consistency core for stateless metadata nodes.
//!
//! A fleet of serverless metadata nodes shares one relational store and
//! caches inode metadata locally. Any node may serve reads from its
//! cache; any authorized node may write. Before a write commits, every
//! live peer in the writer's deployment must acknowledge that it has
//! evicted the affected inodes. This workspace implements that
//! handshake:
//!
//! - [`alder_routing`]: which deployment owns an inode (consistent hash
//!   of the parent id)
//! - [`alder_store`]: ack/invalidation rows and row-change event streams
//! - [`alder_events`]: fan-out of change events to in-process listeners
//! - [`alder_membership`]: deployment group membership with ephemeral
//!   members and watches
//! - [`alder_coordination`]: the per-write protocol and its ack latch
//!
//! This crate is the composition root. [`Node`] wires the subsystems
//! together from a validated [`NodeConfig`], joins the deployment's
//! membership group, and routes session loss into cache invalidation
//! plus abortion of in-flight writes. There is no CLI and no RPC
//! surface; the embedding filesystem host drives everything through
//! [`Node::coordinator`].
//!
//! ```ignore
//! let node = Node::builder(NodeConfig::default())
//!     .function_name("namenode0")
//!     .start()
//!     .await?;
//!
//! let report = node
//!     .coordinator()
//!     .run_consistency_protocol(&write.invalidated_inodes(), tx_start)
//!     .await?;
//! node.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use alder_coordination::AbortReason;
use alder_coordination::WriteCoordinator;
use alder_core::ConfigError;
use alder_core::DeploymentId;
use alder_core::NodeConfig;
use alder_core::NodeIdentity;
use alder_core::ShutdownSignal;
use alder_events::EventSubscriber;
use alder_events::RetryPolicy;
use alder_membership::GroupMembership;
use alder_membership::LocalMembershipClient;
use alder_membership::LocalMembershipHub;
use alder_membership::MembershipError;
use alder_routing::DeploymentRouter;
use alder_store::ChangeEventSource;
use alder_store::ConsistencyStore;
use alder_store::MemoryStore;
use thiserror::Error;
use tracing::info;
use tracing::warn;

pub use alder_coordination::ProtocolError;
pub use alder_coordination::ProtocolReport;
pub use alder_core::InodeRef;
pub use alder_core::NodeId;
pub use alder_core::OpId;

/// Hook invoked when the node can no longer vouch for its cache, e.g.
/// on membership session loss. Hosts wipe their inode cache here.
pub type CacheInvalidationHook = Arc<dyn Fn() + Send + Sync>;

/// Node startup failures.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to join deployment membership group: {0}")]
    Membership(#[from] MembershipError),
}

/// A composed metadata-node consistency core.
pub struct Node {
    identity: NodeIdentity,
    config: NodeConfig,
    router: DeploymentRouter,
    events: Arc<EventSubscriber>,
    membership: Arc<dyn GroupMembership>,
    coordinator: Arc<WriteCoordinator>,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").finish_non_exhaustive()
    }
}

impl Node {
    /// Start building a node from configuration.
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder {
            config,
            function_name: None,
            store: None,
            change_source: None,
            membership: None,
            on_cache_invalidated: None,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn router(&self) -> &DeploymentRouter {
        &self.router
    }

    /// The write-path entry point.
    pub fn coordinator(&self) -> &Arc<WriteCoordinator> {
        &self.coordinator
    }

    /// The event subscriber, exposed so hosts can watch the degradation
    /// signal.
    pub fn events(&self) -> &Arc<EventSubscriber> {
        &self.events
    }

    /// Tear the node down: abort in-flight writes, leave the membership
    /// group, stop event pumps.
    pub async fn shutdown(&self) {
        info!(node = %self.identity.id, "node shutting down");
        self.coordinator.abort_outstanding(AbortReason::ShuttingDown);
        if let Err(error) = self.membership.close().await {
            warn!(%error, "failed to close membership session");
        }
        self.shutdown.trigger();
    }
}

/// Builder wiring a [`Node`] from configuration plus optional backend
/// overrides.
///
/// Without overrides the node runs self-contained on the in-memory
/// store and an in-process membership hub; production hosts supply
/// their SQL-backed [`ConsistencyStore`]/[`ChangeEventSource`] and
/// membership-service client instead.
pub struct NodeBuilder {
    config: NodeConfig,
    function_name: Option<String>,
    store: Option<Arc<dyn ConsistencyStore>>,
    change_source: Option<Arc<dyn ChangeEventSource>>,
    membership: Option<Arc<dyn GroupMembership>>,
    on_cache_invalidated: Option<CacheInvalidationHook>,
}

impl NodeBuilder {
    /// The serverless function name this node runs as; also the
    /// membership group path. Defaults to `deployment-{N}`.
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    /// Supply the shared-store backends.
    pub fn store(mut self, rows: Arc<dyn ConsistencyStore>, changes: Arc<dyn ChangeEventSource>) -> Self {
        self.store = Some(rows);
        self.change_source = Some(changes);
        self
    }

    /// Supply the membership-service client.
    pub fn membership(mut self, membership: Arc<dyn GroupMembership>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Hook invoked when the local cache must be considered stale.
    pub fn on_cache_invalidated(mut self, hook: CacheInvalidationHook) -> Self {
        self.on_cache_invalidated = Some(hook);
        self
    }

    /// Validate configuration, compose the subsystems, and join the
    /// deployment group.
    pub async fn start(self) -> Result<Node, NodeError> {
        self.config.validate()?;

        let deployment = DeploymentId(self.config.local_deployment);
        let function_name = self
            .function_name
            .unwrap_or_else(|| format!("deployment-{}", deployment));
        let identity = NodeIdentity::generate(function_name, deployment);
        let shutdown = ShutdownSignal::new();

        let (store, change_source) = match (self.store, self.change_source) {
            (Some(store), Some(changes)) => (store, changes),
            _ => {
                let memory = Arc::new(MemoryStore::new());
                (
                    Arc::clone(&memory) as Arc<dyn ConsistencyStore>,
                    memory as Arc<dyn ChangeEventSource>,
                )
            }
        };
        let membership = match self.membership {
            Some(membership) => membership,
            None => {
                let hub = Arc::new(LocalMembershipHub::new());
                Arc::new(LocalMembershipClient::connect(hub).await?) as Arc<dyn GroupMembership>
            }
        };

        let events = Arc::new(EventSubscriber::new(
            change_source,
            RetryPolicy::new(
                Duration::from_millis(self.config.event_retry_backoff_ms),
                self.config.event_retry_max,
            ),
            shutdown.child(),
        ));
        let router = DeploymentRouter::new(self.config.num_deployments, deployment);
        let coordinator = Arc::new(WriteCoordinator::new(
            identity.clone(),
            router,
            store,
            Arc::clone(&events),
            Arc::clone(&membership),
            shutdown.child(),
        ));

        // Losing the membership session voids every freshness guarantee
        // this node has issued: wipe the cache and abort in-flight
        // writes.
        let session_loss_hook: Arc<dyn Fn() + Send + Sync> = {
            let coordinator = Arc::clone(&coordinator);
            let cache_hook = self.on_cache_invalidated.clone();
            Arc::new(move || {
                warn!("membership session lost; invalidating cache and aborting writes");
                if let Some(hook) = &cache_hook {
                    hook();
                }
                coordinator.abort_outstanding(AbortReason::SessionLost);
            })
        };
        membership
            .create_and_join(&identity.function_name, &identity.id.to_token(), session_loss_hook)
            .await?;
        info!(
            node = %identity.id,
            deployment = %identity.deployment,
            group = %identity.function_name,
            "node joined deployment group"
        );

        Ok(Node {
            identity,
            config: self.config,
            router,
            events,
            membership,
            coordinator,
            shutdown,
        })
    }
}
