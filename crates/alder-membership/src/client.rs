//! The group membership seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MembershipError;

/// Invoked when the local session with the membership service is lost.
///
/// A node that loses its session can no longer vouch for any freshness
/// guarantee it has issued, so the hook typically invalidates the whole
/// local cache and aborts in-flight writes.
pub type SessionLossHook = Arc<dyn Fn() + Send + Sync>;

/// Invoked on group change notifications. May fire spuriously; callers
/// reconcile against a fresh member snapshot rather than trusting the
/// event payload.
pub type WatchCallback = Arc<dyn Fn(&MembershipEvent) + Send + Sync>;

/// A group change notification.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub group: String,
    pub kind: MembershipEventKind,
}

/// What changed about the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEventKind {
    /// The set of member tokens changed.
    ChildrenChanged,
}

/// Handle identifying one registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client session with the membership service.
///
/// Groups are durable; members are ephemeral children of a group that
/// vanish when the owning session ends. Watches deliver at-least-once
/// children-changed notifications.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// Create the durable group node. Fails with
    /// [`MembershipError::GroupExists`] when it is already present.
    async fn create_group(&self, group: &str) -> Result<(), MembershipError>;

    /// Publish this session's ephemeral member token under the group.
    ///
    /// `on_session_loss` fires if the session ends for any reason other
    /// than a graceful [`GroupMembership::close`].
    async fn join_group(
        &self,
        group: &str,
        member_token: &str,
        on_session_loss: SessionLossHook,
    ) -> Result<(), MembershipError>;

    /// Create the group if needed, then join it. The common startup
    /// path: the group almost always already exists, so `GroupExists`
    /// from creation is swallowed.
    async fn create_and_join(
        &self,
        group: &str,
        member_token: &str,
        on_session_loss: SessionLossHook,
    ) -> Result<(), MembershipError> {
        match self.create_group(group).await {
            Ok(()) | Err(MembershipError::GroupExists { .. }) => {}
            Err(error) => return Err(error),
        }
        self.join_group(group, member_token, on_session_loss).await
    }

    /// Snapshot the group's current member tokens.
    async fn list_members(&self, group: &str) -> Result<Vec<String>, MembershipError>;

    /// Register a children-changed watch on the group.
    async fn add_watch(&self, group: &str, callback: WatchCallback) -> Result<WatchId, MembershipError>;

    /// Remove a previously registered watch.
    async fn remove_watch(&self, group: &str, watch: WatchId) -> Result<(), MembershipError>;

    /// End the session gracefully: ephemeral members are expunged
    /// promptly and no session-loss hooks fire.
    async fn close(&self) -> Result<(), MembershipError>;
}
