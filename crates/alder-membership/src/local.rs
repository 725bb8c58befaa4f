//! In-process membership hub.
//!
//! Implements the membership service contract inside one process:
//! groups are entries in a shared map, members are ephemeral tokens tied
//! to a session, and expiring a session removes its tokens, fires
//! children-changed watches, and invokes the session's loss hooks. Tests
//! use [`LocalMembershipHub::expire_session_of`] to simulate peer
//! crashes.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use alder_core::Backoff;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use crate::client::GroupMembership;
use crate::client::MembershipEvent;
use crate::client::MembershipEventKind;
use crate::client::SessionLossHook;
use crate::client::WatchCallback;
use crate::client::WatchId;
use crate::error::MembershipError;

/// Connection attempts before `connect` gives up.
const MAX_CONNECT_ATTEMPTS: u32 = 4;

/// The shared in-process membership service.
#[derive(Default)]
pub struct LocalMembershipHub {
    state: Mutex<HubState>,
    next_session: AtomicU64,
    next_watch: AtomicU64,
}

#[derive(Default)]
struct HubState {
    groups: HashMap<String, Group>,
    /// Live sessions and the loss hooks their joins registered.
    sessions: HashMap<u64, Vec<SessionLossHook>>,
    closed: bool,
}

#[derive(Default)]
struct Group {
    /// member token -> owning session
    members: BTreeMap<String, u64>,
    watches: HashMap<u64, WatchCallback>,
}

impl LocalMembershipHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new sessions. Existing sessions keep working; process-wide
    /// teardown closes clients individually.
    pub fn shut_down(&self) {
        self.state.lock().closed = true;
    }

    /// Simulate a crash of the session owning `member_token` in `group`:
    /// every token of that session vanishes, watches fire, and the
    /// session's loss hooks run.
    pub fn expire_session_of(&self, group: &str, member_token: &str) {
        let session = {
            let state = self.state.lock();
            state
                .groups
                .get(group)
                .and_then(|entry| entry.members.get(member_token))
                .copied()
        };
        if let Some(session) = session {
            self.end_session(session, true);
        }
    }

    /// Remove a session's ephemeral state. With `lost` set, the
    /// session's loss hooks are invoked after the watches.
    fn end_session(&self, session: u64, lost: bool) {
        let (callbacks, hooks) = {
            let mut state = self.state.lock();
            let mut affected: Vec<(String, Vec<WatchCallback>)> = Vec::new();
            for (name, group) in state.groups.iter_mut() {
                let before = group.members.len();
                group.members.retain(|_, owner| *owner != session);
                if group.members.len() != before {
                    affected.push((name.clone(), group.watches.values().cloned().collect()));
                }
            }
            let hooks = state.sessions.remove(&session).unwrap_or_default();
            (affected, hooks)
        };

        for (group, watchers) in callbacks {
            let event = MembershipEvent {
                group: group.clone(),
                kind: MembershipEventKind::ChildrenChanged,
            };
            for watcher in watchers {
                watcher(&event);
            }
        }
        if lost {
            debug!(session, "membership session lost; invoking loss hooks");
            for hook in hooks {
                hook();
            }
        }
    }

    fn notify_children_changed(&self, group: &str) {
        let watchers: Vec<WatchCallback> = {
            let state = self.state.lock();
            state
                .groups
                .get(group)
                .map(|entry| entry.watches.values().cloned().collect())
                .unwrap_or_default()
        };
        let event = MembershipEvent {
            group: group.to_string(),
            kind: MembershipEventKind::ChildrenChanged,
        };
        for watcher in watchers {
            watcher(&event);
        }
    }

    fn session_alive(&self, session: u64) -> bool {
        self.state.lock().sessions.contains_key(&session)
    }
}

/// One session with the [`LocalMembershipHub`].
pub struct LocalMembershipClient {
    hub: Arc<LocalMembershipHub>,
    session: u64,
}

impl std::fmt::Debug for LocalMembershipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMembershipClient")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl LocalMembershipClient {
    /// Establish a session with the hub, retrying with exponential
    /// backoff while it is unavailable.
    pub async fn connect(hub: Arc<LocalMembershipHub>) -> Result<Self, MembershipError> {
        let mut backoff = Backoff::new(Duration::from_millis(50)).with_jitter();
        loop {
            match Self::try_connect(&hub) {
                Ok(client) => return Ok(client),
                Err(reason) => {
                    let attempts = backoff.attempts() + 1;
                    if attempts >= MAX_CONNECT_ATTEMPTS {
                        return Err(MembershipError::ConnectFailed { attempts, reason });
                    }
                    let delay = backoff.next_delay();
                    warn!(attempts, delay_ms = delay.as_millis() as u64, "membership connect failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn try_connect(hub: &Arc<LocalMembershipHub>) -> Result<Self, String> {
        let mut state = hub.state.lock();
        if state.closed {
            return Err("membership hub is shut down".to_string());
        }
        let session = hub.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        state.sessions.insert(session, Vec::new());
        debug!(session, "membership session established");
        Ok(Self {
            hub: Arc::clone(hub),
            session,
        })
    }

    fn ensure_alive(&self) -> Result<(), MembershipError> {
        if self.hub.session_alive(self.session) {
            Ok(())
        } else {
            Err(MembershipError::SessionClosed)
        }
    }

    /// The hub this client is connected to.
    pub fn hub(&self) -> &Arc<LocalMembershipHub> {
        &self.hub
    }
}

#[async_trait]
impl GroupMembership for LocalMembershipClient {
    async fn create_group(&self, group: &str) -> Result<(), MembershipError> {
        self.ensure_alive()?;
        let mut state = self.hub.state.lock();
        if state.groups.contains_key(group) {
            return Err(MembershipError::GroupExists {
                group: group.to_string(),
            });
        }
        state.groups.insert(group.to_string(), Group::default());
        debug!(group, "group created");
        Ok(())
    }

    async fn join_group(
        &self,
        group: &str,
        member_token: &str,
        on_session_loss: SessionLossHook,
    ) -> Result<(), MembershipError> {
        self.ensure_alive()?;
        {
            let mut state = self.hub.state.lock();
            let entry = state.groups.get_mut(group).ok_or_else(|| MembershipError::GroupNotFound {
                group: group.to_string(),
            })?;
            entry.members.insert(member_token.to_string(), self.session);
            state
                .sessions
                .get_mut(&self.session)
                .ok_or(MembershipError::SessionClosed)?
                .push(on_session_loss);
        }
        debug!(group, member_token, "joined group");
        self.hub.notify_children_changed(group);
        Ok(())
    }

    async fn list_members(&self, group: &str) -> Result<Vec<String>, MembershipError> {
        self.ensure_alive()?;
        let state = self.hub.state.lock();
        let entry = state.groups.get(group).ok_or_else(|| MembershipError::GroupNotFound {
            group: group.to_string(),
        })?;
        Ok(entry.members.keys().cloned().collect())
    }

    async fn add_watch(&self, group: &str, callback: WatchCallback) -> Result<WatchId, MembershipError> {
        self.ensure_alive()?;
        let id = self.hub.next_watch.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.hub.state.lock();
        let entry = state.groups.get_mut(group).ok_or_else(|| MembershipError::GroupNotFound {
            group: group.to_string(),
        })?;
        entry.watches.insert(id, callback);
        Ok(WatchId(id))
    }

    async fn remove_watch(&self, group: &str, watch: WatchId) -> Result<(), MembershipError> {
        let mut state = self.hub.state.lock();
        let entry = state.groups.get_mut(group).ok_or_else(|| MembershipError::GroupNotFound {
            group: group.to_string(),
        })?;
        if entry.watches.remove(&watch.0).is_none() {
            return Err(MembershipError::WatchNotFound {
                group: group.to_string(),
                watch_id: watch.0,
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), MembershipError> {
        // Graceful: ephemeral members are expunged but loss hooks stay
        // silent.
        self.hub.end_session(self.session, false);
        Ok(())
    }
}
