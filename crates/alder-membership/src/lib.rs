//! Group membership for the alder consistency core.
//!
//! A deployment's live nodes are tracked as ephemeral members of a named
//! group: a member's token disappears when its session ends, and
//! children-changed watches tell the survivors. The write path uses
//! this to stop waiting for acknowledgements from peers that are gone.
//!
//! [`GroupMembership`] is the seam; hosts back it with their membership
//! service of choice. [`LocalMembershipHub`] is the in-process
//! implementation used by tests and single-process deployments, with a
//! [`LocalMembershipHub::expire_session`] hook to simulate crashes.

mod client;
mod error;
mod local;

pub use client::GroupMembership;
pub use client::MembershipEvent;
pub use client::MembershipEventKind;
pub use client::SessionLossHook;
pub use client::WatchCallback;
pub use client::WatchId;
pub use error::MembershipError;
pub use local::LocalMembershipClient;
pub use local::LocalMembershipHub;
