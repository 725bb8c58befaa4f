//! Membership errors.

use thiserror::Error;

/// Errors surfaced by [`crate::GroupMembership`] implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    /// `create_group` found the durable group node already present.
    #[error("group '{group}' already exists")]
    GroupExists { group: String },

    /// The named group has not been created.
    #[error("group '{group}' does not exist")]
    GroupNotFound { group: String },

    /// The client's session with the membership service has ended.
    #[error("membership session is closed")]
    SessionClosed,

    /// The membership service could not be reached.
    #[error("membership service unavailable after {attempts} attempt(s): {reason}")]
    ConnectFailed { attempts: u32, reason: String },

    /// A watch handle did not match any registered watch.
    #[error("watch {watch_id} is not registered on group '{group}'")]
    WatchNotFound { group: String, watch_id: u64 },
}
