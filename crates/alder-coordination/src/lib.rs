//! The write-consistency protocol.
//!
//! Any node may serve reads from its local inode cache, so a writer must
//! not commit until every live peer in its deployment has evicted the
//! affected inodes. The [`WriteCoordinator`] runs that handshake for one
//! write:
//!
//! 1. authorize: every touched inode must route to this deployment
//! 2. persist one pending-ack row per live peer
//! 3. subscribe to ack-table change events (before step 4, so no ack can
//!    slip past unobserved)
//! 4. persist one invalidation row per touched inode
//! 5. wait on the [`AckLatch`] while acks arrive and the membership
//!    watch drops peers that died
//! 6. clean up: watch, listener, event operation, ack rows
//!
//! The latch drains when every peer has either acknowledged or left the
//! group; membership liveness is what bounds the wait, not a timeout.

mod coordinator;
mod error;
mod latch;

pub use coordinator::ProtocolReport;
pub use coordinator::WriteCoordinator;
pub use error::AbortReason;
pub use error::ProtocolError;
pub use latch::AckLatch;
pub use latch::LatchFailure;
