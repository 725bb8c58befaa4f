//! The ack latch: a count-down over the set of peers a write is waiting
//! on.
//!
//! One mutex guards the pending set and its counters, so an
//! acknowledgement and a membership drop for the same peer can never
//! both count. Mutations are synchronous; only the wait is async.

use std::collections::HashSet;

use alder_core::NodeId;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::AbortReason;

/// Why a latch wait ended without draining cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchFailure {
    /// An ack arrived from a peer that was never pending.
    UnexpectedAck { peer: NodeId },
    /// The wait was aborted from outside.
    Aborted(AbortReason),
}

#[derive(Debug)]
struct LatchState {
    pending: HashSet<NodeId>,
    initial: usize,
    acked: usize,
    dropped: usize,
    failure: Option<LatchFailure>,
}

/// Counts down as peers acknowledge or drop out of the group.
///
/// Draining (pending set empty) and failure are both terminal; waiters
/// observe whichever happens first.
#[derive(Debug)]
pub struct AckLatch {
    state: Mutex<LatchState>,
    notify: Notify,
}

impl AckLatch {
    pub fn new(pending: HashSet<NodeId>) -> Self {
        let initial = pending.len();
        Self {
            state: Mutex::new(LatchState {
                pending,
                initial,
                acked: 0,
                dropped: 0,
                failure: None,
            }),
            notify: Notify::new(),
        }
    }

    /// Record an acknowledgement from `peer`.
    ///
    /// An ack from a peer that is not pending marks the latch failed: the
    /// pending set is derived from the same snapshot the ack rows were
    /// written from, so a stranger acking one of our rows means state
    /// corruption. An ack from a peer that already dropped is counted the
    /// same way, which is why the membership path must remove peers
    /// before this is ever possible for them.
    pub fn ack(&self, peer: NodeId) {
        let mut state = self.state.lock();
        if state.failure.is_some() {
            return;
        }
        if state.pending.remove(&peer) {
            state.acked += 1;
        } else {
            state.failure = Some(LatchFailure::UnexpectedAck { peer });
        }
        self.notify.notify_waiters();
    }

    /// Drop every pending peer that is absent from `members`. Returns
    /// how many were dropped. Idempotent: a second call with the same
    /// snapshot removes nothing.
    pub fn retain_members(&self, members: &HashSet<NodeId>) -> usize {
        let mut state = self.state.lock();
        if state.failure.is_some() {
            return 0;
        }
        let before = state.pending.len();
        state.pending.retain(|peer| members.contains(peer));
        let dropped = before - state.pending.len();
        state.dropped += dropped;
        if dropped > 0 {
            self.notify.notify_waiters();
        }
        dropped
    }

    /// Fail the latch from outside; waiters wake with the reason.
    pub fn abort(&self, reason: AbortReason) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            state.failure = Some(LatchFailure::Aborted(reason));
        }
        self.notify.notify_waiters();
    }

    /// Wait until every peer has acknowledged or dropped, or the latch
    /// failed.
    pub async fn wait_drained(&self) -> Result<(), LatchFailure> {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                if let Some(failure) = state.failure {
                    return Err(failure);
                }
                if state.pending.is_empty() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Peers still owed an acknowledgement.
    pub fn pending(&self) -> HashSet<NodeId> {
        self.state.lock().pending.clone()
    }

    /// `(initial, pending, acked, dropped)` counters. At every instant
    /// `pending + acked + dropped == initial` unless the latch failed.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state.lock();
        (state.initial, state.pending.len(), state.acked, state.dropped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn latch_over(peers: &[i64]) -> AckLatch {
        AckLatch::new(peers.iter().map(|id| NodeId(*id)).collect())
    }

    #[tokio::test]
    async fn empty_latch_is_already_drained() {
        let latch = latch_over(&[]);
        latch.wait_drained().await.unwrap();
    }

    #[tokio::test]
    async fn acks_drain_the_latch() {
        let latch = Arc::new(latch_over(&[8, 9]));
        let waiter = {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move { latch.wait_drained().await })
        };

        latch.ack(NodeId(8));
        assert_eq!(latch.counts(), (2, 1, 1, 0));
        latch.ack(NodeId(9));

        waiter.await.unwrap().unwrap();
        assert_eq!(latch.counts(), (2, 0, 2, 0));
    }

    #[tokio::test]
    async fn drops_drain_the_latch() {
        let latch = latch_over(&[8, 9]);
        latch.ack(NodeId(8));

        // Peer 9 disappears from the membership snapshot.
        let survivors: HashSet<NodeId> = [NodeId(8)].into_iter().collect();
        assert_eq!(latch.retain_members(&survivors), 1);

        latch.wait_drained().await.unwrap();
        assert_eq!(latch.counts(), (2, 0, 1, 1));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let latch = latch_over(&[8, 9]);
        let survivors: HashSet<NodeId> = [NodeId(8)].into_iter().collect();
        assert_eq!(latch.retain_members(&survivors), 1);
        assert_eq!(latch.retain_members(&survivors), 0);
        assert_eq!(latch.retain_members(&survivors), 0);
        assert_eq!(latch.counts(), (2, 1, 0, 1));
    }

    #[tokio::test]
    async fn a_peer_decrements_at_most_once() {
        let latch = latch_over(&[8, 9]);
        latch.ack(NodeId(8));

        // The same peer leaving afterwards must not count again.
        let survivors: HashSet<NodeId> = [NodeId(9)].into_iter().collect();
        assert_eq!(latch.retain_members(&survivors), 0);
        assert_eq!(latch.counts(), (2, 1, 1, 0));
    }

    #[tokio::test]
    async fn unexpected_ack_fails_the_latch() {
        let latch = latch_over(&[8]);
        latch.ack(NodeId(99));
        assert_eq!(
            latch.wait_drained().await,
            Err(LatchFailure::UnexpectedAck { peer: NodeId(99) })
        );
    }

    #[tokio::test]
    async fn abort_wakes_waiters() {
        let latch = Arc::new(latch_over(&[8]));
        let waiter = {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move { latch.wait_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        latch.abort(AbortReason::SessionLost);
        assert_eq!(
            waiter.await.unwrap(),
            Err(LatchFailure::Aborted(AbortReason::SessionLost))
        );
    }

    #[tokio::test]
    async fn conservation_holds_through_mixed_outcomes() {
        let latch = latch_over(&[1, 2, 3, 4]);
        latch.ack(NodeId(2));
        let survivors: HashSet<NodeId> = [NodeId(1), NodeId(2), NodeId(4)].into_iter().collect();
        latch.retain_members(&survivors);
        latch.ack(NodeId(4));

        let (initial, pending, acked, dropped) = latch.counts();
        assert_eq!(pending + acked + dropped, initial);
        assert_eq!((pending, acked, dropped), (1, 2, 1));
    }
}
