//! Cooperative shutdown signal shared across subsystems.

use tokio_util::sync::CancellationToken;

/// Teardown signal handed to every long-lived task the core spawns.
///
/// The composition root owns the parent signal; subsystems receive child
/// signals so cancelling the root reaches everything, while a subsystem
/// can be torn down alone without disturbing its siblings.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a child signal that is cancelled when this one is.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Request shutdown of this signal and all children derived from it.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once shutdown has been requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_observes_parent_trigger() {
        let parent = ShutdownSignal::new();
        let child = parent.child();
        assert!(!child.is_triggered());

        parent.trigger();
        assert!(child.is_triggered());
    }

    #[test]
    fn parent_unaffected_by_child_trigger() {
        let parent = ShutdownSignal::new();
        let child = parent.child();

        child.trigger();
        assert!(child.is_triggered());
        assert!(!parent.is_triggered());
    }
}
