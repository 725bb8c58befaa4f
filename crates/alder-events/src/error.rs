//! Event subscription errors.

use alder_store::StoreError;
use thiserror::Error;

/// Errors surfaced by [`crate::EventSubscriber`].
#[derive(Debug, Error)]
pub enum EventError {
    /// The store rejected the subscription descriptor.
    #[error("failed to register event '{name}': {source}")]
    Register { name: String, source: StoreError },

    /// The store rejected descriptor removal.
    #[error("failed to unregister event '{name}': {source}")]
    Unregister { name: String, source: StoreError },

    /// No live change stream could be opened for the event.
    #[error("failed to open change stream for event '{name}': {source}")]
    OpenStream { name: String, source: StoreError },
}
