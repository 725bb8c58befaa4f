//! In-process fan-out of shared-store change events.
//!
//! The [`EventSubscriber`] bridges the store's change streams to
//! in-process listeners. Registration of a named subscription is cheap
//! and idempotent; opening an *event operation* starts a pump task that
//! reads the live stream and forwards each delivery to every listener of
//! that event. Listeners get their own dispatch worker, so a slow or
//! panicking listener never stalls the pump or its siblings.
//!
//! Pump tasks survive stream hiccups by reconnecting with exponential
//! backoff. When the configured attempt budget is exhausted the
//! subscriber raises a process-level degradation signal; hosts watch it
//! and fence reads until the stream recovers.

mod error;
mod subscriber;

pub use error::EventError;
pub use subscriber::EventCallback;
pub use subscriber::EventSubscriber;
pub use subscriber::ListenerId;
pub use subscriber::RetryPolicy;
