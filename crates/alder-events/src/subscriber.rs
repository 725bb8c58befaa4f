//! The event subscriber and its dispatch machinery.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use alder_core::Backoff;
use alder_core::ShutdownSignal;
use alder_store::ChangeEventSource;
use alder_store::EventStream;
use alder_store::RowChangeEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::EventError;

/// Callback invoked for every delivery of a subscribed event.
///
/// One callback per listener registration; the write path registers one
/// per in-flight operation.
pub type EventCallback = Arc<dyn Fn(&RowChangeEvent) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Reconnect policy for lost change streams.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First reconnect delay; doubles per consecutive failure.
    pub initial_backoff: Duration,
    /// Reconnect attempts before the stream is declared lost.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(initial_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            initial_backoff,
            max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_attempts: 5,
        }
    }
}

type SharedListeners = Arc<Mutex<HashMap<String, HashMap<u64, ListenerHandle>>>>;

struct ListenerHandle {
    tx: mpsc::UnboundedSender<RowChangeEvent>,
    worker: JoinHandle<()>,
}

struct OperationHandle {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Fans shared-store change streams out to in-process listeners.
///
/// Cheap to share behind an `Arc`; all state is internal.
pub struct EventSubscriber {
    source: Arc<dyn ChangeEventSource>,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
    listeners: SharedListeners,
    operations: tokio::sync::Mutex<HashMap<String, OperationHandle>>,
    degraded_tx: watch::Sender<bool>,
    next_listener_id: AtomicU64,
}

impl EventSubscriber {
    pub fn new(source: Arc<dyn ChangeEventSource>, retry: RetryPolicy, shutdown: ShutdownSignal) -> Self {
        let (degraded_tx, _) = watch::channel(false);
        Self {
            source,
            retry,
            shutdown,
            listeners: Arc::new(Mutex::new(HashMap::new())),
            operations: tokio::sync::Mutex::new(HashMap::new()),
            degraded_tx,
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Register a named subscription descriptor in the shared store.
    ///
    /// Returns `true` if the descriptor was created, `false` if an
    /// existing one is being reused.
    pub async fn register_event(
        &self,
        name: &str,
        table: &str,
        columns: &[&str],
        recreate: bool,
    ) -> Result<bool, EventError> {
        let created = self
            .source
            .register_event(name, table, columns, recreate)
            .await
            .map_err(|source| EventError::Register {
                name: name.to_string(),
                source,
            })?;
        if created {
            debug!(event = %name, table = %table, "event registered");
        } else {
            debug!(event = %name, table = %table, "event already exists, reusing");
        }
        Ok(created)
    }

    /// Drop a subscription descriptor from the shared store.
    pub async fn unregister_event(&self, name: &str) -> Result<bool, EventError> {
        self.source
            .unregister_event(name)
            .await
            .map_err(|source| EventError::Unregister {
                name: name.to_string(),
                source,
            })
    }

    /// Start the change-stream pump for a registered event. Idempotent:
    /// a second call while the operation is live is a no-op.
    pub async fn create_event_operation(&self, name: &str) -> Result<(), EventError> {
        let mut operations = self.operations.lock().await;
        if operations.contains_key(name) {
            return Ok(());
        }

        let stream = self
            .source
            .open_event_stream(name)
            .await
            .map_err(|source| EventError::OpenStream {
                name: name.to_string(),
                source,
            })?;

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            name.to_string(),
            Arc::clone(&self.source),
            Arc::clone(&self.listeners),
            stream,
            self.retry.clone(),
            cancel.clone(),
            self.degraded_tx.clone(),
            self.shutdown.clone(),
        ));
        operations.insert(name.to_string(), OperationHandle { cancel, pump });
        debug!(event = %name, "event operation started");
        Ok(())
    }

    /// Stop the change-stream pump for an event once no listener needs
    /// it. The pump is shared, so a drop while other listeners remain is
    /// deferred until the last of them leaves.
    pub async fn drop_event_operation(&self, name: &str) {
        let handle = {
            let mut operations = self.operations.lock().await;
            let still_needed = self.listeners.lock().get(name).is_some_and(|handles| !handles.is_empty());
            if still_needed {
                debug!(event = %name, "event operation still has listeners; keeping it");
                return;
            }
            operations.remove(name)
        };
        let Some(handle) = handle else {
            return;
        };
        handle.cancel.cancel();
        if let Err(error) = self.source.close_event_stream(name).await {
            warn!(event = %name, %error, "failed to close change stream");
        }
        handle.pump.abort();
        debug!(event = %name, "event operation stopped");
    }

    /// Register a listener for an event. Deliveries reach the callback in
    /// arrival order on a dedicated worker task.
    pub fn add_listener(&self, name: &str, callback: EventCallback) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = spawn_listener_worker(name.to_string(), id, callback, rx);

        let mut listeners = self.listeners.lock();
        listeners
            .entry(name.to_string())
            .or_default()
            .insert(id, ListenerHandle { tx, worker });
        ListenerId(id)
    }

    /// Remove a listener. When the last listener of an event leaves, the
    /// event operation is dropped as well.
    pub async fn remove_listener(&self, name: &str, listener: ListenerId) -> bool {
        let (removed, now_empty) = {
            let mut listeners = self.listeners.lock();
            let Some(handles) = listeners.get_mut(name) else {
                return false;
            };
            let removed = handles.remove(&listener.0);
            let now_empty = handles.is_empty();
            if now_empty {
                listeners.remove(name);
            }
            (removed, now_empty)
        };

        let Some(handle) = removed else {
            return false;
        };
        // Dropping the sender drains and stops the worker.
        drop(handle.tx);
        let _ = handle.worker;
        if now_empty {
            self.drop_event_operation(name).await;
        }
        true
    }

    /// Whether the pump for an event is currently running.
    pub async fn operation_is_active(&self, name: &str) -> bool {
        self.operations.lock().await.contains_key(name)
    }

    /// Number of listeners registered for an event.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().get(name).map_or(0, HashMap::len)
    }

    /// Watch the degradation signal. `true` means a change stream was
    /// lost and could not be re-established; hosts should fence reads
    /// until it clears.
    pub fn degradation_watch(&self) -> watch::Receiver<bool> {
        self.degraded_tx.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        *self.degraded_tx.borrow()
    }
}

/// Long-lived pump: reads one event's change stream and hands every
/// delivery to the event's listeners. Reconnects on stream loss until
/// the attempt budget runs out.
#[allow(clippy::too_many_arguments)]
async fn run_pump(
    name: String,
    source: Arc<dyn ChangeEventSource>,
    listeners: SharedListeners,
    mut stream: EventStream,
    retry: RetryPolicy,
    cancel: CancellationToken,
    degraded_tx: watch::Sender<bool>,
    shutdown: ShutdownSignal,
) {
    let mut backoff = Backoff::new(retry.initial_backoff);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shutdown.triggered() => break,
            delivery = stream.recv() => match delivery {
                Some(event) => {
                    backoff.reset();
                    dispatch(&listeners, &name, event);
                }
                None => {
                    if cancel.is_cancelled() || shutdown.is_triggered() {
                        break;
                    }
                    if backoff.attempts() >= retry.max_attempts {
                        error!(
                            event = %name,
                            attempts = backoff.attempts(),
                            "change stream lost and not re-established; degrading"
                        );
                        let _ = degraded_tx.send(true);
                        break;
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        event = %name,
                        delay_ms = delay.as_millis() as u64,
                        "change stream closed; reconnecting"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    match source.open_event_stream(&name).await {
                        Ok(reopened) => {
                            stream = reopened;
                            let _ = degraded_tx.send(false);
                        }
                        Err(error) => {
                            warn!(event = %name, %error, "failed to reopen change stream");
                        }
                    }
                }
            }
        }
    }
}

fn dispatch(listeners: &SharedListeners, name: &str, event: RowChangeEvent) {
    let map = listeners.lock();
    let Some(handles) = map.get(name) else {
        return;
    };
    for handle in handles.values() {
        // A closed worker just means the listener is mid-removal.
        let _ = handle.tx.send(event.clone());
    }
}

fn spawn_listener_worker(
    event: String,
    id: u64,
    callback: EventCallback,
    mut rx: mpsc::UnboundedReceiver<RowChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&change)));
            if outcome.is_err() {
                warn!(event = %event, listener = id, "event listener panicked; continuing dispatch");
            }
        }
    })
}
