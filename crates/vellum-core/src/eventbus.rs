//! Event bus for the Vellum editor runtime.
//!
//! The event bus is the publish/subscribe primitive every other subsystem
//! reports through. It supports:
//! - Named events carrying a JSON payload
//! - Listener priorities (higher runs first, equal priorities in insertion order)
//! - One-shot listeners
//! - Per-listener interceptors that can skip a single listener
//!
//! Dispatch is strictly sequential: within one [`EventBus::emit`] call each
//! listener is awaited before the next one starts.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Payload carried by every event.
pub type EventData = Value;

/// Identifier handed out for each registered listener.
pub type ListenerId = u64;

type Handler = Arc<dyn Fn(EventData) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type Interceptor = Arc<dyn Fn(EventData) -> BoxFuture<'static, bool> + Send + Sync>;

/// Errors raised while dispatching an event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A listener returned an error; later listeners were not run.
    #[error("Listener for event '{event}' failed: {source}")]
    Listener {
        event: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Options controlling how a listener is registered.
#[derive(Clone, Default)]
pub struct ListenerOptions {
    /// Higher priorities run first. Defaults to 0.
    pub priority: i32,
    /// Remove the listener after its first invocation.
    pub once: bool,
    interceptor: Option<Interceptor>,
}

impl ListenerOptions {
    /// Default options: priority 0, persistent, no interceptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listener priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the listener as one-shot.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Attach an interceptor. When it resolves to `false` the listener is
    /// skipped for that emission; the remaining listeners still run.
    pub fn with_interceptor<F, Fut>(mut self, interceptor: F) -> Self
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.interceptor = Some(Arc::new(move |data| interceptor(data).boxed()));
        self
    }

    /// Whether an interceptor is attached.
    pub fn has_interceptor(&self) -> bool {
        self.interceptor.is_some()
    }
}

impl std::fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("priority", &self.priority)
            .field("once", &self.once)
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

#[derive(Clone)]
struct Listener {
    id: ListenerId,
    handler: Handler,
    priority: i32,
    once: bool,
    interceptor: Option<Interceptor>,
}

#[derive(Default)]
struct Inner {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Remove a single listener. Returns whether it was still registered.
    fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    fn contains(&self, event: &str, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .get(event)
            .map(|list| list.iter().any(|l| l.id == id))
            .unwrap_or(false)
    }
}

/// Handle returned by [`EventBus::on`]. Calling [`Subscription::unsubscribe`]
/// removes the listener; dropping the handle keeps it registered.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<Inner>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    /// The listener id, usable with [`EventBus::off`].
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(&self.event, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.listeners.lock().len())
            .finish()
    }
}

/// Event bus for Vellum.
///
/// Cloning is cheap; all clones share the same listener map.
#[derive(Clone, Default, Debug)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a new, empty event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an event.
    ///
    /// The listener list of the event is re-sorted by descending priority on
    /// every insertion; the sort is stable, so equal priorities keep their
    /// insertion order.
    pub fn on<F, Fut>(
        &self,
        event: impl Into<String>,
        handler: F,
        options: ListenerOptions,
    ) -> Subscription
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event = event.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Listener {
            id,
            handler: Arc::new(move |data| handler(data).boxed()),
            priority: options.priority,
            once: options.once,
            interceptor: options.interceptor,
        };

        {
            let mut listeners = self.inner.listeners.lock();
            let list = listeners.entry(event.clone()).or_default();
            list.push(listener);
            list.sort_by(|a, b| b.priority.cmp(&a.priority));
        }

        tracing::trace!(event = %event, listener = id, "Listener registered");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            event,
            id,
        }
    }

    /// Subscribe to the next occurrence of an event only.
    pub fn once<F, Fut>(
        &self,
        event: impl Into<String>,
        handler: F,
        options: ListenerOptions,
    ) -> Subscription
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on(event, handler, options.once())
    }

    /// Unsubscribe.
    ///
    /// With a listener id only that listener is removed; with `None` every
    /// listener of the event is removed.
    pub fn off(&self, event: &str, listener: Option<ListenerId>) {
        match listener {
            Some(id) => {
                self.inner.remove(event, id);
            }
            None => {
                self.inner.listeners.lock().remove(event);
            }
        }
    }

    /// Emit an event and await every listener in priority order.
    ///
    /// Each listener's interceptor (if any) is awaited first; a `false`
    /// result skips that listener only. One-shot listeners are removed when
    /// they are actually invoked, never when skipped. The first listener
    /// error aborts the emission and is returned.
    pub async fn emit(&self, event: &str, data: EventData) -> Result<(), EventError> {
        let snapshot: Vec<Listener> = match self.inner.listeners.lock().get(event) {
            Some(list) => list.clone(),
            None => return Ok(()),
        };

        for listener in snapshot {
            // Removed by an earlier listener of this same emission.
            if !self.inner.contains(event, listener.id) {
                continue;
            }

            if let Some(interceptor) = &listener.interceptor {
                if !interceptor(data.clone()).await {
                    tracing::trace!(event, listener = listener.id, "Listener skipped by interceptor");
                    continue;
                }
            }

            if listener.once && !self.inner.remove(event, listener.id) {
                continue;
            }

            (listener.handler)(data.clone())
                .await
                .map_err(|source| EventError::Listener {
                    event: event.to_string(),
                    source,
                })?;
        }

        Ok(())
    }

    /// Fire an event without awaiting it.
    ///
    /// The emission is spawned onto the current tokio runtime. Outside a
    /// runtime a temporary current-thread runtime with timers and IO enabled
    /// drives it to completion on the calling thread, so listeners may use
    /// tokio primitives either way. Listener errors are logged, never
    /// propagated.
    pub fn emit_sync(&self, event: impl Into<String>, data: EventData) {
        let bus = self.clone();
        let event = event.into();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = bus.emit(&event, data).await {
                        tracing::error!("Error in event \"{}\": {}", event, e);
                    }
                });
            }
            Err(_) => {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Failed to start runtime for event \"{}\": {}", event, e);
                        return;
                    }
                };
                if let Err(e) = runtime.block_on(bus.emit(&event, data)) {
                    tracing::error!("Error in event \"{}\": {}", event, e);
                }
            }
        }
    }

    /// Emit and await an event, logging listener failures instead of
    /// returning them. Used by the managers for their lifecycle notifications.
    pub(crate) async fn notify(&self, event: &str, data: EventData) {
        if let Err(e) = self.emit(event, data).await {
            tracing::error!("Error in event \"{}\": {}", event, e);
        }
    }

    /// Remove every listener of every event.
    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Number of listeners registered for an event.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether an event has at least one listener.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    /// Names of all events that currently have listeners.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.listeners.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Fn(EventData) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
        let log = log.clone();
        move |_| {
            log.lock().push(tag.to_string());
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_priority_order() {
        let bus = EventBus::new();
        let log = recorder();

        bus.on("x", record(&log, "low"), ListenerOptions::new().with_priority(5));
        bus.on("x", record(&log, "high"), ListenerOptions::new().with_priority(10));

        bus.emit("x", json!(1)).await.unwrap();
        assert_eq!(*log.lock(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_insertion_order() {
        let bus = EventBus::new();
        let log = recorder();

        bus.on("x", record(&log, "a"), ListenerOptions::new());
        bus.on("x", record(&log, "b"), ListenerOptions::new());
        bus.on("x", record(&log, "c"), ListenerOptions::new());

        bus.emit("x", Value::Null).await.unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_once_listener() {
        let bus = EventBus::new();
        let log = recorder();

        bus.once("x", record(&log, "once"), ListenerOptions::new());
        assert_eq!(bus.listener_count("x"), 1);

        bus.emit("x", Value::Null).await.unwrap();
        bus.emit("x", Value::Null).await.unwrap();

        assert_eq!(log.lock().len(), 1);
        assert_eq!(bus.listener_count("x"), 0);
    }

    #[tokio::test]
    async fn test_interceptor_skips_only_its_listener() {
        let bus = EventBus::new();
        let log = recorder();

        bus.on(
            "x",
            record(&log, "guarded"),
            ListenerOptions::new()
                .with_priority(1)
                .once()
                .with_interceptor(|data| async move { data["allow"] == json!(true) }),
        );
        bus.on("x", record(&log, "open"), ListenerOptions::new());

        bus.emit("x", json!({ "allow": false })).await.unwrap();
        assert_eq!(*log.lock(), vec!["open"]);
        // Skipped once-listeners stay registered
        assert_eq!(bus.listener_count("x"), 2);

        bus.emit("x", json!({ "allow": true })).await.unwrap();
        assert_eq!(*log.lock(), vec!["open", "guarded", "open"]);
        assert_eq!(bus.listener_count("x"), 1);
    }

    #[tokio::test]
    async fn test_off_and_unsubscribe() {
        let bus = EventBus::new();
        let log = recorder();

        let sub = bus.on("x", record(&log, "a"), ListenerOptions::new());
        let other = bus.on("x", record(&log, "b"), ListenerOptions::new());

        assert!(sub.unsubscribe());
        bus.emit("x", Value::Null).await.unwrap();
        assert_eq!(*log.lock(), vec!["b"]);

        bus.off("x", Some(other.id()));
        assert!(!bus.has_listeners("x"));

        bus.on("y", record(&log, "c"), ListenerOptions::new());
        bus.on("y", record(&log, "d"), ListenerOptions::new());
        bus.off("y", None);
        assert_eq!(bus.listener_count("y"), 0);
    }

    #[tokio::test]
    async fn test_listener_error_stops_dispatch() {
        let bus = EventBus::new();
        let log = recorder();

        bus.on(
            "x",
            |_| async { Err(anyhow::anyhow!("boom")) },
            ListenerOptions::new().with_priority(10),
        );
        bus.on("x", record(&log, "after"), ListenerOptions::new());

        let err = bus.emit("x", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_emit_without_listeners() {
        let bus = EventBus::new();
        assert!(bus.emit("nothing", Value::Null).await.is_ok());
    }

    #[test]
    fn test_emit_sync_outside_runtime() {
        let bus = EventBus::new();
        let log = recorder();
        bus.on("x", record(&log, "sync"), ListenerOptions::new());

        bus.emit_sync("x", Value::Null);
        assert_eq!(*log.lock(), vec!["sync"]);
    }

    #[test]
    fn test_clear_and_event_names() {
        let bus = EventBus::new();
        let log = recorder();
        bus.on("b", record(&log, "b"), ListenerOptions::new());
        bus.on("a", record(&log, "a"), ListenerOptions::new());

        assert_eq!(bus.event_names(), vec!["a", "b"]);
        bus.clear();
        assert!(bus.event_names().is_empty());
    }
}
