//! In-process publish/subscribe for client events.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{Event, EventKind};

/// Callback invoked for each published event of the subscribed kind.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies a registered listener for [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registry of listeners keyed by [`EventKind`].
///
/// Handlers run synchronously on the emitting task. A panicking handler is
/// logged and skipped; the emitter and the remaining handlers are unaffected.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one listener, or every listener for `kind` when `id` is `None`.
    /// Returns how many were removed.
    pub fn off(&self, kind: EventKind, id: Option<ListenerId>) -> usize {
        let mut listeners = self.listeners.lock();
        match id {
            None => listeners.remove(&kind).map_or(0, |removed| removed.len()),
            Some(id) => {
                let Some(handlers) = listeners.get_mut(&kind) else {
                    return 0;
                };
                let before = handlers.len();
                handlers.retain(|(existing, _)| *existing != id);
                let removed = before - handlers.len();
                if handlers.is_empty() {
                    let _ = listeners.remove(&kind);
                }
                removed
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        // Snapshot so handlers may call on/off without deadlocking.
        let handlers: Vec<Handler> = match self.listeners.lock().get(&kind) {
            Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(event = kind.as_str(), "Event handler panicked");
            }
        }
    }
}

/// Stream of every event published by a client.
///
/// Events are buffered in a bounded channel; if the consumer falls behind,
/// new events are dropped. Dropping the stream unregisters it.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    bus: Arc<EventBus>,
    listeners: Vec<(EventKind, ListenerId)>,
}

impl EventStream {
    pub(crate) fn new(bus: Arc<EventBus>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Event>(capacity.max(1));
        let listeners = EventKind::ALL
            .iter()
            .map(|&kind| {
                let tx = tx.clone();
                let id = bus.on(kind, move |event| {
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                        tracing::warn!(event = kind.as_str(), "event stream full, dropping event");
                    }
                });
                (kind, id)
            })
            .collect();
        Self { rx, bus, listeners }
    }

    /// Receive the next event.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        for (kind, id) in self.listeners.drain(..) {
            let _ = self.bus.off(kind, Some(id));
        }
    }
}
