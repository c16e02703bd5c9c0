//! Event infrastructure for observing a document session.
//!
//! A [`DocumentSession`](crate::session::DocumentSession) emits
//! [`SessionEvent`]s through an [`EventBus`] so the embedding view layer can
//! mirror sync activity (the "Saving… / Saved at …" affordances) without
//! polling. Subscriptions follow the disposer pattern: hold the returned
//! [`Subscription`] to keep receiving events, drop it to unsubscribe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted while a session is open.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A remote change passed the session's filters and replaced the
    /// visible tree.
    RemoteApplied {
        #[serde(rename = "updatedAt")]
        updated_at: DateTime<Utc>,
    },
    /// A debounced save was written and acknowledged.
    Saved {
        #[serde(rename = "updatedAt")]
        updated_at: DateTime<Utc>,
    },
    /// A debounced save failed; the session will retry only on a new edit.
    SaveFailed { message: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus publishing session events to subscribers.
///
/// Thread-safe: callbacks may be invoked from the session's background
/// tasks. Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(SessionEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a [`Subscription`] that unsubscribes on
    /// drop. Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during panic unwinding while a read lock
        // is held by emit.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SessionEvent) {
        // Snapshot the callback list so a callback may subscribe without
        // deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn saved_event() -> SessionEvent {
        SessionEvent::Saved {
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(saved_event());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(saved_event());
        }

        bus.emit(saved_event());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let _sub1 = bus.subscribe(move |_| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(saved_event());
        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::SaveFailed {
            message: "permission denied".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"saveFailed\""));
        assert!(json.contains("\"message\":\"permission denied\""));
    }
}
