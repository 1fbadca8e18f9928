//! Status/event channel.
//!
//! A passive fan-out of sync progress and gateway lifecycle events to any
//! number of listeners. Listeners run synchronously on the emitting task and
//! should hand heavy work off (for example with `tokio::spawn`).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;

use crate::models::OperationId;
use crate::sync::SyncResult;

/// Everything observers can be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    /// A gateway version finished installing and pre-caching
    GatewayInstalled { version: String },
    /// An installed version waits for the active one to step aside
    UpdateAvailable { version: String },
    GatewayActivated { version: String },
    GatewayRedundant { version: String },
    /// A mutation was queued at the network boundary while offline
    #[serde(rename_all = "camelCase")]
    OperationQueued {
        operation_id: OperationId,
        table: String,
    },
    /// Someone asked for the queue to be drained
    SyncRequested { tag: String },
    #[serde(rename_all = "camelCase")]
    SyncStarted { user_id: String },
    #[serde(rename_all = "camelCase")]
    SyncFinished { user_id: String, result: SyncResult },
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl Registry {
    fn remove(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Cloneable handle to a shared set of listeners.
#[derive(Clone, Default)]
pub struct EventChannel {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EventChannel")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays attached until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    #[must_use = "dropping the subscription detaches the listener"]
    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to every listener attached right now.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub fn emit(&self, event: &Event) {
        let listeners: Vec<Listener> = self
            .registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!("Event listener panicked while handling {event:?}");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Keeps a listener attached; dropping it detaches the listener.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener attached for as long as the channel lives.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
