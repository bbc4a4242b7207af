//! Fan-out channel: a registry of listeners keyed by random ids.
//!
//! Subscribing inserts a listener, dropping the returned [`Listener`] removes
//! it, and [`Broadcast::send`] delivers one value to every listener registered
//! at that moment. There is no replay: late listeners only see later values.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

type Registry<T> = DashMap<Uuid, mpsc::UnboundedSender<T>>;

/// Broadcast registry owning the sending half of every listener.
#[derive(Debug)]
pub struct Broadcast<T> {
    listeners: Arc<Registry<T>>,
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Clone> Broadcast<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener.
    #[must_use]
    pub fn subscribe(&self) -> Listener<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.listeners.insert(id, tx);

        Listener {
            id,
            rx,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver `value` to every currently registered listener.
    ///
    /// Returns how many listeners received it.
    pub fn send(&self, value: &T) -> usize {
        // Snapshot first so listeners added or removed during delivery
        // cannot invalidate the iteration.
        let senders: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        senders
            .iter()
            .filter(|tx| tx.send(value.clone()).is_ok())
            .count()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// A registered listener; a [`Stream`] of broadcast values.
///
/// Dropping it unregisters it. The stream ends once the owning [`Broadcast`]
/// is dropped.
#[derive(Debug)]
pub struct Listener<T> {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Listener<T> {
    /// Random id under which this listener is registered.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T> Stream for Listener<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}
