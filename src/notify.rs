use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 256;

type Registry<T> = DashMap<u64, mpsc::Sender<T>>;

/// Fan-out hub with explicit subscriptions.
///
/// Each subscriber owns a [`Subscription`]; dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the subscriber before the next send.
pub struct NotifyHub<T> {
    next_id: AtomicU64,
    subscribers: Arc<Registry<T>>,
}

impl<T: Clone> Default for NotifyHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> NotifyHub<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers.insert(id, tx);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver to every subscriber. No-op if nobody is listening.
    /// A subscriber whose queue is full misses this message.
    pub fn send(&self, message: &T) {
        self.subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(subscriber = *id, "notification dropped: subscriber lagging");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving end of a [`NotifyHub`] subscription.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Subscription<T> {
    /// Wait for the next message. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
