//! Session event fan-out.
//!
//! [`EventBus::subscribe`] hands out a [`Subscription`]; dropping it
//! unsubscribes. Emission never blocks: each subscriber has its own
//! unbounded queue.

use crate::error::WalletLinkError;
use crate::session::SessionState;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Events emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletLinkEvent {
    /// The wallet approved the connection
    Connected {
        /// Wallet address
        address: String,
        /// Wallet public key, if sent
        public_key: Option<String>,
    },
    /// The session ended
    Disconnected,
    /// Session state changed
    StateChanged(SessionState),
    /// Something failed (rejection, peer error or transport failure)
    Error(WalletLinkError),
}

type Subscribers = DashMap<u64, mpsc::UnboundedSender<WalletLinkEvent>>;

/// Publish/subscribe hub for [`WalletLinkEvent`]s
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Subscribers>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        Subscription {
            id,
            receiver: rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&self, event: WalletLinkEvent) {
        tracing::debug!("Emitting {:?}", event);
        self.subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Handle to a subscription; unsubscribes on drop
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<WalletLinkEvent>,
    subscribers: Arc<Subscribers>,
}

impl Subscription {
    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<WalletLinkEvent> {
        self.receiver.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<WalletLinkEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}
