//! Named-channel broadcast messaging.
//!
//! A [`BroadcastBus`] carries JSON messages between peers that share a
//! runtime (a dApp and a wallet in the same browser profile, or in the same
//! process). Every subscriber of a channel receives every message posted to
//! it after the subscription was taken. Dropping a [`BroadcastSubscription`]
//! releases it.

use crate::transport::{TransportError, TransportResult};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Per-channel buffer. A subscriber that falls further behind skips ahead.
const CHANNEL_CAPACITY: usize = 64;

/// Publish/subscribe primitive keyed by channel name.
pub trait BroadcastBus: Send + Sync {
    /// Post a message to every current subscriber of `channel`.
    ///
    /// Posting to a channel with no subscribers is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the bus has been shut down.
    fn post(&self, channel: &str, message: Value) -> TransportResult<()>;

    /// Subscribe to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the bus has been shut down.
    fn subscribe(&self, channel: &str) -> TransportResult<BroadcastSubscription>;

    /// Number of live subscriptions on `channel`.
    fn subscriber_count(&self, channel: &str) -> usize;
}

/// A live subscription to one broadcast channel.
#[derive(Debug)]
pub struct BroadcastSubscription {
    channel: String,
    receiver: broadcast::Receiver<Value>,
}

impl BroadcastSubscription {
    /// Channel this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Broadcast subscriber on {} lagged, skipped {} messages",
                        self.channel,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process [`BroadcastBus`].
///
/// Cloning the `Arc` that holds it is how co-located peers share one bus.
#[derive(Debug, Default)]
pub struct LocalBroadcastBus {
    channels: DashMap<String, broadcast::Sender<Value>>,
    closed: std::sync::atomic::AtomicBool,
}

impl LocalBroadcastBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shut the bus down. Pending `recv` calls return `None`.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.channels.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Value> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl BroadcastBus for LocalBroadcastBus {
    fn post(&self, channel: &str, message: Value) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(sender) = self.channels.get(channel).map(|s| s.clone()) else {
            tracing::trace!("Broadcast on {} with no subscribers", channel);
            return Ok(());
        };
        // Err only means nobody is listening right now
        let _ = sender.send(message);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> TransportResult<BroadcastSubscription> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(BroadcastSubscription {
            channel: channel.to_string(),
            receiver: self.sender(channel).subscribe(),
        })
    }

    fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }
}
