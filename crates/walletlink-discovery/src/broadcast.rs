//! Co-located wallet discovery over a broadcast bus.
//!
//! A wallet running in the same runtime listens on [`REQUEST_CHANNEL`] and
//! answers on [`RESPONSE_CHANNEL`]. Requests are JSON objects
//! `{type, id, origin, ...payload}`; responses carry the same `id` and either
//! a result payload or an `error` string.
//!
//! Every call takes its own subscription to the response channel and drops it
//! before returning, so nothing stays subscribed between calls.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use crate::relay::client::short_id;
use walletlink_crypto::random::random_id;
use walletlink_transport::{BroadcastBus, BroadcastSubscription, TransportError};

/// Channel the dApp posts requests on
pub const REQUEST_CHANNEL: &str = "walletlink:dapp-to-wallet";

/// Channel the wallet posts responses on
pub const RESPONSE_CHANNEL: &str = "walletlink:wallet-to-dapp";

/// Default wait for a `PING` answer
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default wait for a request answer
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Probe request type
pub const PING: &str = "PING";

/// Broadcast transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// No broadcast primitive in this runtime
    #[error("broadcast channel unavailable")]
    Unavailable,

    /// No answer within the window
    #[error("broadcast request timed out")]
    Timeout,

    /// The wallet answered with an error
    #[error("{0}")]
    Rejected(String),

    /// The bus went away mid-request
    #[error("broadcast channel closed")]
    Closed,

    /// Could not build the request
    #[error("invalid broadcast request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for BroadcastError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable => BroadcastError::Unavailable,
            _ => BroadcastError::Closed,
        }
    }
}

/// Request/response messaging with a co-located wallet
#[derive(Clone)]
pub struct BroadcastTransport {
    bus: Option<Arc<dyn BroadcastBus>>,
    origin: String,
}

impl BroadcastTransport {
    /// Create a transport. `bus = None` models a runtime without the primitive.
    #[must_use]
    pub fn new(bus: Option<Arc<dyn BroadcastBus>>, origin: impl Into<String>) -> Self {
        Self {
            bus,
            origin: origin.into(),
        }
    }

    /// Whether a broadcast primitive exists at all.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.bus.is_some()
    }

    /// Origin stamped on every request.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Check whether a wallet is listening.
    ///
    /// Posts a `PING` and waits up to `timeout` for an answer with the same id.
    /// `false` on timeout, on any bus failure, or without a bus.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let Some(bus) = &self.bus else {
            return false;
        };
        let Ok(id) = random_id() else {
            return false;
        };
        let Ok(mut subscription) = bus.subscribe(RESPONSE_CHANNEL) else {
            return false;
        };

        let mut ping = Map::new();
        ping.insert("type".to_string(), Value::from(PING));
        ping.insert("id".to_string(), Value::from(id.as_str()));
        ping.insert("origin".to_string(), Value::from(self.origin.as_str()));
        if bus.post(REQUEST_CHANNEL, Value::Object(ping)).is_err() {
            return false;
        }

        let found = tokio::time::timeout(timeout, wait_for_id(&mut subscription, &id))
            .await
            .map(|answer| answer.is_some())
            .unwrap_or(false);
        tracing::debug!("Broadcast probe: wallet {}", if found { "present" } else { "absent" });
        found
    }

    /// Send a request and wait for the matching response.
    ///
    /// `type`, `id` and `origin` are set by the transport and win over
    /// same-named keys in `payload`. The response is returned without its `id`.
    ///
    /// # Errors
    ///
    /// [`BroadcastError::Unavailable`] without a bus, [`BroadcastError::Timeout`]
    /// if nothing answers, [`BroadcastError::Rejected`] when the response
    /// carries an `error`, [`BroadcastError::Closed`] if the bus goes away.
    pub async fn request(
        &self,
        kind: &str,
        payload: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Map<String, Value>, BroadcastError> {
        let bus = self.bus.as_ref().ok_or(BroadcastError::Unavailable)?;
        let id = random_id().map_err(|e| BroadcastError::InvalidRequest(e.to_string()))?;
        let mut subscription = bus.subscribe(RESPONSE_CHANNEL)?;

        let mut message = payload;
        message.insert("type".to_string(), Value::from(kind));
        message.insert("id".to_string(), Value::from(id.as_str()));
        message.insert("origin".to_string(), Value::from(self.origin.as_str()));
        bus.post(REQUEST_CHANNEL, Value::Object(message))?;
        tracing::debug!("Broadcast {} request {}", kind, short_id(&id));

        let mut response = tokio::time::timeout(timeout, wait_for_id(&mut subscription, &id))
            .await
            .map_err(|_| BroadcastError::Timeout)?
            .ok_or(BroadcastError::Closed)?;

        match response.remove("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(message)) => return Err(BroadcastError::Rejected(message)),
            Some(other) => return Err(BroadcastError::Rejected(other.to_string())),
        }
        response.remove("id");
        Ok(response)
    }
}

impl std::fmt::Debug for BroadcastTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastTransport")
            .field("available", &self.is_available())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Wait for the response object whose `id` equals `id`; `None` if the bus closes.
async fn wait_for_id(subscription: &mut BroadcastSubscription, id: &str) -> Option<Map<String, Value>> {
    while let Some(message) = subscription.recv().await {
        if let Value::Object(map) = message {
            if map.get("id").and_then(Value::as_str) == Some(id) {
                return Some(map);
            }
        }
    }
    None
}
