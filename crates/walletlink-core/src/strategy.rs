//! Connection strategies.
//!
//! Each way of reaching a wallet implements [`ConnectionStrategy`]. The
//! facade tries them in priority order:
//!
//! 1. [`InPageStrategy`] - a [`WalletProvider`] in this process
//! 2. [`BroadcastStrategy`] - a co-located wallet on the broadcast bus
//! 3. [`RelayStrategy`] - a remote wallet paired through the relay

use crate::config::WalletLinkConfig;
use crate::error::{Result, WalletLinkError};
use crate::manager::SessionManager;
use crate::pairing::PairingInfo;
use crate::provider::WalletProvider;
use crate::session::{SessionState, SignatureResponse, WalletIdentity};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use walletlink_discovery::BroadcastTransport;

/// Broadcast request asking the wallet to connect
pub const BROADCAST_CONNECT: &str = "CONNECT";

/// Broadcast request asking the wallet to sign a message
pub const BROADCAST_SIGN_MESSAGE: &str = "SIGN_MESSAGE";

/// Broadcast request asking the wallet to sign and submit a transaction
pub const BROADCAST_SIGN_AND_SEND: &str = "SIGN_AND_SEND";

/// Broadcast notice that the dApp is disconnecting
pub const BROADCAST_DISCONNECT: &str = "DISCONNECT";

/// How a connection was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMethod {
    /// In-process wallet provider
    InPage,
    /// Co-located wallet over the broadcast bus
    Broadcast,
    /// Remote wallet through the relay
    Relay,
}

impl ConnectionMethod {
    /// Short name used in logs and the CLI
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InPage => "in-page",
            Self::Broadcast => "broadcast",
            Self::Relay => "relay",
        }
    }
}

impl std::fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An established wallet connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConnection {
    /// Wallet address
    pub address: String,
    /// Wallet public key, if disclosed
    pub public_key: Option<String>,
    /// Strategy that produced the connection
    pub method: ConnectionMethod,
}

/// Outcome of [`ConnectionStrategy::attempt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The wallet approved right away
    Connected(WalletConnection),
    /// The wallet must be paired out-of-band first
    Pairing(PairingInfo),
}

/// A way of reaching a wallet
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    /// Which method this is
    fn method(&self) -> ConnectionMethod;

    /// Name used in logs
    fn name(&self) -> &'static str {
        self.method().as_str()
    }

    /// Whether a wallet looks reachable this way. Never fails.
    async fn probe(&self) -> bool;

    /// Try to connect.
    ///
    /// # Errors
    ///
    /// [`WalletLinkError::NotAvailable`] means "try the next strategy"; any
    /// other error is final.
    async fn attempt(&self) -> Result<Attempt>;

    /// Wait for an out-of-band pairing started by [`ConnectionStrategy::attempt`].
    ///
    /// # Errors
    ///
    /// [`WalletLinkError::NotAvailable`] for strategies that never pair.
    async fn wait_for_connection(
        &self,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<WalletConnection> {
        Err(WalletLinkError::not_available("strategy does not pair"))
    }

    /// Whether the connection this strategy produced is still alive.
    ///
    /// Turns `false` when the wallet or the session ends it from the other side.
    fn is_connected(&self) -> bool;

    /// Ask the connected wallet to sign `message`.
    async fn sign_message(&self, message: &str) -> Result<SignatureResponse>;

    /// Ask the connected wallet to sign and submit `tx`; returns its hash.
    async fn send_transaction(&self, tx: &Value) -> Result<String>;

    /// End the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Release everything, connected or not.
    async fn dispose(&self) {}
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// In-page
// ============================================================================

/// Strategy for an in-process [`WalletProvider`]
pub struct InPageStrategy {
    provider: Option<Arc<dyn WalletProvider>>,
    address: Mutex<Option<String>>,
}

impl InPageStrategy {
    /// Wrap `provider`; `None` means no in-page wallet is installed.
    #[must_use]
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        Self {
            provider,
            address: Mutex::new(None),
        }
    }

    fn connected_provider(&self) -> Result<&Arc<dyn WalletProvider>> {
        if lock(&self.address).is_none() {
            return Err(WalletLinkError::NotConnected);
        }
        self.provider.as_ref().ok_or(WalletLinkError::NotConnected)
    }
}

#[async_trait]
impl ConnectionStrategy for InPageStrategy {
    fn method(&self) -> ConnectionMethod {
        ConnectionMethod::InPage
    }

    async fn probe(&self) -> bool {
        self.provider.is_some()
    }

    async fn attempt(&self) -> Result<Attempt> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(WalletLinkError::not_available("no in-page wallet"))?;
        let identity = provider.connect().await?;
        *lock(&self.address) = Some(identity.address.clone());
        tracing::info!("In-page wallet connected: {}", identity.address);
        Ok(Attempt::Connected(WalletConnection {
            address: identity.address,
            public_key: identity.public_key,
            method: ConnectionMethod::InPage,
        }))
    }

    fn is_connected(&self) -> bool {
        lock(&self.address).is_some()
    }

    async fn sign_message(&self, message: &str) -> Result<SignatureResponse> {
        self.connected_provider()?
            .sign_message(message.as_bytes())
            .await
    }

    async fn send_transaction(&self, tx: &Value) -> Result<String> {
        self.connected_provider()?.send_transaction(tx).await
    }

    async fn disconnect(&self) -> Result<()> {
        let was_connected = lock(&self.address).take().is_some();
        match &self.provider {
            Some(provider) if was_connected => provider.disconnect().await,
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for InPageStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InPageStrategy")
            .field("installed", &self.provider.is_some())
            .field("address", &*lock(&self.address))
            .finish()
    }
}

// ============================================================================
// Broadcast
// ============================================================================

/// Strategy for a wallet on the same broadcast bus
#[derive(Debug)]
pub struct BroadcastStrategy {
    transport: BroadcastTransport,
    app_name: String,
    probe_timeout: Duration,
    request_timeout: Duration,
    wallet: Mutex<Option<WalletIdentity>>,
}

impl BroadcastStrategy {
    /// Strategy over `transport` using the timeouts and app name from `config`.
    #[must_use]
    pub fn new(transport: BroadcastTransport, config: &WalletLinkConfig) -> Self {
        Self {
            transport,
            app_name: config.app_name.clone(),
            probe_timeout: config.probe_timeout,
            request_timeout: config.broadcast_timeout,
            wallet: Mutex::new(None),
        }
    }

    async fn request(&self, kind: &str, payload: Map<String, Value>) -> Result<Map<String, Value>> {
        Ok(self
            .transport
            .request(kind, payload, self.request_timeout)
            .await?)
    }

    fn connected_wallet(&self) -> Result<WalletIdentity> {
        lock(&self.wallet).clone().ok_or(WalletLinkError::NotConnected)
    }
}

/// Required string field of a broadcast response
fn required_str(response: &Map<String, Value>, key: &str) -> Result<String> {
    response
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| WalletLinkError::PeerError(format!("response is missing {key}")))
}

fn optional_str(response: &Map<String, Value>, key: &str) -> Option<String> {
    response.get(key).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl ConnectionStrategy for BroadcastStrategy {
    fn method(&self) -> ConnectionMethod {
        ConnectionMethod::Broadcast
    }

    async fn probe(&self) -> bool {
        self.transport.probe(self.probe_timeout).await
    }

    async fn attempt(&self) -> Result<Attempt> {
        if !self.transport.is_available() {
            return Err(WalletLinkError::not_available("no broadcast channel"));
        }
        let mut payload = Map::new();
        payload.insert("appName".to_string(), Value::from(self.app_name.as_str()));

        let response = self.request(BROADCAST_CONNECT, payload).await?;
        let identity = WalletIdentity {
            address: required_str(&response, "address")?,
            public_key: optional_str(&response, "publicKey"),
        };
        *lock(&self.wallet) = Some(identity.clone());
        tracing::info!("Co-located wallet connected: {}", identity.address);

        Ok(Attempt::Connected(WalletConnection {
            address: identity.address,
            public_key: identity.public_key,
            method: ConnectionMethod::Broadcast,
        }))
    }

    fn is_connected(&self) -> bool {
        lock(&self.wallet).is_some()
    }

    async fn sign_message(&self, message: &str) -> Result<SignatureResponse> {
        let wallet = self.connected_wallet()?;
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::from(message));

        let response = self.request(BROADCAST_SIGN_MESSAGE, payload).await?;
        Ok(SignatureResponse {
            signature: required_str(&response, "signature")?,
            // Falls back to the key disclosed on connect
            public_key: optional_str(&response, "publicKey")
                .or(wallet.public_key)
                .unwrap_or_default(),
        })
    }

    async fn send_transaction(&self, tx: &Value) -> Result<String> {
        self.connected_wallet()?;
        let mut payload = Map::new();
        payload.insert("tx".to_string(), tx.clone());

        let response = self.request(BROADCAST_SIGN_AND_SEND, payload).await?;
        required_str(&response, "hash").or_else(|_| required_str(&response, "txHash"))
    }

    async fn disconnect(&self) -> Result<()> {
        if lock(&self.wallet).take().is_none() {
            return Ok(());
        }
        // Best effort: the wallet may already be gone
        if let Err(e) = self
            .transport
            .request(BROADCAST_DISCONNECT, Map::new(), self.probe_timeout)
            .await
        {
            tracing::debug!("Broadcast disconnect not acknowledged: {}", e);
        }
        Ok(())
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Strategy for a remote wallet paired through the relay
#[derive(Debug)]
pub struct RelayStrategy {
    manager: Arc<SessionManager>,
}

impl RelayStrategy {
    /// Strategy driving `manager`
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Underlying session manager
    #[must_use]
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    fn connection(&self, address: String) -> WalletConnection {
        WalletConnection {
            address,
            public_key: self.manager.public_key(),
            method: ConnectionMethod::Relay,
        }
    }
}

#[async_trait]
impl ConnectionStrategy for RelayStrategy {
    fn method(&self) -> ConnectionMethod {
        ConnectionMethod::Relay
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn attempt(&self) -> Result<Attempt> {
        if self.manager.restore_session().await {
            match self.manager.state() {
                SessionState::Connected => {
                    self.manager.reconnect().await?;
                    if let Some(address) = self.manager.address() {
                        return Ok(Attempt::Connected(self.connection(address)));
                    }
                }
                SessionState::Waiting => {
                    if let Some(info) = self.manager.pairing_info() {
                        return Ok(Attempt::Pairing(info));
                    }
                }
                _ => {}
            }
        }
        if self.manager.state() == SessionState::Error {
            // A declined or timed-out pairing is cleared before starting over
            self.manager.disconnect().await;
        }
        Ok(Attempt::Pairing(self.manager.generate_session().await?))
    }

    async fn wait_for_connection(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WalletConnection> {
        let address = self
            .manager
            .wait_for_connection_until(timeout, cancel)
            .await?;
        Ok(self.connection(address))
    }

    fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    async fn sign_message(&self, message: &str) -> Result<SignatureResponse> {
        self.manager.sign_message(message).await
    }

    async fn send_transaction(&self, _tx: &Value) -> Result<String> {
        Err(WalletLinkError::not_available(
            "transactions are not supported over the relay",
        ))
    }

    async fn disconnect(&self) -> Result<()> {
        self.manager.disconnect().await;
        Ok(())
    }

    async fn dispose(&self) {
        if self.manager.session_id().is_some() {
            self.manager.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use serde_json::json;
    use walletlink_discovery::broadcast::{REQUEST_CHANNEL, RESPONSE_CHANNEL};
    use walletlink_transport::{BroadcastBus, LocalBroadcastBus};

    /// Co-located wallet answering every request with `reply(request)`
    fn spawn_wallet(
        bus: &Arc<LocalBroadcastBus>,
        reply: impl Fn(&Map<String, Value>) -> Value + Send + 'static,
    ) {
        let mut requests = bus.subscribe(REQUEST_CHANNEL).unwrap();
        let bus = Arc::clone(bus);
        tokio::spawn(async move {
            while let Some(Value::Object(request)) = requests.recv().await {
                let mut answer = reply(&request);
                if let Value::Object(map) = &mut answer {
                    map.insert("id".to_string(), request["id"].clone());
                }
                let _ = bus.post(RESPONSE_CHANNEL, answer);
            }
        });
    }

    fn broadcast_strategy(bus: &Arc<LocalBroadcastBus>) -> BroadcastStrategy {
        let config = WalletLinkConfig {
            probe_timeout: Duration::from_millis(100),
            broadcast_timeout: Duration::from_secs(2),
            ..WalletLinkConfig::default()
        };
        let bus: Arc<dyn BroadcastBus> = bus.clone();
        BroadcastStrategy::new(BroadcastTransport::new(Some(bus), "https://hodl.example"), &config)
    }

    #[tokio::test]
    async fn test_in_page_without_provider() {
        let strategy = InPageStrategy::new(None);
        assert!(!strategy.probe().await);
        let err = strategy.attempt().await.unwrap_err();
        assert!(err.is_discovery_failure());
        assert_eq!(strategy.sign_message("x").await, Err(WalletLinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_broadcast_connect_and_sign() {
        let bus = Arc::new(LocalBroadcastBus::new());
        spawn_wallet(&bus, |request| match request["type"].as_str() {
            Some("PING") => json!({}),
            Some("CONNECT") => {
                assert_eq!(request["appName"], "HODL Holdings");
                json!({"address": "sultan1near", "publicKey": "pk"})
            }
            Some("SIGN_MESSAGE") => {
                json!({"signature": format!("sig:{}", request["message"].as_str().unwrap()), "publicKey": "pk"})
            }
            Some("SIGN_AND_SEND") => json!({"hash": "0xabc"}),
            _ => json!({}),
        });
        let strategy = broadcast_strategy(&bus);

        assert!(strategy.probe().await);
        assert_eq!(strategy.sign_message("early").await, Err(WalletLinkError::NotConnected));

        let Attempt::Connected(connection) = strategy.attempt().await.unwrap() else {
            panic!("expected a direct connection");
        };
        assert_eq!(connection.address, "sultan1near");
        assert_eq!(connection.public_key.as_deref(), Some("pk"));
        assert_eq!(connection.method, ConnectionMethod::Broadcast);
        assert!(strategy.is_connected());

        let signed = strategy.sign_message("hi").await.unwrap();
        assert_eq!(signed.signature, "sig:hi");
        assert_eq!(strategy.send_transaction(&json!({"amount": 1})).await.unwrap(), "0xabc");

        strategy.disconnect().await.unwrap();
        assert!(!strategy.is_connected());
        assert_eq!(strategy.sign_message("late").await, Err(WalletLinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_broadcast_signature_falls_back_to_connect_key() {
        let bus = Arc::new(LocalBroadcastBus::new());
        spawn_wallet(&bus, |request| match request["type"].as_str() {
            Some("CONNECT") => json!({"address": "sultan1near", "publicKey": "pk-connect"}),
            Some("SIGN_MESSAGE") => json!({"signature": "sig"}),
            _ => json!({}),
        });
        let strategy = broadcast_strategy(&bus);
        strategy.attempt().await.unwrap();

        let signed = strategy.sign_message("hi").await.unwrap();
        assert_eq!(signed.signature, "sig");
        assert_eq!(signed.public_key, "pk-connect");
    }

    #[tokio::test]
    async fn test_broadcast_rejection_surfaces() {
        let bus = Arc::new(LocalBroadcastBus::new());
        spawn_wallet(&bus, |_| json!({"error": "User rejected"}));
        let strategy = broadcast_strategy(&bus);

        let err = strategy.attempt().await.unwrap_err();
        assert_eq!(err, WalletLinkError::UserRejected("User rejected".to_string()));
        assert!(!err.is_discovery_failure());
    }

    #[tokio::test]
    async fn test_broadcast_missing_address() {
        let bus = Arc::new(LocalBroadcastBus::new());
        spawn_wallet(&bus, |_| json!({"publicKey": "pk"}));
        let strategy = broadcast_strategy(&bus);
        assert!(matches!(strategy.attempt().await, Err(WalletLinkError::PeerError(_))));
    }

    #[tokio::test]
    async fn test_broadcast_without_bus() {
        let strategy = BroadcastStrategy::new(
            BroadcastTransport::new(None, "o"),
            &WalletLinkConfig::default(),
        );
        assert!(!strategy.probe().await);
        assert!(strategy.attempt().await.unwrap_err().is_discovery_failure());
    }

    #[tokio::test]
    async fn test_relay_send_transaction_not_available() {
        let manager = SessionManager::new(
            WalletLinkConfig::default(),
            Arc::new(MemorySessionStore::new()),
        );
        let strategy = RelayStrategy::new(Arc::new(manager));
        assert!(!strategy.is_connected());
        let err = strategy.send_transaction(&json!({})).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotAvailable);
        assert_eq!(strategy.sign_message("x").await, Err(WalletLinkError::NotConnected));
    }

    #[test]
    fn test_method_names() {
        assert_eq!(ConnectionMethod::InPage.to_string(), "in-page");
        assert_eq!(ConnectionMethod::Broadcast.as_str(), "broadcast");
        assert_eq!(ConnectionMethod::Relay.as_str(), "relay");
    }
}
