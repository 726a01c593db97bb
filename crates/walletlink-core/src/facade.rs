//! Client facade.
//!
//! [`WalletLink`] owns an ordered list of [`ConnectionStrategy`]s and routes
//! every operation to whichever one produced the active connection.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use walletlink_core::{Connecting, WalletLink, WalletLinkConfig};
//!
//! # async fn example() -> walletlink_core::Result<()> {
//! let client = WalletLink::builder(WalletLinkConfig::default()).build()?;
//!
//! let connection = match client.connect().await? {
//!     Connecting::Connected(connection) => connection,
//!     Connecting::Pairing(pairing) => {
//!         println!("Scan: {}", pairing.pairing_url());
//!         pairing.wait(Duration::from_secs(120)).await?
//!     }
//! };
//! println!("Connected to {}", connection.address);
//!
//! let signed = client.sign_message("hello").await?;
//! println!("{}", signed.signature);
//! client.dispose().await;
//! # Ok(())
//! # }
//! ```

use crate::config::WalletLinkConfig;
use crate::error::{Result, WalletLinkError};
use crate::events::Subscription;
use crate::manager::SessionManager;
use crate::pairing::PairingInfo;
use crate::provider::WalletProvider;
use crate::session::SignatureResponse;
use crate::store::{MemorySessionStore, SessionStore};
use crate::strategy::{
    Attempt, BroadcastStrategy, ConnectionMethod, ConnectionStrategy, InPageStrategy,
    RelayStrategy, WalletConnection,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use walletlink_discovery::BroadcastTransport;
use walletlink_transport::BroadcastBus;

/// Result of [`WalletLink::connect`]
#[derive(Debug)]
pub enum Connecting<'a> {
    /// Connected without pairing
    Connected(WalletConnection),
    /// The wallet must scan or open a pairing link first
    Pairing(PendingPairing<'a>),
}

/// A pairing waiting for the wallet
#[derive(Debug)]
pub struct PendingPairing<'a> {
    client: &'a WalletLink,
    index: usize,
    info: PairingInfo,
}

impl PendingPairing<'_> {
    /// Deep link for the wallet
    #[must_use]
    pub fn pairing_url(&self) -> &str {
        &self.info.pairing_url
    }

    /// Text to encode as the pairing QR code
    #[must_use]
    pub fn qr_data(&self) -> &str {
        &self.info.pairing_url
    }

    /// Session identifier
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    /// Wait up to `timeout` for the wallet to approve.
    ///
    /// # Errors
    ///
    /// Whatever the pairing strategy reports (rejection, timeout, expiry).
    pub async fn wait(self, timeout: Duration) -> Result<WalletConnection> {
        self.wait_until(timeout, &CancellationToken::new()).await
    }

    /// Wait up to `timeout`, or until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Whatever the pairing strategy reports, or [`WalletLinkError::Cancelled`].
    pub async fn wait_until(
        self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WalletConnection> {
        let strategy = self
            .client
            .strategies
            .get(self.index)
            .ok_or(WalletLinkError::invalid_state("pairing strategy is gone"))?;
        let connection = strategy.wait_for_connection(timeout, cancel).await?;
        self.client.set_active(self.index, connection.clone());
        Ok(connection)
    }
}

/// Builder for [`WalletLink`] with the standard strategy order
pub struct WalletLinkBuilder {
    config: WalletLinkConfig,
    provider: Option<Arc<dyn WalletProvider>>,
    bus: Option<Arc<dyn BroadcastBus>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl WalletLinkBuilder {
    /// In-page wallet to try first
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Broadcast bus shared with co-located wallets
    #[must_use]
    pub fn broadcast_bus(mut self, bus: Arc<dyn BroadcastBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Where the relay session is persisted (defaults to memory)
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and assemble the client.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidConfig`] if the configuration is invalid.
    pub fn build(self) -> Result<WalletLink> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let manager = Arc::new(SessionManager::new(self.config.clone(), store));
        let broadcast = BroadcastTransport::new(self.bus, self.config.origin.clone());

        let strategies: Vec<Box<dyn ConnectionStrategy>> = vec![
            Box::new(InPageStrategy::new(self.provider)),
            Box::new(BroadcastStrategy::new(broadcast, &self.config)),
            Box::new(RelayStrategy::new(Arc::clone(&manager))),
        ];
        let mut client = WalletLink::new(strategies);
        client.manager = Some(manager);
        Ok(client)
    }
}

/// Wallet connection client
pub struct WalletLink {
    strategies: Vec<Box<dyn ConnectionStrategy>>,
    active: Mutex<Option<(usize, WalletConnection)>>,
    manager: Option<Arc<SessionManager>>,
}

impl WalletLink {
    /// Builder with in-page, broadcast and relay strategies
    #[must_use]
    pub fn builder(config: WalletLinkConfig) -> WalletLinkBuilder {
        WalletLinkBuilder {
            config,
            provider: None,
            bus: None,
            store: None,
        }
    }

    /// Client over a custom strategy list, tried in order
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn ConnectionStrategy>>) -> Self {
        Self {
            strategies,
            active: Mutex::new(None),
            manager: None,
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<(usize, WalletConnection)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Active connection, forgotten first if its strategy lost it
    fn live(&self) -> MutexGuard<'_, Option<(usize, WalletConnection)>> {
        let mut active = self.active();
        let dead = active.as_ref().is_some_and(|(index, _)| {
            !self
                .strategies
                .get(*index)
                .is_some_and(|strategy| strategy.is_connected())
        });
        if dead {
            if let Some((_, connection)) = active.take() {
                tracing::info!(
                    "Wallet {} no longer connected via {}",
                    connection.address,
                    connection.method
                );
            }
        }
        active
    }

    fn set_active(&self, index: usize, connection: WalletConnection) {
        tracing::info!(
            "Wallet {} connected via {}",
            connection.address,
            connection.method
        );
        *self.active() = Some((index, connection));
    }

    fn active_strategy(&self) -> Result<&dyn ConnectionStrategy> {
        let index = self
            .live()
            .as_ref()
            .map(|(index, _)| *index)
            .ok_or(WalletLinkError::NotConnected)?;
        self.strategies
            .get(index)
            .map(AsRef::as_ref)
            .ok_or(WalletLinkError::NotConnected)
    }

    /// Connect through the first strategy that can reach a wallet.
    ///
    /// Strategies whose probe fails or that report
    /// [`WalletLinkError::NotAvailable`] are skipped. Returns the existing
    /// connection if it is still alive; one ended by the wallet or by session
    /// expiry is forgotten and the strategies are tried again.
    ///
    /// # Errors
    ///
    /// The first non-discovery error, or [`WalletLinkError::NotAvailable`]
    /// when no strategy can reach a wallet.
    pub async fn connect(&self) -> Result<Connecting<'_>> {
        if let Some(connection) = self.connection() {
            return Ok(Connecting::Connected(connection));
        }

        let mut last_miss = None;
        for (index, strategy) in self.strategies.iter().enumerate() {
            if !strategy.probe().await {
                tracing::debug!("Skipping {}: probe negative", strategy.name());
                continue;
            }
            match strategy.attempt().await {
                Ok(Attempt::Connected(connection)) => {
                    self.set_active(index, connection.clone());
                    return Ok(Connecting::Connected(connection));
                }
                Ok(Attempt::Pairing(info)) => {
                    tracing::info!("Pairing via {}", strategy.name());
                    return Ok(Connecting::Pairing(PendingPairing {
                        client: self,
                        index,
                        info,
                    }));
                }
                Err(e) if e.is_discovery_failure() => {
                    tracing::debug!("Skipping {}: {}", strategy.name(), e);
                    last_miss = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_miss.unwrap_or(WalletLinkError::not_available(
            "no wallet connection method available",
        )))
    }

    /// Active connection, if any
    #[must_use]
    pub fn connection(&self) -> Option<WalletConnection> {
        self.live().as_ref().map(|(_, c)| c.clone())
    }

    /// Method of the active connection
    #[must_use]
    pub fn method(&self) -> Option<ConnectionMethod> {
        self.live().as_ref().map(|(_, c)| c.method)
    }

    /// Whether a wallet is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.live().is_some()
    }

    /// Relay session manager, when built with [`WalletLink::builder`]
    #[must_use]
    pub fn session_manager(&self) -> Option<&Arc<SessionManager>> {
        self.manager.as_ref()
    }

    /// Relay session events, when built with [`WalletLink::builder`]
    #[must_use]
    pub fn subscribe(&self) -> Option<Subscription> {
        self.manager.as_ref().map(|m| m.subscribe())
    }

    /// Ask the connected wallet to sign `message`.
    ///
    /// # Errors
    ///
    /// [`WalletLinkError::NotConnected`] without a connection; otherwise the
    /// active strategy's error.
    pub async fn sign_message(&self, message: &str) -> Result<SignatureResponse> {
        self.active_strategy()?.sign_message(message).await
    }

    /// Ask the connected wallet to sign and submit `tx`; returns its hash.
    ///
    /// # Errors
    ///
    /// [`WalletLinkError::NotConnected`] without a connection;
    /// [`WalletLinkError::NotAvailable`] over the relay.
    pub async fn send_transaction(&self, tx: &Value) -> Result<String> {
        self.active_strategy()?.send_transaction(tx).await
    }

    /// End the active connection.
    ///
    /// # Errors
    ///
    /// [`WalletLinkError::NotConnected`] without a connection; the
    /// connection is forgotten even if the strategy fails.
    pub async fn disconnect(&self) -> Result<()> {
        let strategy = self.active_strategy()?;
        *self.active() = None;
        strategy.disconnect().await
    }

    /// Disconnect and release every strategy.
    pub async fn dispose(self) {
        if self.is_connected() {
            if let Err(e) = self.disconnect().await {
                tracing::debug!("Disconnect during dispose failed: {}", e);
            }
        }
        for strategy in &self.strategies {
            strategy.dispose().await;
        }
    }
}

impl std::fmt::Debug for WalletLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("WalletLink")
            .field("strategies", &names)
            .field("connection", &self.connection())
            .finish()
    }
}
