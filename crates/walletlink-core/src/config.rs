//! WalletLink configuration

use crate::error::{Result, WalletLinkError};
use std::time::Duration;
use walletlink_discovery::relay::{
    DEFAULT_RELAY_URL, RELAY_CONNECT_TIMEOUT, RELAY_HEARTBEAT_INTERVAL, RelayClientConfig,
};

/// Wallet web app that opens pairing links
pub const DEFAULT_WALLET_URL: &str = "https://wallet.sltn.io";

/// Scheme and host of the inner pairing string
pub const DEFAULT_DEEP_LINK_SCHEME: &str = "sultan://wl";

/// Application name shown to the user in the wallet
pub const DEFAULT_APP_NAME: &str = "HODL Holdings";

/// Origin reported when the caller does not set one
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Session lifetime (10 minutes)
pub const SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// Default wait for the wallet to approve a pairing (2 minutes)
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default wait for a signature (2 minutes)
pub const DEFAULT_SIGN_TIMEOUT: Duration = Duration::from_secs(120);

/// WalletLink client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletLinkConfig {
    /// Relay base URL (`ws://` or `wss://`)
    pub relay_url: String,

    /// Wallet web app base URL (`http://` or `https://`)
    pub wallet_url: String,

    /// Scheme and host of the inner pairing string
    pub deep_link_scheme: String,

    /// Application name shown in the wallet
    pub app_name: String,

    /// Origin of this dApp
    pub origin: String,

    /// Session lifetime
    pub session_ttl: Duration,

    /// Default pairing wait
    pub connection_timeout: Duration,

    /// Per-request signature wait
    pub sign_timeout: Duration,

    /// Relay socket open timeout
    pub relay_connect_timeout: Duration,

    /// Relay heartbeat period
    pub heartbeat_interval: Duration,

    /// Wait for a co-located wallet to answer a probe
    pub probe_timeout: Duration,

    /// Wait for a co-located wallet to answer a request
    pub broadcast_timeout: Duration,
}

impl Default for WalletLinkConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            wallet_url: DEFAULT_WALLET_URL.to_string(),
            deep_link_scheme: DEFAULT_DEEP_LINK_SCHEME.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            session_ttl: SESSION_TTL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            sign_timeout: DEFAULT_SIGN_TIMEOUT,
            relay_connect_timeout: RELAY_CONNECT_TIMEOUT,
            heartbeat_interval: RELAY_HEARTBEAT_INTERVAL,
            probe_timeout: walletlink_discovery::broadcast::DEFAULT_PROBE_TIMEOUT,
            broadcast_timeout: walletlink_discovery::broadcast::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl WalletLinkConfig {
    /// Default configuration pointed at another relay.
    #[must_use]
    pub fn with_relay(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }

    /// Check URLs, names and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        check_url(&self.relay_url, &["ws", "wss"], "relay_url")?;
        check_url(&self.wallet_url, &["http", "https"], "wallet_url")?;

        let scheme_ok = url::Url::parse(&self.deep_link_scheme)
            .map(|u| u.query().is_none() && u.fragment().is_none())
            .unwrap_or(false);
        if !scheme_ok {
            return Err(WalletLinkError::invalid_config(
                "deep_link_scheme must be a bare scheme://host",
            ));
        }

        if self.app_name.trim().is_empty() {
            return Err(WalletLinkError::invalid_config("app_name is empty"));
        }
        if self.origin.trim().is_empty() {
            return Err(WalletLinkError::invalid_config("origin is empty"));
        }

        let timeouts = [
            (self.session_ttl, "session_ttl must be non-zero"),
            (self.connection_timeout, "connection_timeout must be non-zero"),
            (self.sign_timeout, "sign_timeout must be non-zero"),
            (self.relay_connect_timeout, "relay_connect_timeout must be non-zero"),
            (self.heartbeat_interval, "heartbeat_interval must be non-zero"),
            (self.probe_timeout, "probe_timeout must be non-zero"),
            (self.broadcast_timeout, "broadcast_timeout must be non-zero"),
        ];
        for (value, message) in timeouts {
            if value.is_zero() {
                return Err(WalletLinkError::invalid_config(message));
            }
        }

        Ok(())
    }

    /// Relay client settings derived from this configuration.
    #[must_use]
    pub fn relay_client_config(&self) -> RelayClientConfig {
        RelayClientConfig {
            relay_url: self.relay_url.clone(),
            connect_timeout: self.relay_connect_timeout,
            heartbeat_interval: self.heartbeat_interval,
            ..RelayClientConfig::default()
        }
    }
}

fn check_url(value: &str, schemes: &[&str], field: &'static str) -> Result<()> {
    let parsed = url::Url::parse(value).map_err(|e| {
        WalletLinkError::InvalidConfig(format!("{field}: {e}").into())
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(WalletLinkError::InvalidConfig(
            format!("{field}: unsupported scheme {:?}", parsed.scheme()).into(),
        ));
    }
    Ok(())
}
