//! Configuration system for the WalletLink CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walletlink_core::WalletLinkConfig;
use walletlink_core::config::{
    DEFAULT_APP_NAME, DEFAULT_DEEP_LINK_SCHEME, DEFAULT_ORIGIN, DEFAULT_WALLET_URL,
};
use walletlink_discovery::relay::{DEFAULT_RELAY_URL, RelayServerConfig};

/// WalletLink CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Pairing configuration
    #[serde(default)]
    pub link: LinkConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Session persistence
    #[serde(default)]
    pub session: SessionConfig,
    /// Relay server (for `walletlink relay`)
    #[serde(default)]
    pub relay: RelayConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pairing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Relay WebSocket URL
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Wallet web app hosting the pairing page
    #[serde(default = "default_wallet_url")]
    pub wallet_url: String,
    /// Scheme of the inner pairing string
    #[serde(default = "default_deep_link_scheme")]
    pub deep_link_scheme: String,
    /// Name shown to the wallet user
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Origin reported with every request
    #[serde(default = "default_origin")]
    pub origin: String,
}

/// Timeout configuration (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How long `pair` waits for the wallet
    #[serde(default = "default_connection_secs")]
    pub connection_secs: u64,
    /// How long `sign` waits for a signature
    #[serde(default = "default_sign_secs")]
    pub sign_secs: u64,
    /// Relay socket open timeout
    #[serde(default = "default_relay_connect_secs")]
    pub relay_connect_secs: u64,
}

/// Session persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory holding the persisted session record
    #[serde(default = "default_session_dir")]
    pub dir: PathBuf,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum concurrent session rooms
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Maximum sockets per room
    #[serde(default = "default_max_peers")]
    pub max_peers_per_session: usize,
    /// Idle socket timeout (seconds)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_wallet_url() -> String {
    DEFAULT_WALLET_URL.to_string()
}

fn default_deep_link_scheme() -> String {
    DEFAULT_DEEP_LINK_SCHEME.to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_connection_secs() -> u64 {
    120
}

fn default_sign_secs() -> u64 {
    120
}

fn default_relay_connect_secs() -> u64 {
    10
}

fn default_session_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("walletlink")
}

fn default_bind_addr() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_max_sessions() -> usize {
    RelayServerConfig::default().max_sessions
}

fn default_max_peers() -> usize {
    RelayServerConfig::default().max_peers_per_session
}

fn default_idle_timeout_secs() -> u64 {
    RelayServerConfig::default().idle_timeout.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            wallet_url: default_wallet_url(),
            deep_link_scheme: default_deep_link_scheme(),
            app_name: default_app_name(),
            origin: default_origin(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_secs: default_connection_secs(),
            sign_secs: default_sign_secs(),
            relay_connect_secs: default_relay_connect_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: default_session_dir(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_sessions: default_max_sessions(),
            max_peers_per_session: default_max_peers(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("walletlink/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Library configuration built from this file
    #[must_use]
    pub fn walletlink_config(&self) -> WalletLinkConfig {
        WalletLinkConfig {
            relay_url: self.link.relay_url.clone(),
            wallet_url: self.link.wallet_url.clone(),
            deep_link_scheme: self.link.deep_link_scheme.clone(),
            app_name: self.link.app_name.clone(),
            origin: self.link.origin.clone(),
            connection_timeout: Duration::from_secs(self.timeouts.connection_secs),
            sign_timeout: Duration::from_secs(self.timeouts.sign_secs),
            relay_connect_timeout: Duration::from_secs(self.timeouts.relay_connect_secs),
            ..WalletLinkConfig::default()
        }
    }

    /// Relay server configuration built from this file
    #[must_use]
    pub fn relay_server_config(&self) -> RelayServerConfig {
        RelayServerConfig {
            max_sessions: self.relay.max_sessions,
            max_peers_per_session: self.relay.max_peers_per_session,
            idle_timeout: Duration::from_secs(self.relay.idle_timeout_secs),
            ..RelayServerConfig::default()
        }
    }

    /// Parse relay bind address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.relay.bind_addr.parse()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.walletlink_config().validate()?;
        self.parse_bind_addr()?;

        if self.relay.max_sessions == 0 {
            anyhow::bail!("relay.max_sessions must be at least 1");
        }
        // A room needs the dApp and the wallet
        if self.relay.max_peers_per_session < 2 {
            anyhow::bail!("relay.max_peers_per_session must be at least 2");
        }
        if self.relay.idle_timeout_secs == 0 {
            anyhow::bail!("relay.idle_timeout_secs must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.session.dir.as_os_str().is_empty() {
            anyhow::bail!("session.dir must not be empty");
        }

        Ok(())
    }
}
