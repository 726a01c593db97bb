//! Error types for WalletLink sessions
//!
//! Every public operation returns [`WalletLinkError`]. Errors from the lower
//! crates (`CryptoError`, `TransportError`, `RelayError`, `BroadcastError`)
//! convert into it via `From`.
//!
//! # Error Categories
//!
//! - **Transient**: may succeed if the caller tries again (timeouts, relay socket failures)
//! - **Permanent**: will not succeed without a new pairing or user action
//! - **Discovery failure**: the wallet is not reachable this way; the next
//!   connection strategy should be tried
//!
//! # Example
//!
//! ```no_run
//! use walletlink_core::WalletLinkError;
//!
//! fn handle_error(err: WalletLinkError) {
//!     if err.is_discovery_failure() {
//!         println!("Trying the next strategy: {}", err);
//!     } else if err.is_transient() {
//!         println!("Transient error, may retry: {}", err);
//!     } else {
//!         println!("Permanent error: {}", err);
//!     }
//! }
//! ```

use std::borrow::Cow;
use thiserror::Error;
use walletlink_crypto::CryptoError;
use walletlink_discovery::{BroadcastError, RelayError};
use walletlink_transport::TransportError;

/// Message used when the wallet declines a connection without a reason
pub const CONNECTION_REJECTED: &str = "Connection rejected";

/// Message used when the wallet declines a signature without a reason
pub const SIGNING_REJECTED: &str = "Signing rejected";

/// Errors surfaced by WalletLink operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletLinkError {
    // ============ Discovery ============
    /// The wallet cannot be reached through this path
    #[error("Wallet not available: {0}")]
    NotAvailable(Cow<'static, str>),

    // ============ Peer Decisions ============
    /// The user declined in the wallet
    #[error("{0}")]
    UserRejected(String),

    /// The wallet reported an error for a request
    #[error("Wallet error: {0}")]
    PeerError(String),

    // ============ Operational ============
    /// The wait window elapsed
    #[error("{0}")]
    Timeout(Cow<'static, str>),

    /// Relay or broadcast transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame did not authenticate under the channel key
    #[error("Authentication failed: {0}")]
    Authentication(Cow<'static, str>),

    /// The operation was cancelled (disconnect, session end or caller token)
    #[error("Cancelled: {0}")]
    Cancelled(Cow<'static, str>),

    // ============ Session ============
    /// The session is older than its time-to-live
    #[error("Session expired")]
    SessionExpired,

    /// No wallet is connected
    #[error("Wallet not connected")]
    NotConnected,

    /// The operation is not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// A pairing link could not be parsed
    #[error("Invalid pairing link: {0}")]
    InvalidPairing(Cow<'static, str>),

    // ============ Configuration & Storage ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// The session store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Coarse classification of a [`WalletLinkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`WalletLinkError::NotAvailable`]
    NotAvailable,
    /// See [`WalletLinkError::UserRejected`]
    UserRejected,
    /// See [`WalletLinkError::PeerError`]
    PeerError,
    /// See [`WalletLinkError::Timeout`]
    Timeout,
    /// See [`WalletLinkError::Transport`]
    Transport,
    /// See [`WalletLinkError::Authentication`]
    Authentication,
    /// See [`WalletLinkError::Cancelled`]
    Cancelled,
    /// See [`WalletLinkError::SessionExpired`]
    SessionExpired,
    /// See [`WalletLinkError::NotConnected`]
    NotConnected,
    /// See [`WalletLinkError::InvalidState`]
    InvalidState,
    /// See [`WalletLinkError::InvalidPairing`]
    InvalidPairing,
    /// See [`WalletLinkError::InvalidConfig`]
    InvalidConfig,
    /// See [`WalletLinkError::Storage`]
    Storage,
    /// See [`WalletLinkError::Serialization`]
    Serialization,
    /// See [`WalletLinkError::Crypto`]
    Crypto,
}

impl WalletLinkError {
    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAvailable(_) => ErrorKind::NotAvailable,
            Self::UserRejected(_) => ErrorKind::UserRejected,
            Self::PeerError(_) => ErrorKind::PeerError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidPairing(_) => ErrorKind::InvalidPairing,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Crypto(_) => ErrorKind::Crypto,
        }
    }

    /// Returns true if this error is transient and may succeed on retry
    ///
    /// Transient errors include:
    /// - Wait windows that elapsed
    /// - Relay socket failures
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Returns true if this error is permanent and will not succeed on retry
    ///
    /// Permanent errors include:
    /// - User rejections
    /// - Expired sessions and malformed pairing links
    /// - Invalid configuration or state
    /// - Cryptographic failures
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::UserRejected(_)
                | Self::Authentication(_)
                | Self::SessionExpired
                | Self::NotConnected
                | Self::InvalidState(_)
                | Self::InvalidPairing(_)
                | Self::InvalidConfig(_)
                | Self::Crypto(_)
        )
    }

    /// Returns true if the next connection strategy should be tried
    #[must_use]
    pub fn is_discovery_failure(&self) -> bool {
        matches!(self, Self::NotAvailable(_))
    }

    /// Create a not-available error with static context (zero allocation)
    #[must_use]
    pub const fn not_available(context: &'static str) -> Self {
        Self::NotAvailable(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        Self::Timeout(Cow::Borrowed(context))
    }

    /// Create a cancellation error with static context (zero allocation)
    #[must_use]
    pub const fn cancelled(context: &'static str) -> Self {
        Self::Cancelled(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        Self::InvalidState(Cow::Borrowed(context))
    }

    /// Create an invalid pairing error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_pairing(context: &'static str) -> Self {
        Self::InvalidPairing(Cow::Borrowed(context))
    }

    /// Create an invalid config error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        Self::InvalidConfig(Cow::Borrowed(context))
    }
}

impl From<CryptoError> for WalletLinkError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => {
                Self::Authentication(Cow::Borrowed("frame did not authenticate"))
            }
            other => Self::Crypto(other.to_string()),
        }
    }
}

impl From<TransportError> for WalletLinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::timeout("Relay connection timeout"),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<RelayError> for WalletLinkError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Crypto(e) => e.into(),
            RelayError::Transport(e) => e.into(),
            RelayError::Timeout => Self::timeout("Relay connection timeout"),
            RelayError::Closed => Self::Transport("Not connected to relay".to_string()),
            RelayError::InvalidSession(id) => Self::InvalidState(Cow::Owned(format!(
                "unusable session id {id:?}"
            ))),
            RelayError::Serialization(e) | RelayError::Deserialization(e) => {
                Self::Serialization(e)
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<BroadcastError> for WalletLinkError {
    fn from(err: BroadcastError) -> Self {
        match err {
            BroadcastError::Unavailable => Self::not_available("no broadcast channel"),
            BroadcastError::Timeout => Self::timeout("Broadcast request timeout"),
            BroadcastError::Rejected(message) => Self::UserRejected(message),
            BroadcastError::Closed => Self::Transport("broadcast channel closed".to_string()),
            BroadcastError::InvalidRequest(e) => Self::Serialization(e),
        }
    }
}

impl From<serde_json::Error> for WalletLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WalletLinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for WalletLink operations
pub type Result<T> = std::result::Result<T, WalletLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(WalletLinkError::timeout("Connection timeout").is_transient());
        assert!(WalletLinkError::Transport("socket closed".into()).is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(WalletLinkError::UserRejected(CONNECTION_REJECTED.into()).is_permanent());
        assert!(WalletLinkError::SessionExpired.is_permanent());
        assert!(WalletLinkError::NotConnected.is_permanent());
        assert!(WalletLinkError::invalid_pairing("missing key").is_permanent());
        assert!(WalletLinkError::invalid_config("empty app name").is_permanent());
    }

    #[test]
    fn test_mutual_exclusivity() {
        let all = [
            WalletLinkError::not_available("x"),
            WalletLinkError::UserRejected("x".into()),
            WalletLinkError::PeerError("x".into()),
            WalletLinkError::timeout("x"),
            WalletLinkError::Transport("x".into()),
            WalletLinkError::Authentication(Cow::Borrowed("x")),
            WalletLinkError::cancelled("x"),
            WalletLinkError::SessionExpired,
            WalletLinkError::NotConnected,
            WalletLinkError::invalid_state("x"),
            WalletLinkError::invalid_pairing("x"),
            WalletLinkError::invalid_config("x"),
            WalletLinkError::Storage("x".into()),
            WalletLinkError::Serialization("x".into()),
            WalletLinkError::Crypto("x".into()),
        ];

        for err in &all {
            assert!(!(err.is_transient() && err.is_permanent()), "{err:?}");
        }
    }

    #[test]
    fn test_discovery_failure() {
        assert!(WalletLinkError::not_available("no extension").is_discovery_failure());
        assert!(!WalletLinkError::timeout("x").is_discovery_failure());
        assert!(!WalletLinkError::UserRejected("x".into()).is_discovery_failure());
    }

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            WalletLinkError::timeout("Connection timeout").to_string(),
            "Connection timeout"
        );
        assert_eq!(
            WalletLinkError::UserRejected(SIGNING_REJECTED.into()).to_string(),
            "Signing rejected"
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(WalletLinkError::SessionExpired.kind(), ErrorKind::SessionExpired);
        assert_eq!(WalletLinkError::cancelled("x").kind(), ErrorKind::Cancelled);
        assert_eq!(
            WalletLinkError::PeerError("boom".into()).kind(),
            ErrorKind::PeerError
        );
    }

    #[test]
    fn test_crypto_conversion() {
        let err: WalletLinkError = CryptoError::AuthenticationFailed.into();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err: WalletLinkError = CryptoError::RandomFailed.into();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn test_relay_conversion() {
        let err: WalletLinkError = RelayError::Timeout.into();
        assert!(err.is_transient());

        let err: WalletLinkError = RelayError::Crypto(CryptoError::AuthenticationFailed).into();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err: WalletLinkError = RelayError::Closed.into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_broadcast_conversion() {
        let err: WalletLinkError = BroadcastError::Unavailable.into();
        assert!(err.is_discovery_failure());

        let err: WalletLinkError = BroadcastError::Rejected("nope".into()).into();
        assert_eq!(err, WalletLinkError::UserRejected("nope".into()));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: WalletLinkError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
