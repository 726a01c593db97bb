//! Session state machine.
//!
//! A [`Session`] is one pairing attempt between this dApp and a wallet. It
//! owns the shared secret, the derived channel key and, once the wallet
//! approves, the wallet's identity.
//!
//! ```text
//!   Idle ──▶ Generating ──▶ Waiting ──▶ Connected
//!    │           │             │  │         │
//!    │           ▼             │  │         │
//!    │         Error ◀─────────┘  │         │
//!    │           │                ▼         ▼
//!    └─(restore)─┼─────────▶ Disconnected ◀─┘
//!                └──────────────▶ ▲
//! ```

use crate::error::{Result, WalletLinkError};
use crate::store::PersistedSession;
use std::time::Duration;
use walletlink_crypto::{ChannelKey, SessionSecret, random::random_id};
use walletlink_discovery::relay::protocol::now_millis;

/// Session state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session
    Idle,
    /// Session material created, relay socket opening
    Generating,
    /// Pairing link issued, waiting for the wallet
    Waiting,
    /// Wallet approved, identity known
    Connected,
    /// Pairing failed (relay error, rejection or timeout)
    Error,
    /// Session ended locally or by the wallet
    Disconnected,
}

impl SessionState {
    /// Whether `generate_session` may start a new cycle from this state.
    ///
    /// `Error` must be cleared with a disconnect first.
    #[must_use]
    pub fn can_start_pairing(self) -> bool {
        matches!(self, Self::Idle | Self::Connected | Self::Disconnected)
    }

    /// Lowercase name used in logs and the CLI
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "connecting",
            Self::Waiting => "waiting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet identity disclosed by an approving `connect_response`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletIdentity {
    /// Wallet address
    pub address: String,
    /// Wallet public key, if the wallet sent one
    pub public_key: Option<String>,
}

/// Signature returned by the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureResponse {
    /// Signature as produced by the wallet (hex)
    pub signature: String,
    /// Public key that verifies it
    pub public_key: String,
}

/// A single pairing session with a wallet
pub struct Session {
    /// Session identifier (32 lowercase hex characters)
    session_id: String,
    /// Shared secret handed to the wallet out-of-band
    secret: SessionSecret,
    /// Key derived from `secret`
    channel_key: ChannelKey,
    /// Current state
    state: SessionState,
    /// Wallet identity, present only while connected
    wallet: Option<WalletIdentity>,
    /// Creation time, ms since the Unix epoch
    created_at: u64,
}

impl Session {
    /// Create a session with fresh id and secret, in state `Generating`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Crypto`] if the OS CSPRNG or key derivation fails.
    pub fn generate() -> Result<Self> {
        let session_id = random_id()?;
        let secret = SessionSecret::generate()?;
        let channel_key = secret.channel_key()?;
        Ok(Self {
            session_id,
            secret,
            channel_key,
            state: SessionState::Generating,
            wallet: None,
            created_at: now_millis(),
        })
    }

    /// Rebuild a session from its persisted record.
    ///
    /// Connected records come back `Connected` (the only `Idle -> Connected`
    /// path); others come back `Generating`, ready for the relay to reopen.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Crypto`] if the stored key is malformed.
    pub fn from_persisted(record: &PersistedSession) -> Result<Self> {
        let secret = SessionSecret::from_base64(&record.session_key)?;
        let channel_key = secret.channel_key()?;
        let wallet = match (&record.wallet_address, record.is_connected) {
            (Some(address), true) => Some(WalletIdentity {
                address: address.clone(),
                public_key: record.wallet_public_key.clone(),
            }),
            _ => None,
        };
        let state = if wallet.is_some() {
            SessionState::Connected
        } else {
            SessionState::Generating
        };
        Ok(Self {
            session_id: record.session_id.clone(),
            secret,
            channel_key,
            state,
            wallet,
            created_at: record.created_at,
        })
    }

    /// Persistable form of this session.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            session_id: self.session_id.clone(),
            session_key: self.secret.to_base64(),
            is_connected: self.is_connected(),
            wallet_address: self.wallet.as_ref().map(|w| w.address.clone()),
            wallet_public_key: self.wallet.as_ref().and_then(|w| w.public_key.clone()),
            created_at: self.created_at,
        }
    }

    /// Session identifier
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Shared secret
    #[must_use]
    pub fn secret(&self) -> &SessionSecret {
        &self.secret
    }

    /// Channel key derived from the secret
    #[must_use]
    pub fn channel_key(&self) -> &ChannelKey {
        &self.channel_key
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Wallet identity, if connected
    #[must_use]
    pub fn wallet(&self) -> Option<&WalletIdentity> {
        self.wallet.as_ref()
    }

    /// Whether a wallet is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.wallet.is_some()
    }

    /// Creation time, ms since the Unix epoch
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Whether the session is older than `ttl` at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, ttl: Duration, now_ms: u64) -> bool {
        is_expired(self.created_at, ttl, now_ms)
    }

    /// Whether the session is older than `ttl` now.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(ttl, now_millis())
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::{Connected, Disconnected, Error, Generating, Idle, Waiting};

        match (self.state, to) {
            (Idle | Connected | Disconnected | Error, Generating) => true,
            (Generating, Waiting | Error) => true,
            (Waiting, Connected | Error | Disconnected) => true,
            (Connected | Error, Disconnected) => true,
            // Restoring a connected record
            (Idle, Connected) => true,
            // Reopening the relay for a restored waiting record
            (Waiting, Generating) => true,
            _ => false,
        }
    }

    /// Transition to a new state
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidState`] if the transition is not
    /// allowed from the current state.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<()> {
        if !self.can_transition(new_state) {
            return Err(WalletLinkError::InvalidState(
                format!("cannot move from {} to {}", self.state, new_state).into(),
            ));
        }

        let old_state = self.state;
        self.state = new_state;
        if new_state != SessionState::Connected {
            self.wallet = None;
        }

        tracing::debug!(
            "Session state transition: {} -> {}",
            old_state,
            new_state
        );
        Ok(())
    }

    /// Record the approving wallet and move to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidState`] unless the session is `Waiting`.
    pub fn mark_connected(&mut self, wallet: WalletIdentity) -> Result<()> {
        self.transition_to(SessionState::Connected)?;
        self.wallet = Some(wallet);
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("wallet", &self.wallet)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Whether a session created at `created_at` is older than `ttl` at `now_ms`.
#[must_use]
pub fn is_expired(created_at: u64, ttl: Duration, now_ms: u64) -> bool {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    now_ms.saturating_sub(created_at) > ttl_ms
}
