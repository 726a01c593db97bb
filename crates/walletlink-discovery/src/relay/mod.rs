//! # Session Relay
//!
//! WebSocket relay through which a dApp and a remote wallet exchange
//! encrypted envelopes. The relay is untrusted: it groups sockets by session
//! id and forwards text frames between them without being able to read them.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │     Relay Server     │
//!                    │  /session/<id> rooms │
//!                    └──────────┬───────────┘
//!                               │  base64(IV || AES-GCM ct)
//!              ┌────────────────┴────────────────┐
//!              │                                 │
//!              ▼                                 ▼
//!       ┌─────────────┐                   ┌─────────────┐
//!       │    dApp     │  pairing link     │   Wallet    │
//!       │ RelayClient │ ───────────────▶  │ RelayClient │
//!       └─────────────┘  (key out-of-band)└─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use walletlink_discovery::relay::{RelayClient, RelayClientConfig, SessionInitPayload};
//! use walletlink_crypto::{SessionSecret, random::random_id};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = SessionSecret::generate()?;
//! let session_id = random_id()?;
//! let hello = SessionInitPayload::dapp("HODL Holdings", "https://hodl.example");
//!
//! let (client, mut events) = RelayClient::connect(
//!     &RelayClientConfig::default(),
//!     &session_id,
//!     secret.channel_key()?,
//!     &hello,
//! )
//! .await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # drop(client);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{RelayClient, RelayClientConfig, RelayEvent};
pub use protocol::{
    ConnectResponsePayload, ControlFrame, Envelope, ErrorPayload, MessageType, RelayError,
    SessionInitPayload, SignMessageRequestPayload, SignMessageResponsePayload,
};
pub use server::{RelayServer, RelayServerConfig, TappedFrame};

use std::time::Duration;

/// Public relay operated for the Sultan wallet
pub const DEFAULT_RELAY_URL: &str = "wss://sultan-walletlink-relay.fly.dev";

/// Path prefix under which sessions are addressed on the relay
pub const SESSION_PATH_PREFIX: &str = "/session/";

/// Maximum accepted text frame size (64 KB)
pub const MAX_FRAME_SIZE: usize = 65536;

/// Relay heartbeat interval (30 seconds)
pub const RELAY_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Relay connection timeout (10 seconds)
pub const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the socket URL for a session on `relay_url`.
#[must_use]
pub fn session_url(relay_url: &str, session_id: &str) -> String {
    format!(
        "{}{}{}",
        relay_url.trim_end_matches('/'),
        SESSION_PATH_PREFIX,
        session_id
    )
}

/// Whether `session_id` is safe to place in a relay path.
///
/// Accepts hex ids and the base64url ids some older clients produce.
#[must_use]
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
