//! # WalletLink Core
//!
//! Session protocol for WalletLink, which connects a dApp to a user's wallet
//! and asks it to sign messages.
//!
//! This crate provides:
//! - Pairing links carrying the session secret out-of-band
//! - Session state machine with persistence and expiry
//! - Relay session manager with request/response correlation
//! - Connection strategies (in-page, broadcast, relay) behind one facade
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          WalletLink                              │
//! │   (ordered strategies, routes calls to the active one)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │     InPage        │      Broadcast       │        Relay          │
//! │  WalletProvider   │  BroadcastTransport  │    SessionManager     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Session / PendingRequests / EventBus             │
//! │   (state machine, correlation table, event fan-out)             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod manager;
pub mod pairing;
pub mod pending;
pub mod provider;
pub mod session;
pub mod store;
pub mod strategy;

pub use config::WalletLinkConfig;
pub use error::{ErrorKind, Result, WalletLinkError};
pub use events::{EventBus, Subscription, WalletLinkEvent};
pub use facade::{Connecting, PendingPairing, WalletLink, WalletLinkBuilder};
pub use manager::SessionManager;
pub use pairing::{PairingInfo, PairingPayload};
pub use pending::PendingRequests;
pub use provider::WalletProvider;
pub use session::{Session, SessionState, SignatureResponse, WalletIdentity};
pub use store::{FileSessionStore, MemorySessionStore, PersistedSession, SessionStore};
pub use strategy::{
    Attempt, BroadcastStrategy, ConnectionMethod, ConnectionStrategy, InPageStrategy,
    RelayStrategy, WalletConnection,
};

/// Protocol version reported in logs and by the CLI
pub const PROTOCOL_VERSION: &str = "1";
