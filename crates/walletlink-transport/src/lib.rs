//! # WalletLink Transport
//!
//! Socket and messaging primitives underneath the WalletLink transports.
//!
//! This crate provides:
//! - [`websocket`]: split WebSocket halves (client connect and server accept)
//! - [`broadcast`]: named-channel publish/subscribe for co-located peers
//! - [`transport`]: the shared error type and frame statistics
//!
//! Nothing here knows about envelopes or encryption; the relay and broadcast
//! protocols in `walletlink-discovery` are layered on top.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcast;
pub mod transport;
pub mod websocket;

pub use broadcast::{BroadcastBus, BroadcastSubscription, LocalBroadcastBus};
pub use transport::{TransportError, TransportResult, TransportStats};
pub use websocket::{WsMessage, WsReader, WsWriter};
