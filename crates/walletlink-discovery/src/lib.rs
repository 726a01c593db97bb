//! # WalletLink Discovery
//!
//! The two ways a dApp reaches a wallet.
//!
//! - [`broadcast`]: a wallet running in the same runtime, reached over an
//!   in-process broadcast bus with a request/response protocol.
//! - [`relay`]: a remote wallet, reached through an untrusted WebSocket relay
//!   that forwards AES-256-GCM sealed envelopes between the two ends of a
//!   session. Also contains the forwarding server itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use walletlink_discovery::broadcast::{BroadcastTransport, DEFAULT_PROBE_TIMEOUT};
//! use walletlink_transport::{BroadcastBus, LocalBroadcastBus};
//!
//! # async fn example() {
//! let bus: Arc<dyn BroadcastBus> = Arc::new(LocalBroadcastBus::new());
//! let transport = BroadcastTransport::new(Some(bus), "https://hodl.example");
//!
//! if transport.probe(DEFAULT_PROBE_TIMEOUT).await {
//!     println!("wallet found in this runtime");
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcast;
pub mod relay;

pub use broadcast::{BroadcastError, BroadcastTransport};
pub use relay::{
    Envelope, MessageType, RelayClient, RelayClientConfig, RelayError, RelayEvent, RelayServer,
    RelayServerConfig,
};
