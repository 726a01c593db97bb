//! Test peers and relays.

pub mod colocated;
pub mod relays;
pub mod wallet_peer;

pub use colocated::{ColocatedWallet, spawn_colocated_wallet};
pub use relays::{DroppingRelay, RecordingRelay};
pub use wallet_peer::WalletPeer;
