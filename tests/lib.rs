//! Shared fixtures for the WalletLink integration tests.
//!
//! The fixtures play the parts a dApp never controls: the wallet on the
//! far side of the relay, a wallet sharing the dApp's process, and relays
//! that record or misbehave.

pub mod fixtures;
