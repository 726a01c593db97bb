//! In-page wallet capability.
//!
//! A wallet living in the same process (a browser extension's injected
//! object, an embedded signer) is reached through [`WalletProvider`]. The
//! trait is the whole contract; how the wallet asks its user for approval is
//! its own business.

use crate::error::Result;
use crate::session::{SignatureResponse, WalletIdentity};
use async_trait::async_trait;
use serde_json::Value;

/// Wallet reachable by direct calls
///
/// Every method may fail with [`WalletLinkError::UserRejected`] when the
/// user declines.
///
/// [`WalletLinkError::UserRejected`]: crate::WalletLinkError::UserRejected
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user to connect; returns the approving wallet's identity.
    async fn connect(&self) -> Result<WalletIdentity>;

    /// Address of the connected account, if any.
    async fn get_address(&self) -> Result<Option<String>>;

    /// Sign raw message bytes.
    async fn sign_message(&self, message: &[u8]) -> Result<SignatureResponse>;

    /// Sign and broadcast a transaction; returns its hash.
    async fn send_transaction(&self, tx: &Value) -> Result<String>;

    /// Drop the connection. Providers without session state need not override.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
