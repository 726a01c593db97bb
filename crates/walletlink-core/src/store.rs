//! Session persistence.
//!
//! One record per client, replaced on every state change and cleared on
//! disconnect or expiry. [`MemorySessionStore`] lives as long as the process;
//! [`FileSessionStore`] writes a JSON file so a later process can restore.

use crate::error::{Result, WalletLinkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which browsers kept the record; also the default file stem
pub const STORAGE_KEY: &str = "sultan_walletlink_dapp_session";

/// Persisted session record (camelCase JSON)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    /// Session identifier
    pub session_id: String,
    /// Shared secret, standard base64
    pub session_key: String,
    /// Whether a wallet had approved
    #[serde(default)]
    pub is_connected: bool,
    /// Wallet address, when connected
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Wallet public key, when connected
    #[serde(default)]
    pub wallet_public_key: Option<String>,
    /// Creation time, ms since the Unix epoch
    pub created_at: u64,
}

impl PersistedSession {
    /// Serialize to the JSON stored on disk.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Serialization`] on encoder failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Serialization`] if the JSON is not a record
    /// or the required fields are empty.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(json)?;
        if record.session_id.is_empty() || record.session_key.is_empty() {
            return Err(WalletLinkError::Serialization(
                "record is missing sessionId or sessionKey".to_string(),
            ));
        }
        Ok(record)
    }
}

impl std::fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedSession")
            .field("session_id", &self.session_id)
            .field("session_key", &"..")
            .field("is_connected", &self.is_connected)
            .field("wallet_address", &self.wallet_address)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Storage for the single persisted session
///
/// `load` returns the raw stored text so the caller decides what a corrupt
/// record means.
pub trait SessionStore: Send + Sync {
    /// Stored record text, if any.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Storage`] if the backing store cannot be read.
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Storage`] if the backing store cannot be written.
    fn save(&self, record: &str) -> Result<()>;

    /// Remove the stored record. Removing nothing is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::Storage`] if the backing store cannot be written.
    fn clear(&self) -> Result<()>;
}

/// Process-lifetime store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<String>>,
}

impl MemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot().clone())
    }

    fn save(&self, record: &str) -> Result<()> {
        *self.slot() = Some(record.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store the record at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the record as `<dir>/sultan_walletlink_dapp_session.json`
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{STORAGE_KEY}.json")))
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WalletLinkError::Storage(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn save(&self, record: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Write-then-rename so a crash never leaves half a record
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, record)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!("Session record saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
