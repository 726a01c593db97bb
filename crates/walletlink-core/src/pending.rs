//! Correlation table for outstanding requests.
//!
//! Each request id maps to a one-shot completion. An entry is settled at most
//! once and leaves the table when it is settled, whichever of resolve,
//! reject, timeout or cancellation gets there first.

use crate::error::{Result, WalletLinkError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

/// Outstanding requests keyed by request id
#[derive(Debug)]
pub struct PendingRequests<T> {
    entries: DashMap<String, oneshot::Sender<Result<T>>>,
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> PendingRequests<T> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request_id` and return the receiver its outcome arrives on.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidState`] if the id is already pending.
    pub fn register(&self, request_id: &str) -> Result<oneshot::Receiver<Result<T>>> {
        match self.entries.entry(request_id.to_string()) {
            Entry::Occupied(_) => Err(WalletLinkError::invalid_state(
                "request id already pending",
            )),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Complete `request_id` successfully. Unknown ids return `false`.
    pub fn resolve(&self, request_id: &str, value: T) -> bool {
        self.settle(request_id, Ok(value))
    }

    /// Fail `request_id`. Unknown ids return `false`.
    pub fn reject(&self, request_id: &str, error: WalletLinkError) -> bool {
        self.settle(request_id, Err(error))
    }

    /// Drop `request_id` without settling it (the waiter gave up).
    pub fn remove(&self, request_id: &str) -> bool {
        self.entries.remove(request_id).is_some()
    }

    /// Register `request_id` and tie the entry to the returned waiter.
    ///
    /// Dropping the [`PendingWait`] before the outcome arrives removes the
    /// entry, so abandoned requests never linger in the table.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidState`] if the id is already pending.
    pub fn track(&self, request_id: &str) -> Result<PendingWait<'_, T>> {
        let receiver = self.register(request_id)?;
        Ok(PendingWait {
            table: self,
            request_id: request_id.to_string(),
            receiver,
        })
    }

    /// Fail every pending request with `error`; returns how many were failed.
    pub fn reject_all(&self, error: &WalletLinkError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.settle(id, Err(error.clone())))
            .count()
    }

    /// Whether `request_id` is pending
    #[must_use]
    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    /// Number of pending requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn settle(&self, request_id: &str, outcome: Result<T>) -> bool {
        match self.entries.remove(request_id) {
            Some((_, tx)) => {
                // The waiter may already have timed out and dropped its receiver
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Waiter for one tracked request; removes its entry when dropped
#[derive(Debug)]
pub struct PendingWait<'a, T> {
    table: &'a PendingRequests<T>,
    request_id: String,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> PendingWait<'_, T> {
    /// Request id this waiter belongs to
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// The settled error, or [`WalletLinkError::Cancelled`] if the entry was
    /// dropped without being settled.
    pub async fn outcome(&mut self) -> Result<T> {
        match (&mut self.receiver).await {
            Ok(outcome) => outcome,
            Err(_) => Err(WalletLinkError::cancelled("Request abandoned")),
        }
    }
}

impl<T> Drop for PendingWait<'_, T> {
    fn drop(&mut self) {
        // No-op once settled
        self.table.remove(&self.request_id);
    }
}
