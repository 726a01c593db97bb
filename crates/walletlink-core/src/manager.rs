//! Session management for the relay path.
//!
//! [`SessionManager`] owns the single live [`Session`], its relay connection
//! and the correlation table for sign requests. Everything the wallet sends
//! is handled by one dispatch function running on a per-connection task;
//! lifecycle methods and dispatch serialize through one mutex whose critical
//! sections never await.
//!
//! # Pairing Flow
//!
//! ```text
//! dApp                         Relay                        Wallet
//!  |                             |                             |
//!  |-- open /session/<id> ------>|                             |
//!  |<-------------- session_ack -|                             |
//!  |-- session_init (sealed) --->|                             |
//!  |                             |                             |
//!  |  ====== pairing link (id, secret) shown as QR ======>     |
//!  |                             |<------- open /session/<id> -|
//!  |<---------------------------------- connect_response ------|
//!  |                             |                             |
//!  |  [Connected]                |                             |
//!  |-- sign_message_request ------------------------------->   |
//!  |<------------------------------- sign_message_response ----|
//! ```

use crate::config::WalletLinkConfig;
use crate::error::{CONNECTION_REJECTED, Result, SIGNING_REJECTED, WalletLinkError};
use crate::events::{EventBus, Subscription, WalletLinkEvent};
use crate::pairing::{PairingInfo, PairingPayload};
use crate::pending::PendingRequests;
use crate::session::{Session, SessionState, SignatureResponse, WalletIdentity, is_expired};
use crate::store::{PersistedSession, SessionStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walletlink_crypto::ChannelKey;
use walletlink_crypto::random::random_id;
use walletlink_discovery::relay::client::short_id;
use walletlink_discovery::relay::protocol::now_millis;
use walletlink_discovery::relay::{
    ConnectResponsePayload, Envelope, ErrorPayload, MessageType, RelayClient, RelayEvent,
    SessionInitPayload, SignMessageRequestPayload, SignMessageResponsePayload,
};

type ConnectionWaiter = oneshot::Sender<Result<String>>;

/// Mutable session slot, guarded by [`Shared::slot`]
struct Slot {
    /// Live session, if any
    session: Option<Session>,
    /// Reported state while no session is live
    resting_state: SessionState,
    /// Relay connection of the live session
    relay: Option<Arc<RelayClient>>,
    /// Dispatch task reading `relay`
    dispatch_task: Option<JoinHandle<()>>,
    /// Bumped whenever the relay connection is replaced; stale events are dropped
    generation: u64,
    /// Callers blocked in `wait_for_connection`
    waiters: Vec<ConnectionWaiter>,
}

impl Slot {
    fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(self.resting_state, Session::state)
    }

    /// Take everything tied to the current session out of the slot.
    fn detach(&mut self) -> Detached {
        self.generation += 1;
        Detached {
            session: self.session.take(),
            relay: self.relay.take(),
            task: self.dispatch_task.take(),
            waiters: std::mem::take(&mut self.waiters),
        }
    }
}

/// A session removed from the slot, awaiting shutdown
struct Detached {
    session: Option<Session>,
    relay: Option<Arc<RelayClient>>,
    task: Option<JoinHandle<()>>,
    waiters: Vec<ConnectionWaiter>,
}

impl Detached {
    async fn shutdown(
        self,
        pending: &PendingRequests<SignatureResponse>,
        reason: &WalletLinkError,
        send_end: bool,
    ) {
        if let Some(task) = self.task {
            task.abort();
        }
        if let Some(relay) = self.relay {
            if send_end {
                if let Some(session) = &self.session {
                    let end = Envelope::empty(MessageType::SessionEnd, session.session_id());
                    if let Err(e) = relay.send(&end).await {
                        tracing::debug!("session_end not delivered: {}", e);
                    }
                }
            }
            relay.close().await;
        }
        for waiter in self.waiters {
            let _ = waiter.send(Err(reason.clone()));
        }
        let failed = pending.reject_all(reason);
        if failed > 0 {
            tracing::debug!("Cancelled {} pending request(s): {}", failed, reason);
        }
    }
}

/// State shared between the manager and its dispatch task
struct Shared {
    config: WalletLinkConfig,
    store: Arc<dyn SessionStore>,
    slot: Mutex<Slot>,
    pending: PendingRequests<SignatureResponse>,
    events: EventBus,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, record: &PersistedSession) {
        let result = record.to_json().and_then(|json| self.store.save(&json));
        if let Err(e) = result {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear persisted session: {}", e);
        }
    }

    fn emit_state(&self, state: SessionState) {
        self.events.emit(WalletLinkEvent::StateChanged(state));
    }

    async fn open_relay(
        &self,
        session_id: &str,
        key: ChannelKey,
    ) -> Result<(Arc<RelayClient>, mpsc::Receiver<RelayEvent>)> {
        let hello = SessionInitPayload::dapp(&self.config.app_name, &self.config.origin);
        let (client, events) =
            RelayClient::connect(&self.config.relay_client_config(), session_id, key, &hello)
                .await?;
        Ok((Arc::new(client), events))
    }

    /// Put a freshly opened relay into the slot and start dispatching its events.
    fn install(
        self: &Arc<Self>,
        slot: &mut Slot,
        relay: Arc<RelayClient>,
        events: mpsc::Receiver<RelayEvent>,
    ) {
        slot.relay = Some(relay);
        let generation = slot.generation;
        let shared = Arc::clone(self);
        slot.dispatch_task = Some(tokio::spawn(dispatch_loop(shared, generation, events)));
    }

    /// Tear the session down and report `Disconnected`.
    ///
    /// With `only_generation`, nothing happens if the relay connection has
    /// since been replaced. `from_dispatch` leaves the dispatch task running
    /// so it can return on its own.
    async fn end_session(
        &self,
        only_generation: Option<u64>,
        reason: &WalletLinkError,
        send_end: bool,
        from_dispatch: bool,
    ) -> bool {
        let detached = {
            let mut slot = self.lock();
            if only_generation.is_some_and(|g| g != slot.generation) {
                return false;
            }
            let mut detached = slot.detach();
            slot.resting_state = SessionState::Disconnected;
            if from_dispatch {
                drop(detached.task.take());
            }
            detached
        };

        if let Some(session) = &detached.session {
            tracing::info!(
                "Ending session {}: {}",
                short_id(session.session_id()),
                reason
            );
        }
        detached.shutdown(&self.pending, reason, send_end).await;
        self.clear_store();
        self.emit_state(SessionState::Disconnected);
        self.events.emit(WalletLinkEvent::Disconnected);
        true
    }

    async fn expire(&self, generation: u64) {
        let reason = WalletLinkError::SessionExpired;
        if self.end_session(Some(generation), &reason, true, false).await {
            self.events.emit(WalletLinkEvent::Error(reason));
        }
    }

    /// Handle one relay event. Returns `false` once this connection is finished.
    async fn dispatch(&self, generation: u64, event: RelayEvent) -> bool {
        let session_id = {
            let slot = self.lock();
            if slot.generation != generation {
                return false;
            }
            match slot.session.as_ref() {
                Some(session) => session.session_id().to_string(),
                None => return false,
            }
        };

        let envelope = match event {
            RelayEvent::ControlAck => {
                tracing::debug!("Session {} acknowledged by relay", short_id(&session_id));
                return true;
            }
            RelayEvent::Closed => {
                self.transport_failed(generation, "relay closed the connection".to_string());
                return false;
            }
            RelayEvent::Error(message) => {
                self.transport_failed(generation, message);
                return false;
            }
            RelayEvent::Envelope(envelope) => envelope,
        };

        if envelope.session_id != session_id {
            tracing::warn!(
                "Dropping {} addressed to session {}",
                envelope.kind,
                short_id(&envelope.session_id)
            );
            return true;
        }

        match envelope.kind {
            MessageType::SessionAck => {
                tracing::debug!("Session {} acknowledged", short_id(&session_id));
            }
            MessageType::ConnectResponse => match envelope.payload_as::<ConnectResponsePayload>() {
                Ok(payload) => {
                    if !self.on_connect_response(generation, payload) {
                        let reason = WalletLinkError::cancelled("Approval arrived after pairing failed");
                        self.end_session(Some(generation), &reason, true, true).await;
                        return false;
                    }
                }
                Err(e) => tracing::warn!("Malformed connect_response: {}", e),
            },
            MessageType::SignMessageResponse => {
                match envelope.payload_as::<SignMessageResponsePayload>() {
                    Ok(payload) => self.on_sign_response(payload),
                    Err(e) => tracing::warn!("Malformed sign_message_response: {}", e),
                }
            }
            MessageType::SessionEnd => {
                let reason = WalletLinkError::cancelled("Session ended by wallet");
                self.end_session(Some(generation), &reason, false, true).await;
                return false;
            }
            MessageType::Error => {
                let payload = envelope.payload_as::<ErrorPayload>().unwrap_or_default();
                self.on_peer_error(payload);
            }
            MessageType::SessionInit | MessageType::Heartbeat => {
                tracing::debug!("{} from wallet", envelope.kind);
            }
            MessageType::ConnectRequest | MessageType::SignMessageRequest => {
                tracing::warn!("Ignoring {} sent to the dApp", envelope.kind);
            }
        }
        true
    }

    /// Apply the wallet's answer to the pairing. Returns `false` for an
    /// approval that arrived after the pairing failed; the caller ends the
    /// session so the wallet does not believe it is paired.
    fn on_connect_response(&self, generation: u64, payload: ConnectResponsePayload) -> bool {
        let approved_address = payload.address.clone().filter(|_| payload.approved);
        let mut slot = self.lock();
        if slot.generation != generation {
            return true;
        }
        let Some(session) = slot.session.as_mut() else {
            return true;
        };

        let (result, events, record) = match approved_address {
            Some(address) => {
                let identity = WalletIdentity {
                    address: address.clone(),
                    public_key: payload.public_key.clone(),
                };
                if session.state() == SessionState::Error {
                    tracing::warn!("Wallet {} approved after the pairing failed", address);
                    return false;
                }
                if let Err(e) = session.mark_connected(identity) {
                    tracing::warn!("Ignoring connect_response: {}", e);
                    return true;
                }
                tracing::info!(
                    "Wallet {} connected on session {}",
                    address,
                    short_id(session.session_id())
                );
                let events = vec![
                    WalletLinkEvent::StateChanged(SessionState::Connected),
                    WalletLinkEvent::Connected {
                        address: address.clone(),
                        public_key: payload.public_key,
                    },
                ];
                (Ok(address), events, Some(session.to_persisted()))
            }
            None => {
                let reason = payload
                    .error
                    .unwrap_or_else(|| CONNECTION_REJECTED.to_string());
                let error = WalletLinkError::UserRejected(reason);
                tracing::info!("Wallet declined connection: {}", error);
                let mut events = Vec::with_capacity(2);
                if session.transition_to(SessionState::Error).is_ok() {
                    events.push(WalletLinkEvent::StateChanged(SessionState::Error));
                }
                events.push(WalletLinkEvent::Error(error.clone()));
                (Err(error), events, None)
            }
        };

        let waiters = std::mem::take(&mut slot.waiters);
        drop(slot);

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        match record {
            Some(record) => self.persist(&record),
            // A declined pairing is never resumed
            None => self.clear_store(),
        }
        for event in events {
            self.events.emit(event);
        }
        true
    }

    fn on_sign_response(&self, payload: SignMessageResponsePayload) {
        let request_id = payload.request_id;
        let settled = match (payload.approved, payload.signature) {
            (true, Some(signature)) => {
                let public_key = payload
                    .public_key
                    .or_else(|| {
                        self.lock()
                            .session
                            .as_ref()
                            .and_then(|s| s.wallet())
                            .and_then(|w| w.public_key.clone())
                    })
                    .unwrap_or_default();
                self.pending.resolve(
                    &request_id,
                    SignatureResponse {
                        signature,
                        public_key,
                    },
                )
            }
            _ => {
                let reason = payload
                    .error
                    .unwrap_or_else(|| SIGNING_REJECTED.to_string());
                self.pending
                    .reject(&request_id, WalletLinkError::UserRejected(reason))
            }
        };
        if !settled {
            tracing::debug!("Ignoring response for unknown request {}", short_id(&request_id));
        }
    }

    fn on_peer_error(&self, payload: ErrorPayload) {
        let error = WalletLinkError::PeerError(
            payload
                .error
                .unwrap_or_else(|| "unspecified wallet error".to_string()),
        );
        tracing::warn!("Wallet reported: {}", error);
        if let Some(request_id) = payload.request_id {
            if self.pending.reject(&request_id, error.clone()) {
                tracing::debug!("Failed request {}", short_id(&request_id));
            }
        }
        self.events.emit(WalletLinkEvent::Error(error));
    }

    /// Drop the relay connection after a socket failure. The session itself
    /// survives; `reconnect` may reopen it.
    fn transport_failed(&self, generation: u64, message: String) {
        let relay = {
            let mut slot = self.lock();
            if slot.generation != generation {
                return;
            }
            slot.generation += 1;
            drop(slot.dispatch_task.take());
            slot.relay.take()
        };
        drop(relay);

        tracing::warn!("Relay connection lost: {}", message);
        let error = WalletLinkError::Transport(message);
        let failed = self.pending.reject_all(&error);
        if failed > 0 {
            tracing::debug!("Failed {} in-flight request(s)", failed);
        }
        self.events.emit(WalletLinkEvent::Error(error));
    }

    /// Returns the address if the wallet won the race against the timer;
    /// otherwise moves `Waiting` to `Error` when `mark_error` is set.
    fn connection_timed_out(&self, generation: u64, mark_error: bool) -> Option<String> {
        let mut slot = self.lock();
        if slot.generation != generation {
            return None;
        }
        let session = slot.session.as_mut()?;
        if let Some(wallet) = session.wallet() {
            return Some(wallet.address.clone());
        }
        if mark_error
            && session.state() == SessionState::Waiting
            && session.transition_to(SessionState::Error).is_ok()
        {
            drop(slot);
            self.emit_state(SessionState::Error);
            self.events
                .emit(WalletLinkEvent::Error(WalletLinkError::timeout("Connection timeout")));
        }
        None
    }
}

async fn dispatch_loop(shared: Arc<Shared>, generation: u64, mut events: mpsc::Receiver<RelayEvent>) {
    while let Some(event) = events.recv().await {
        if !shared.dispatch(generation, event).await {
            break;
        }
    }
    tracing::debug!("Dispatch loop {} finished", generation);
}

/// Outcome of the synchronous part of `wait_for_connection`
enum WaitStart {
    Ready(String),
    Expired(u64),
    Wait {
        receiver: oneshot::Receiver<Result<String>>,
        generation: u64,
        remaining_ttl: Duration,
    },
}

/// Owner of the relay-path session
///
/// Thread-safe; every method takes `&self`.
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create a manager with no session.
    #[must_use]
    pub fn new(config: WalletLinkConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                slot: Mutex::new(Slot {
                    session: None,
                    resting_state: SessionState::Idle,
                    relay: None,
                    dispatch_task: None,
                    generation: 0,
                    waiters: Vec::new(),
                }),
                pending: PendingRequests::new(),
                events: EventBus::new(),
            }),
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &WalletLinkConfig {
        &self.shared.config
    }

    /// Start a new pairing.
    ///
    /// Creates the session, opens the relay, persists the record and returns
    /// the deep link for the wallet. A connected session is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`WalletLinkError::InvalidState`] while another pairing is in
    /// progress, or the relay error (session moves to `Error`).
    pub async fn generate_session(&self) -> Result<PairingInfo> {
        let session = Session::generate()?;
        let session_id = session.session_id().to_string();
        let key = session.channel_key().clone();

        let (previous, generation) = {
            let mut slot = self.shared.lock();
            let state = slot.state();
            if !state.can_start_pairing() {
                return Err(WalletLinkError::InvalidState(
                    format!("cannot start pairing while {state}").into(),
                ));
            }
            let previous = slot.detach();
            slot.session = Some(session);
            (previous, slot.generation)
        };
        let replaced = WalletLinkError::cancelled("Session replaced");
        previous
            .shutdown(&self.shared.pending, &replaced, true)
            .await;
        self.shared.emit_state(SessionState::Generating);
        tracing::info!("Generating session {}", short_id(&session_id));

        let (relay, events) = match self.shared.open_relay(&session_id, key).await {
            Ok(opened) => opened,
            Err(e) => {
                let moved = {
                    let mut slot = self.shared.lock();
                    slot.generation == generation
                        && slot
                            .session
                            .as_mut()
                            .is_some_and(|s| s.transition_to(SessionState::Error).is_ok())
                };
                tracing::warn!("Relay connection failed: {}", e);
                if moved {
                    self.shared.emit_state(SessionState::Error);
                }
                self.shared.events.emit(WalletLinkEvent::Error(e.clone()));
                return Err(e);
            }
        };

        let prepared = {
            let mut slot = self.shared.lock();
            if slot.generation == generation {
                self.shared.install(&mut slot, Arc::clone(&relay), events);
                slot.session.as_mut().map(|session| {
                    session
                        .transition_to(SessionState::Waiting)
                        .map(|()| {
                            let payload = PairingPayload::new(
                                &self.shared.config,
                                session.session_id(),
                                session.secret(),
                            );
                            (payload, session.to_persisted())
                        })
                })
            } else {
                None
            }
        };

        let Some(prepared) = prepared else {
            relay.close().await;
            return Err(WalletLinkError::cancelled("Pairing superseded"));
        };
        let (payload, record) = prepared?;
        self.shared.persist(&record);
        self.shared.emit_state(SessionState::Waiting);

        Ok(PairingInfo {
            pairing_url: payload.to_link(&self.shared.config),
            session_id,
        })
    }

    /// Wait up to `timeout` for the wallet to approve.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::wait_for_connection_until`].
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<String> {
        self.wait_for_connection_until(timeout, &CancellationToken::new())
            .await
    }

    /// Wait up to `timeout` for the wallet to approve, or until `cancel` fires.
    ///
    /// Returns the wallet address immediately if already connected.
    ///
    /// # Errors
    ///
    /// - [`WalletLinkError::UserRejected`] if the wallet declines
    /// - [`WalletLinkError::Timeout`] when the window elapses (session moves to
    ///   `Error`; an approval arriving after that ends the session and the
    ///   wallet is sent `session_end`)
    /// - [`WalletLinkError::SessionExpired`] if the session ages out first
    /// - [`WalletLinkError::Cancelled`] on `cancel` or disconnect
    /// - [`WalletLinkError::InvalidState`] when no pairing is waiting
    pub async fn wait_for_connection_until(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let ttl = self.shared.config.session_ttl;
        let start = {
            let mut slot = self.shared.lock();
            let generation = slot.generation;
            let session = slot
                .session
                .as_ref()
                .ok_or(WalletLinkError::invalid_state("no pairing in progress"))?;

            if let Some(wallet) = session.wallet() {
                WaitStart::Ready(wallet.address.clone())
            } else if session.is_expired(ttl) {
                WaitStart::Expired(generation)
            } else if session.state() != SessionState::Waiting {
                return Err(WalletLinkError::InvalidState(
                    format!("cannot wait for a connection while {}", session.state()).into(),
                ));
            } else {
                let age = Duration::from_millis(now_millis().saturating_sub(session.created_at()));
                let remaining_ttl = ttl.saturating_sub(age);
                let (tx, rx) = oneshot::channel();
                slot.waiters.retain(|w| !w.is_closed());
                slot.waiters.push(tx);
                WaitStart::Wait {
                    receiver: rx,
                    generation,
                    remaining_ttl,
                }
            }
        };

        let (receiver, generation, remaining_ttl) = match start {
            WaitStart::Ready(address) => return Ok(address),
            WaitStart::Expired(generation) => {
                self.shared.expire(generation).await;
                return Err(WalletLinkError::SessionExpired);
            }
            WaitStart::Wait {
                receiver,
                generation,
                remaining_ttl,
            } => (receiver, generation, remaining_ttl),
        };

        let expires_first = remaining_ttl < timeout;
        let window = if expires_first { remaining_ttl } else { timeout };

        tokio::select! {
            outcome = receiver => match outcome {
                Ok(result) => result,
                Err(_) => Err(WalletLinkError::cancelled("Connection wait abandoned")),
            },
            () = tokio::time::sleep(window) => {
                if let Some(address) = self.shared.connection_timed_out(generation, !expires_first) {
                    return Ok(address);
                }
                if expires_first {
                    self.shared.expire(generation).await;
                    Err(WalletLinkError::SessionExpired)
                } else {
                    Err(WalletLinkError::timeout("Connection timeout"))
                }
            }
            () = cancel.cancelled() => Err(WalletLinkError::cancelled("Connection wait cancelled")),
        }
    }

    /// Restore the persisted session, if any.
    ///
    /// Expired, corrupt and unreachable records are cleared and reported as `false`.
    pub async fn restore_session(&self) -> bool {
        match self.try_restore_session().await {
            Ok(restored) => restored,
            Err(e) => {
                tracing::debug!("Session not restored: {}", e);
                false
            }
        }
    }

    /// Restore the persisted session, surfacing why it could not be.
    ///
    /// A connected record is restored in memory without touching the relay
    /// (call [`SessionManager::reconnect`] before signing). A waiting record
    /// reopens the relay and resumes `Waiting`.
    ///
    /// # Errors
    ///
    /// - [`WalletLinkError::SessionExpired`] if the record aged out (it is cleared)
    /// - the relay error if a waiting record cannot reconnect (it is cleared)
    /// - [`WalletLinkError::Storage`] if the store cannot be read
    pub async fn try_restore_session(&self) -> Result<bool> {
        {
            let slot = self.shared.lock();
            match slot.state() {
                SessionState::Connected | SessionState::Waiting => return Ok(true),
                SessionState::Generating => {
                    return Err(WalletLinkError::invalid_state("pairing in progress"));
                }
                _ => {}
            }
        }

        let Some(text) = self.shared.store.load()? else {
            return Ok(false);
        };
        let record = match PersistedSession::from_json(&text) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Discarding corrupt session record: {}", e);
                self.shared.clear_store();
                return Ok(false);
            }
        };
        if is_expired(record.created_at, self.shared.config.session_ttl, now_millis()) {
            tracing::info!("Persisted session {} expired", short_id(&record.session_id));
            self.shared.clear_store();
            return Err(WalletLinkError::SessionExpired);
        }
        let session = match Session::from_persisted(&record) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Discarding unusable session record: {}", e);
                self.shared.clear_store();
                return Ok(false);
            }
        };

        let session_id = session.session_id().to_string();
        let restored_state = session.state();
        let key = session.channel_key().clone();
        let (previous, generation) = {
            let mut slot = self.shared.lock();
            let previous = slot.detach();
            slot.session = Some(session);
            (previous, slot.generation)
        };
        previous
            .shutdown(&self.shared.pending, &WalletLinkError::cancelled("Session replaced"), false)
            .await;

        if restored_state == SessionState::Connected {
            tracing::info!("Restored connected session {}", short_id(&session_id));
            self.shared.emit_state(SessionState::Connected);
            return Ok(true);
        }

        self.shared.emit_state(SessionState::Generating);
        let (relay, events) = match self.shared.open_relay(&session_id, key).await {
            Ok(opened) => opened,
            Err(e) => {
                let mut slot = self.shared.lock();
                if slot.generation == generation {
                    slot.detach();
                    slot.resting_state = SessionState::Idle;
                }
                drop(slot);
                self.shared.clear_store();
                self.shared.emit_state(SessionState::Idle);
                return Err(e);
            }
        };

        let resumed = {
            let mut slot = self.shared.lock();
            if slot.generation == generation {
                self.shared.install(&mut slot, Arc::clone(&relay), events);
                slot.session
                    .as_mut()
                    .is_some_and(|s| s.transition_to(SessionState::Waiting).is_ok())
            } else {
                false
            }
        };
        if !resumed {
            relay.close().await;
            return Err(WalletLinkError::cancelled("Restore superseded"));
        }
        tracing::info!("Resumed waiting session {}", short_id(&session_id));
        self.shared.emit_state(SessionState::Waiting);
        Ok(true)
    }

    /// Reopen the relay connection of the live session, reusing its channel key.
    ///
    /// A no-op while the current connection is open.
    ///
    /// # Errors
    ///
    /// - [`WalletLinkError::NotConnected`] without a waiting or connected session
    /// - [`WalletLinkError::SessionExpired`] if the session aged out
    /// - the relay error if the socket cannot be opened
    pub async fn reconnect(&self) -> Result<()> {
        enum Plan {
            AlreadyOpen,
            Expired(u64),
            Open {
                session_id: String,
                key: ChannelKey,
                generation: u64,
                old_relay: Option<Arc<RelayClient>>,
                old_task: Option<JoinHandle<()>>,
            },
        }

        let ttl = self.shared.config.session_ttl;
        let plan = {
            let mut slot = self.shared.lock();
            let generation = slot.generation;
            let relay_open = slot.relay.as_ref().is_some_and(|r| !r.is_closed());
            let session = slot
                .session
                .as_ref()
                .filter(|s| matches!(s.state(), SessionState::Waiting | SessionState::Connected))
                .ok_or(WalletLinkError::NotConnected)?;

            if session.is_expired(ttl) {
                Plan::Expired(generation)
            } else if relay_open {
                Plan::AlreadyOpen
            } else {
                let session_id = session.session_id().to_string();
                let key = session.channel_key().clone();
                slot.generation += 1;
                Plan::Open {
                    session_id,
                    key,
                    generation: slot.generation,
                    old_relay: slot.relay.take(),
                    old_task: slot.dispatch_task.take(),
                }
            }
        };

        let (session_id, key, generation) = match plan {
            Plan::AlreadyOpen => return Ok(()),
            Plan::Expired(generation) => {
                self.shared.expire(generation).await;
                return Err(WalletLinkError::SessionExpired);
            }
            Plan::Open {
                session_id,
                key,
                generation,
                old_relay,
                old_task,
            } => {
                if let Some(task) = old_task {
                    task.abort();
                }
                if let Some(relay) = old_relay {
                    relay.close().await;
                }
                (session_id, key, generation)
            }
        };

        tracing::info!("Reconnecting session {}", short_id(&session_id));
        let (relay, events) = self.shared.open_relay(&session_id, key).await?;
        let installed = {
            let mut slot = self.shared.lock();
            if slot.generation == generation {
                self.shared.install(&mut slot, Arc::clone(&relay), events);
                true
            } else {
                false
            }
        };
        if !installed {
            relay.close().await;
            return Err(WalletLinkError::cancelled("Reconnect superseded"));
        }
        Ok(())
    }

    /// Ask the wallet to sign `message`.
    ///
    /// Several requests may be outstanding; each completes independently.
    ///
    /// # Errors
    ///
    /// - [`WalletLinkError::NotConnected`] without a connected wallet
    /// - [`WalletLinkError::SessionExpired`] if the session aged out
    /// - [`WalletLinkError::Transport`] if the relay socket is gone or fails
    /// - [`WalletLinkError::UserRejected`] / [`WalletLinkError::PeerError`] from the wallet
    /// - [`WalletLinkError::Timeout`] after the sign timeout
    /// - [`WalletLinkError::Cancelled`] if the session ends first
    pub async fn sign_message(&self, message: &str) -> Result<SignatureResponse> {
        let ttl = self.shared.config.session_ttl;
        let checked = {
            let slot = self.shared.lock();
            match slot.session.as_ref() {
                Some(session) if session.is_connected() => {
                    if session.is_expired(ttl) {
                        Err(slot.generation)
                    } else {
                        Ok((slot.relay.clone(), session.session_id().to_string()))
                    }
                }
                _ => return Err(WalletLinkError::NotConnected),
            }
        };
        let (relay, session_id) = match checked {
            Ok(ready) => ready,
            Err(generation) => {
                self.shared.expire(generation).await;
                return Err(WalletLinkError::SessionExpired);
            }
        };
        let relay = relay
            .filter(|r| !r.is_closed())
            .ok_or_else(|| WalletLinkError::Transport("Not connected to relay".to_string()))?;

        let request_id = random_id()?;
        // Dropping this future at any await below removes the entry
        let mut wait = self.shared.pending.track(&request_id)?;
        let payload = SignMessageRequestPayload {
            request_id: request_id.clone(),
            message: message.to_string(),
            origin: self.shared.config.origin.clone(),
        };
        let envelope =
            Envelope::with_payload(MessageType::SignMessageRequest, &session_id, &payload)?;
        relay.send(&envelope).await?;
        tracing::debug!("Sign request {} sent", short_id(&request_id));

        match tokio::time::timeout(self.shared.config.sign_timeout, wait.outcome()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(WalletLinkError::timeout("Signing request timeout")),
        }
    }

    /// End the session.
    ///
    /// Tells the wallet (best effort), closes the relay, clears the persisted
    /// record and cancels every pending request. Always ends `Disconnected`.
    pub async fn disconnect(&self) {
        let reason = WalletLinkError::cancelled("Wallet disconnected");
        self.shared.end_session(None, &reason, true, false).await;
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// Live session id
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared
            .lock()
            .session
            .as_ref()
            .map(|s| s.session_id().to_string())
    }

    /// Connected wallet address
    #[must_use]
    pub fn address(&self) -> Option<String> {
        self.shared
            .lock()
            .session
            .as_ref()
            .and_then(Session::wallet)
            .map(|w| w.address.clone())
    }

    /// Connected wallet public key
    #[must_use]
    pub fn public_key(&self) -> Option<String> {
        self.shared
            .lock()
            .session
            .as_ref()
            .and_then(Session::wallet)
            .and_then(|w| w.public_key.clone())
    }

    /// Whether a wallet is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared
            .lock()
            .session
            .as_ref()
            .is_some_and(Session::is_connected)
    }

    /// Whether the relay socket of the live session is open
    #[must_use]
    pub fn is_relay_open(&self) -> bool {
        self.shared
            .lock()
            .relay
            .as_ref()
            .is_some_and(|r| !r.is_closed())
    }

    /// Pairing link of the live session (e.g. to show it again after restore)
    #[must_use]
    pub fn pairing_info(&self) -> Option<PairingInfo> {
        let slot = self.shared.lock();
        let session = slot.session.as_ref()?;
        let payload = PairingPayload::new(&self.shared.config, session.session_id(), session.secret());
        Some(PairingInfo {
            pairing_url: payload.to_link(&self.shared.config),
            session_id: session.session_id().to_string(),
        })
    }

    /// Number of outstanding sign requests
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        if let Some(task) = slot.dispatch_task.take() {
            task.abort();
        }
        // Dropping the last handle aborts the relay's reader and heartbeat
        slot.relay = None;
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("relay_url", &self.shared.config.relay_url)
            .finish_non_exhaustive()
    }
}
