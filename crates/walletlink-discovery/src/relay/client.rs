//! Relay client: one encrypted WebSocket per session.
//!
//! A connected client owns two background tasks. The reader opens every text
//! frame with the channel key and hands decoded frames to the owner over an
//! mpsc channel, in arrival order. The heartbeat task seals a `heartbeat`
//! envelope on a fixed interval. Dropping the client aborts both.

use super::protocol::{ControlFrame, Envelope, MessageType, RelayError, SessionInitPayload};
use super::{
    DEFAULT_RELAY_URL, MAX_FRAME_SIZE, RELAY_CONNECT_TIMEOUT, RELAY_HEARTBEAT_INTERVAL,
    is_valid_session_id, session_url,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walletlink_crypto::ChannelKey;
use walletlink_transport::websocket::{self, WsMessage, WsReader, WsWriter};
use walletlink_transport::TransportStats;

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Relay base URL (`ws://` or `wss://`)
    pub relay_url: String,
    /// Bound on opening the socket
    pub connect_timeout: Duration,
    /// Interval between heartbeat envelopes
    pub heartbeat_interval: Duration,
    /// Capacity of the event channel handed to the owner
    pub event_buffer: usize,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            connect_timeout: RELAY_CONNECT_TIMEOUT,
            heartbeat_interval: RELAY_HEARTBEAT_INTERVAL,
            event_buffer: 64,
        }
    }
}

impl RelayClientConfig {
    /// Config for a given relay URL with default timings.
    #[must_use]
    pub fn with_url(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }
}

/// Frames delivered by the reader task
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A data-plane envelope that opened under the channel key
    Envelope(Envelope),
    /// A plaintext `session_ack`/`ack` from the relay
    ControlAck,
    /// The relay closed the socket
    Closed,
    /// The socket failed
    Error(String),
}

type SharedWriter = Arc<tokio::sync::Mutex<WsWriter>>;

/// Encrypted relay connection for one session
pub struct RelayClient {
    session_id: String,
    key: Arc<ChannelKey>,
    writer: SharedWriter,
    closed: Arc<AtomicBool>,
    stats: Arc<Mutex<TransportStats>>,
    reader_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl RelayClient {
    /// Open the session socket, announce ourselves and start the background tasks.
    ///
    /// Returns the client and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidSession`] for an unusable id,
    /// [`RelayError::Timeout`] if the socket does not open within
    /// `connect_timeout`, or [`RelayError::Transport`] if it is refused or the
    /// hello cannot be sent.
    pub async fn connect(
        config: &RelayClientConfig,
        session_id: &str,
        key: ChannelKey,
        hello: &SessionInitPayload,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), RelayError> {
        if !is_valid_session_id(session_id) {
            return Err(RelayError::InvalidSession(session_id.to_string()));
        }

        let url = session_url(&config.relay_url, session_id);
        let (writer, reader) = match websocket::connect(&url, config.connect_timeout).await {
            Ok(halves) => halves,
            Err(walletlink_transport::TransportError::Timeout) => return Err(RelayError::Timeout),
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Connected to relay for session {}", short_id(session_id));

        let key = Arc::new(key);
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let closed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(TransportStats::new()));

        let init = Envelope::with_payload(MessageType::SessionInit, session_id, hello)?;
        send_sealed(&writer, &key, &stats, &init).await?;

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));

        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&key),
            event_tx,
            Arc::clone(&closed),
            Arc::clone(&stats),
        ));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            Arc::clone(&writer),
            Arc::clone(&key),
            session_id.to_string(),
            config.heartbeat_interval,
            Arc::clone(&closed),
            Arc::clone(&stats),
        ));

        let client = Self {
            session_id: session_id.to_string(),
            key,
            writer,
            closed,
            stats,
            reader_task,
            heartbeat_task,
        };
        Ok((client, event_rx))
    }

    /// Seal and send an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] once the socket is gone, or
    /// [`RelayError::Transport`] if the write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        tracing::debug!(
            "Sending {} for session {}",
            envelope.kind,
            short_id(&self.session_id)
        );
        send_sealed(&self.writer, &self.key, &self.stats, envelope).await
    }

    /// Stop the heartbeat and close the socket. Idempotent.
    pub async fn close(&self) {
        let already = self.closed.swap(true, Ordering::SeqCst);
        self.heartbeat_task.abort();
        if !already {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.close().await {
                tracing::debug!("Relay close for {}: {}", short_id(&self.session_id), e);
            }
        }
        self.reader_task.abort();
    }

    /// Whether the socket is closed (locally or by the relay).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Session this client is bound to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Frame statistics so far.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        *self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.heartbeat_task.abort();
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("session_id", &short_id(&self.session_id))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// First 8 characters of a session id, for logs.
#[must_use]
pub fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

fn with_stats(stats: &Mutex<TransportStats>, f: impl FnOnce(&mut TransportStats)) {
    let mut guard = stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    f(&mut guard);
}

async fn send_sealed(
    writer: &SharedWriter,
    key: &ChannelKey,
    stats: &Mutex<TransportStats>,
    envelope: &Envelope,
) -> Result<(), RelayError> {
    let frame = envelope.seal(key)?;
    let result = writer.lock().await.send_text(&frame).await;
    match result {
        Ok(()) => {
            with_stats(stats, |s| s.record_send(frame.len()));
            Ok(())
        }
        Err(e) => {
            with_stats(stats, TransportStats::record_send_error);
            Err(e.into())
        }
    }
}

async fn read_loop(
    mut reader: WsReader,
    key: Arc<ChannelKey>,
    events: mpsc::Sender<RelayEvent>,
    closed: Arc<AtomicBool>,
    stats: Arc<Mutex<TransportStats>>,
) {
    loop {
        let event = match reader.recv().await {
            Some(Ok(WsMessage::Text(text))) => {
                with_stats(&stats, |s| s.record_recv(text.len()));
                match decode_frame(&text, &key) {
                    Some(event) => event,
                    None => {
                        with_stats(&stats, TransportStats::record_drop);
                        continue;
                    }
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                tracing::warn!("Dropping {}-byte binary frame from relay", data.len());
                with_stats(&stats, TransportStats::record_drop);
                continue;
            }
            // tungstenite answers pings itself
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Close { code, reason })) => {
                tracing::info!("Relay closed the socket ({code}): {reason}");
                closed.store(true, Ordering::SeqCst);
                let _ = events.send(RelayEvent::Closed).await;
                break;
            }
            Some(Err(e)) => {
                if closed.swap(true, Ordering::SeqCst) {
                    break;
                }
                tracing::warn!("Relay socket error: {}", e);
                let _ = events.send(RelayEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                closed.store(true, Ordering::SeqCst);
                let _ = events.send(RelayEvent::Closed).await;
                break;
            }
        };

        if events.send(event).await.is_err() {
            tracing::debug!("Relay event receiver dropped, stopping reader");
            break;
        }
    }
}

/// Decode one text frame: encrypted envelope first, then a plaintext ack.
fn decode_frame(text: &str, key: &ChannelKey) -> Option<RelayEvent> {
    if text.len() > MAX_FRAME_SIZE {
        tracing::warn!("Dropping oversized relay frame ({} bytes)", text.len());
        return None;
    }

    match Envelope::open(text, key) {
        Ok(envelope) => Some(RelayEvent::Envelope(envelope)),
        Err(open_err) => match ControlFrame::parse(text) {
            Some(control) if control.is_ack() => {
                tracing::debug!("Relay acknowledged session (plaintext)");
                Some(RelayEvent::ControlAck)
            }
            Some(control) => {
                tracing::warn!("Dropping plaintext '{}' frame from relay", control.kind);
                None
            }
            None => {
                tracing::warn!("Dropping undecodable relay frame: {}", open_err);
                None
            }
        },
    }
}

async fn heartbeat_loop(
    writer: SharedWriter,
    key: Arc<ChannelKey>,
    session_id: String,
    period: Duration,
    closed: Arc<AtomicBool>,
    stats: Arc<Mutex<TransportStats>>,
) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);

    loop {
        ticker.tick().await;
        if closed.load(Ordering::SeqCst) {
            break;
        }
        let beat = Envelope::empty(MessageType::Heartbeat, session_id.as_str());
        if let Err(e) = send_sealed(&writer, &key, &stats, &beat).await {
            tracing::debug!("Heartbeat for {} failed: {}", short_id(&session_id), e);
        }
    }
}
