//! Forwarding relay server.
//!
//! Sockets join a session room by connecting to `/session/<id>`. The server
//! acknowledges with a plaintext `session_ack` control frame and then
//! forwards every text frame verbatim to the other members of the same room.
//! It never looks inside the frames.

use super::protocol::{ControlFrame, RelayError};
use super::{MAX_FRAME_SIZE, SESSION_PATH_PREFIX, is_valid_session_id};
use crate::relay::client::short_id;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use walletlink_transport::websocket::{self, WsMessage, WsWriter};

type PeerId = u64;
type Room = HashMap<PeerId, mpsc::UnboundedSender<String>>;

/// Per-connection frame rate limiter
struct RateLimiter {
    /// Frames per window
    limit: usize,
    /// Window duration
    window: Duration,
    /// Start of the current window
    started: Instant,
    /// Frames seen in the current window
    count: usize,
}

impl RateLimiter {
    /// Create a new rate limiter
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            started: Instant::now(),
            count: 0,
        }
    }

    /// Check if another frame is allowed
    fn check(&mut self) -> bool {
        let now = Instant::now();

        // Reset counter if window expired
        if now.duration_since(self.started) >= self.window {
            self.started = now;
            self.count = 0;
        }

        if self.count >= self.limit {
            return false;
        }

        self.count += 1;
        true
    }
}

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Maximum number of concurrent session rooms
    pub max_sessions: usize,
    /// Maximum sockets per session room
    pub max_peers_per_session: usize,
    /// Rate limit (frames per connection per second)
    pub rate_limit: usize,
    /// A socket silent for this long is dropped
    pub idle_timeout: Duration,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            max_peers_per_session: 4,
            rate_limit: 100,
            // three missed heartbeats
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// A frame observed while being forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TappedFrame {
    /// Room the frame was forwarded in
    pub session_id: String,
    /// The frame exactly as it crossed the relay
    pub frame: String,
}

/// WebSocket relay grouping sockets by session id
pub struct RelayServer {
    /// Listening socket
    listener: TcpListener,
    /// Bound address
    local_addr: SocketAddr,
    /// Session rooms (session id -> members)
    rooms: Arc<DashMap<String, Room>>,
    /// Server configuration
    config: RelayServerConfig,
    /// Next peer id
    next_peer: Arc<AtomicU64>,
    /// Frames forwarded so far
    forwarded: Arc<AtomicU64>,
    /// Optional observer of forwarded frames
    tap: Option<mpsc::UnboundedSender<TappedFrame>>,
}

impl RelayServer {
    /// Bind a relay server with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, RelayError> {
        Self::bind_with_config(bind_addr, RelayServerConfig::default()).await
    }

    /// Bind a relay server with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind_with_config(
        bind_addr: SocketAddr,
        config: RelayServerConfig,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            RelayError::Transport(walletlink_transport::TransportError::BindFailed(format!(
                "{bind_addr}: {e}"
            )))
        })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            rooms: Arc::new(DashMap::new()),
            config,
            next_peer: Arc::new(AtomicU64::new(1)),
            forwarded: Arc::new(AtomicU64::new(0)),
            tap: None,
        })
    }

    /// Report every forwarded frame on `tap`.
    #[must_use]
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<TappedFrame>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Address the server is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` base URL of this server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Run the accept loop. Never returns under normal operation.
    ///
    /// # Errors
    ///
    /// Returns error if the listening socket fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        tracing::info!("Relay server listening on {}", self.local_addr);

        loop {
            let (tcp, peer_addr) = self.listener.accept().await?;
            let ctx = ConnectionContext {
                rooms: Arc::clone(&self.rooms),
                config: self.config.clone(),
                peer_id: self.next_peer.fetch_add(1, Ordering::Relaxed),
                forwarded: Arc::clone(&self.forwarded),
                tap: self.tap.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = ctx.handle(tcp).await {
                    tracing::debug!("Relay connection from {} ended: {}", peer_addr, e);
                }
            });
        }
    }

    /// Number of live session rooms
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of sockets in a room
    #[must_use]
    pub fn peer_count(&self, session_id: &str) -> usize {
        self.rooms.get(session_id).map_or(0, |room| room.len())
    }

    /// Frames forwarded so far
    #[must_use]
    pub fn frames_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

struct ConnectionContext {
    rooms: Arc<DashMap<String, Room>>,
    config: RelayServerConfig,
    peer_id: PeerId,
    forwarded: Arc<AtomicU64>,
    tap: Option<mpsc::UnboundedSender<TappedFrame>>,
}

impl ConnectionContext {
    async fn handle(self, tcp: TcpStream) -> Result<(), RelayError> {
        let (path, mut writer, mut reader) = websocket::accept(tcp).await?;

        let session_id = match path.strip_prefix(SESSION_PATH_PREFIX) {
            Some(id) if is_valid_session_id(id) => id.to_string(),
            _ => {
                tracing::warn!("Rejecting relay socket on path {}", path);
                let _ = writer.close().await;
                return Err(RelayError::InvalidSession(path));
            }
        };

        let mut outbound = match self.join(&session_id) {
            Ok(rx) => rx,
            Err(e) => {
                let _ = writer.close().await;
                return Err(e);
            }
        };
        tracing::debug!("Peer {} joined session {}", self.peer_id, short_id(&session_id));

        let result = self
            .pump(&session_id, &mut writer, &mut reader, &mut outbound)
            .await;

        self.leave(&session_id);
        let _ = writer.close().await;
        result
    }

    fn join(&self, session_id: &str) -> Result<mpsc::UnboundedReceiver<String>, RelayError> {
        if self.rooms.len() >= self.config.max_sessions && !self.rooms.contains_key(session_id) {
            tracing::warn!("Relay at capacity, refusing session {}", short_id(session_id));
            return Err(RelayError::ServerFull);
        }

        let mut room = self.rooms.entry(session_id.to_string()).or_default();
        if room.len() >= self.config.max_peers_per_session {
            return Err(RelayError::ServerFull);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        room.insert(self.peer_id, tx);
        Ok(rx)
    }

    fn leave(&self, session_id: &str) {
        self.rooms.remove_if_mut(session_id, |_, room| {
            room.remove(&self.peer_id);
            room.is_empty()
        });
        tracing::debug!("Peer {} left session {}", self.peer_id, short_id(session_id));
    }

    async fn pump(
        &self,
        session_id: &str,
        writer: &mut WsWriter,
        reader: &mut websocket::WsReader,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<(), RelayError> {
        writer
            .send_text(&ControlFrame::session_ack(session_id).to_text())
            .await?;

        let mut limiter = RateLimiter::new(self.config.rate_limit, Duration::from_secs(1));

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { return Ok(()) };
                    writer.send_text(&frame).await?;
                }
                incoming = tokio::time::timeout(self.config.idle_timeout, reader.recv()) => {
                    let Ok(incoming) = incoming else {
                        tracing::debug!("Peer {} idle, dropping", self.peer_id);
                        return Err(RelayError::Timeout);
                    };
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            if text.len() > MAX_FRAME_SIZE {
                                tracing::warn!("Dropping oversized frame from peer {}", self.peer_id);
                                continue;
                            }
                            if !limiter.check() {
                                tracing::warn!("Peer {} rate limited", self.peer_id);
                                continue;
                            }
                            self.forward(session_id, text);
                        }
                        Some(Ok(WsMessage::Close { .. })) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn forward(&self, session_id: &str, frame: String) {
        let targets: Vec<mpsc::UnboundedSender<String>> = self
            .rooms
            .get(session_id)
            .map(|room| {
                room.iter()
                    .filter(|(id, _)| **id != self.peer_id)
                    .map(|(_, tx)| tx.clone())
                    .collect()
            })
            .unwrap_or_default();

        for tx in &targets {
            let _ = tx.send(frame.clone());
        }
        self.forwarded.fetch_add(1, Ordering::Relaxed);

        if let Some(tap) = &self.tap {
            let _ = tap.send(TappedFrame {
                session_id: session_id.to_string(),
                frame,
            });
        }
    }
}
