//! Relays for end-to-end tests: one that records what it forwards and one
//! that drops its sockets on cue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walletlink_discovery::relay::protocol::ControlFrame;
use walletlink_discovery::relay::{RelayServer, SESSION_PATH_PREFIX, TappedFrame};
use walletlink_transport::websocket::{self, WsMessage};

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

// ============================================================================
// Recording relay
// ============================================================================

/// Forwarding relay that keeps a copy of every frame it forwards
pub struct RecordingRelay {
    server: Arc<RelayServer>,
    frames: Arc<Mutex<Vec<TappedFrame>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RecordingRelay {
    /// Bind on loopback and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the loopback socket cannot be bound.
    pub async fn start() -> Self {
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let server = Arc::new(
            RelayServer::bind(loopback())
                .await
                .expect("bind loopback relay")
                .with_tap(tap_tx),
        );
        let frames = Arc::new(Mutex::new(Vec::new()));

        let runner = Arc::clone(&server);
        let serve = tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                tracing::debug!("Test relay stopped: {}", e);
            }
        });
        let sink = Arc::clone(&frames);
        let record = tokio::spawn(async move {
            while let Some(frame) = tap_rx.recv().await {
                if let Ok(mut frames) = sink.lock() {
                    frames.push(frame);
                }
            }
        });

        Self {
            server,
            frames,
            tasks: vec![serve, record],
        }
    }

    /// `ws://` URL of this relay
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// The relay itself
    #[must_use]
    pub fn server(&self) -> &RelayServer {
        &self.server
    }

    /// Every frame forwarded so far, in order
    #[must_use]
    pub fn frames(&self) -> Vec<TappedFrame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl Drop for RecordingRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ============================================================================
// Dropping relay
// ============================================================================

/// Relay that acknowledges every socket, swallows what it receives, and
/// closes each socket after a fixed number of frames
pub struct DroppingRelay {
    url: String,
    received: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl DroppingRelay {
    /// Start a relay that closes each socket once `frames_before_drop`
    /// frames have arrived on it.
    ///
    /// # Panics
    ///
    /// Panics if the loopback socket cannot be bound.
    pub async fn start(frames_before_drop: usize) -> Self {
        let listener = TcpListener::bind(loopback()).await.expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let received = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&received);
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let Ok((path, mut writer, mut reader)) = websocket::accept(tcp).await else {
                        return;
                    };
                    let session_id = path.strip_prefix(SESSION_PATH_PREFIX).unwrap_or(&path);
                    if writer
                        .send_text(&ControlFrame::session_ack(session_id).to_text())
                        .await
                        .is_err()
                    {
                        return;
                    }

                    let mut seen = 0;
                    while let Some(Ok(message)) = reader.recv().await {
                        if let WsMessage::Text(_) = message {
                            counter.fetch_add(1, Ordering::SeqCst);
                            seen += 1;
                            if seen >= frames_before_drop {
                                break;
                            }
                        }
                    }
                    let _ = writer.close().await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}"),
            received,
            task,
        }
    }

    /// `ws://` URL of this relay
    #[must_use]
    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Frames received across all sockets
    #[must_use]
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl Drop for DroppingRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}
