//! WebSocket halves over `tokio-tungstenite`.
//!
//! Both ends of a relay connection use the same [`WsWriter`]/[`WsReader`]
//! pair: [`connect`] on the dApp/wallet side and [`accept`] on the relay
//! server side. The halves are independent so a reader task and a writer
//! (or heartbeat) task can own one each.

use crate::transport::{TransportError, TransportResult};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Received WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if the connection is gone.
    pub async fn send_text(&mut self, text: &str) -> TransportResult<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_owned().into()))
            .await
            .map_err(ws_error)
    }

    /// Send a pong frame in response to a ping.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if the send fails.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> TransportResult<()> {
        self.sink
            .send(tungstenite::Message::Pong(data.into()))
            .await
            .map_err(ws_error)
    }

    /// Send a close frame and flush the sink.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if closing fails.
    pub async fn close(&mut self) -> TransportResult<()> {
        self.sink.close().await.map_err(ws_error)
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<TransportResult<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ws_error(e))),
            };
            let converted = match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text.to_string()),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data.to_vec()),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data.to_vec()),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data.to_vec()),
                tungstenite::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    WsMessage::Close { code, reason }
                }
                tungstenite::Message::Frame(_) => continue,
            };
            return Some(Ok(converted));
        }
    }
}

/// Connect to a WebSocket URL, bounded by `timeout`.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] for a malformed URL,
/// [`TransportError::Timeout`] if the handshake does not finish in time and
/// [`TransportError::ConnectionFailed`] if it is refused.
pub async fn connect(url: &str, timeout: Duration) -> TransportResult<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

    let (ws_stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    tracing::debug!("WebSocket connected to {}", url);
    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Accept a WebSocket upgrade on an already accepted TCP stream.
///
/// Returns the request path (for example `/session/<id>`) with the halves.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the upgrade handshake fails.
pub async fn accept(stream: TcpStream) -> TransportResult<(String, WsWriter, WsReader)> {
    use tungstenite::handshake::server::{ErrorResponse, Request, Response};

    let mut path = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        MaybeTlsStream::Plain(stream),
        |request: &Request, response: Response| {
            path = request.uri().path().to_string();
            Ok::<Response, ErrorResponse>(response)
        },
    )
    .await
    .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    let (sink, stream) = ws_stream.split();
    Ok((path, WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

fn ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Io(io) => TransportError::Io(io),
        other => TransportError::WebSocket(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_http_to_ws_scheme() {
        assert_eq!(http_to_ws_scheme("https://relay.example"), "wss://relay.example");
        assert_eq!(http_to_ws_scheme("http://127.0.0.1:8080"), "ws://127.0.0.1:8080");
        assert_eq!(http_to_ws_scheme("wss://relay.example"), "wss://relay.example");
        assert_eq!(http_to_ws_scheme("ws://relay.example"), "ws://relay.example");
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        let result = connect("not a url", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{addr}/session/x"), Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_accept_reports_path_and_echoes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let (path, mut writer, mut reader) = accept(tcp).await.unwrap();
            if let Some(Ok(WsMessage::Text(text))) = reader.recv().await {
                writer.send_text(&format!("{path}|{text}")).await.unwrap();
            }
        });

        let (mut writer, mut reader) =
            connect(&format!("ws://{addr}/session/abc"), Duration::from_secs(2))
                .await
                .unwrap();
        writer.send_text("hello").await.unwrap();

        let reply = reader.recv().await.unwrap().unwrap();
        assert_eq!(reply, WsMessage::Text("/session/abc|hello".to_string()));
        server.await.unwrap();
    }
}
