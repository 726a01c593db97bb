//! Shared transport error type and frame statistics.

use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt did not complete in time
    #[error("Connection timed out")]
    Timeout,

    /// URL could not be turned into a WebSocket request
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// WebSocket protocol error after the handshake
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// No broadcast primitive is available in this runtime
    #[error("Broadcast channel unavailable")]
    Unavailable,
}

impl TransportError {
    /// Whether retrying the same operation later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::ConnectionFailed(_) | Self::Timeout | Self::WebSocket(_)
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Per-connection frame statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total frames sent
    pub frames_sent: u64,
    /// Total frames received
    pub frames_received: u64,
    /// Frames dropped because they could not be decoded
    pub frames_dropped: u64,
    /// Send errors
    pub send_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a received frame
    pub fn record_recv(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Record a frame that was received but dropped
    pub fn record_drop(&mut self) {
        self.frames_dropped += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats() {
        let mut stats = TransportStats::new();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.frames_sent, 0);

        stats.record_send(100);
        assert_eq!(stats.bytes_sent, 100);
        assert_eq!(stats.frames_sent, 1);

        stats.record_recv(200);
        assert_eq!(stats.bytes_received, 200);
        assert_eq!(stats.frames_received, 1);

        stats.record_drop();
        assert_eq!(stats.frames_dropped, 1);

        stats.record_send_error();
        assert_eq!(stats.send_errors, 1);
    }

    #[test]
    fn test_error_transience() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Closed.is_transient());
        assert!(!TransportError::InvalidUrl("x".into()).is_transient());
        assert!(!TransportError::Unavailable.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::ConnectionFailed("refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: refused");
    }
}
