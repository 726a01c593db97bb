//! Relay wire protocol.
//!
//! Peers exchange [`Envelope`]s, each serialized as camelCase JSON and sealed
//! individually under the channel key before it is written as a WebSocket
//! text frame. The relay itself only ever speaks a tiny plaintext control
//! vocabulary ([`ControlFrame`]), which carries no session data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use walletlink_crypto::{ChannelKey, CryptoError};
use walletlink_transport::TransportError;

/// Envelope message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Peer announces itself after opening the socket
    SessionInit,
    /// Session acknowledged (informational)
    SessionAck,
    /// Peer ends the session
    SessionEnd,
    /// Keepalive
    Heartbeat,
    /// dApp asks the wallet for its identity
    ConnectRequest,
    /// Wallet approves or declines the connection
    ConnectResponse,
    /// dApp asks the wallet to sign a message
    SignMessageRequest,
    /// Wallet answers a sign request
    SignMessageResponse,
    /// Peer-reported error
    Error,
}

impl MessageType {
    /// Wire name of this message type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInit => "session_init",
            Self::SessionAck => "session_ack",
            Self::SessionEnd => "session_end",
            Self::Heartbeat => "heartbeat",
            Self::ConnectRequest => "connect_request",
            Self::ConnectResponse => "connect_response",
            Self::SignMessageRequest => "sign_message_request",
            Self::SignMessageResponse => "sign_message_response",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of wire transport between the dApp and the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message type
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Session this envelope belongs to
    pub session_id: String,
    /// Opaque JSON payload
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Milliseconds since the Unix epoch at send time
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: MessageType, session_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            payload,
            timestamp: now_millis(),
        }
    }

    /// Create an envelope with an empty payload.
    #[must_use]
    pub fn empty(kind: MessageType, session_id: impl Into<String>) -> Self {
        Self::new(kind, session_id, Map::new())
    }

    /// Create an envelope from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if the payload does not
    /// serialize to a JSON object.
    pub fn with_payload<T: Serialize>(
        kind: MessageType,
        session_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, RelayError> {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => Ok(Self::new(kind, session_id, map)),
            Ok(other) => Err(RelayError::Serialization(format!(
                "payload must be an object, got {other}"
            ))),
            Err(e) => Err(RelayError::Serialization(e.to_string())),
        }
    }

    /// Decode the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Deserialization`] if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, RelayError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| RelayError::Deserialization(format!("{} payload: {e}", self.kind)))
    }

    /// Serialize and seal this envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] or [`RelayError::Crypto`].
    pub fn seal(&self, key: &ChannelKey) -> Result<String, RelayError> {
        let json = serde_json::to_vec(self).map_err(|e| RelayError::Serialization(e.to_string()))?;
        Ok(key.seal(&json)?)
    }

    /// Open a sealed text frame and parse the envelope inside.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Crypto`] if the frame does not authenticate under
    /// `key`, or [`RelayError::Deserialization`] if the plaintext is not an envelope.
    pub fn open(frame: &str, key: &ChannelKey) -> Result<Self, RelayError> {
        let plaintext = key.open(frame)?;
        serde_json::from_slice(&plaintext).map_err(|e| RelayError::Deserialization(e.to_string()))
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Plaintext control frame spoken by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Control type (`session_ack` or `ack` are the only accepted values)
    #[serde(rename = "type")]
    pub kind: String,
    /// Session the relay bound the socket to, when it says so
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ControlFrame {
    /// Build the acknowledgement a relay sends when a socket joins a session.
    #[must_use]
    pub fn session_ack(session_id: &str) -> Self {
        Self {
            kind: MessageType::SessionAck.as_str().to_string(),
            session_id: Some(session_id.to_string()),
        }
    }

    /// Parse a plaintext frame. `None` if it is not a JSON control frame.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Whether this is an acknowledgement (the only plaintext frame accepted).
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.kind == "session_ack" || self.kind == "ack"
    }

    /// Render as a text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        // A struct of two strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `session_init` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInitPayload {
    /// `dapp` or `wallet`
    pub role: String,
    /// Human-readable application name shown by the wallet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dapp_name: Option<String>,
    /// Origin of the requesting application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl SessionInitPayload {
    /// Hello sent by a dApp.
    #[must_use]
    pub fn dapp(name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            role: "dapp".to_string(),
            dapp_name: Some(name.into()),
            origin: Some(origin.into()),
        }
    }

    /// Hello sent by a wallet.
    #[must_use]
    pub fn wallet() -> Self {
        Self {
            role: "wallet".to_string(),
            dapp_name: None,
            origin: None,
        }
    }
}

/// `connect_response` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponsePayload {
    /// Whether the user approved the connection
    #[serde(default)]
    pub approved: bool,
    /// Wallet address (present when approved)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Wallet public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Reason for a decline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `sign_message_request` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageRequestPayload {
    /// Correlation id (32 hex chars)
    pub request_id: String,
    /// Message to sign
    pub message: String,
    /// Origin of the requesting application
    pub origin: String,
}

/// `sign_message_response` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageResponsePayload {
    /// Correlation id of the request being answered
    pub request_id: String,
    /// Whether the user approved signing
    #[serde(default)]
    pub approved: bool,
    /// Signature (present when approved)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Signer public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Reason for a decline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `error` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Request the error refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Error text
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Frame failed to open or seal
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Socket-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connection timeout
    #[error("Connection timeout")]
    Timeout,

    /// Client already closed
    #[error("Relay connection closed")]
    Closed,

    /// Session id not usable in a relay path
    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    /// Relay at capacity
    #[error("Server at capacity")]
    ServerFull,
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Transport(TransportError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ChannelKey {
        walletlink_crypto::derive_channel_key(&[0x24; 32]).unwrap()
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope {
            kind: MessageType::SignMessageRequest,
            session_id: "abc".to_string(),
            payload: json!({"requestId": "r1"}).as_object().cloned().unwrap(),
            timestamp: 42,
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "sign_message_request",
                "sessionId": "abc",
                "payload": {"requestId": "r1"},
                "timestamp": 42
            })
        );
    }

    #[test]
    fn test_envelope_seal_open() {
        let key = key();
        let env = Envelope::with_payload(
            MessageType::SessionInit,
            "sess",
            &SessionInitPayload::dapp("HODL Holdings", "https://app.example"),
        )
        .unwrap();

        let frame = env.seal(&key).unwrap();
        assert!(!frame.contains("session_init"));
        assert_eq!(Envelope::open(&frame, &key).unwrap(), env);
    }

    #[test]
    fn test_envelope_open_wrong_key() {
        let env = Envelope::empty(MessageType::Heartbeat, "s");
        let frame = env.seal(&key()).unwrap();
        let other = ChannelKey::new([1u8; 32]);
        assert!(matches!(
            Envelope::open(&frame, &other),
            Err(RelayError::Crypto(CryptoError::AuthenticationFailed))
        ));
    }

    #[test]
    fn test_envelope_open_non_envelope_plaintext() {
        let key = key();
        let frame = key.seal(br#"{"hello":"world"}"#).unwrap();
        assert!(matches!(
            Envelope::open(&frame, &key),
            Err(RelayError::Deserialization(_))
        ));
    }

    #[test]
    fn test_envelope_missing_payload_defaults() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"session_end","sessionId":"s"}"#).unwrap();
        assert_eq!(env.kind, MessageType::SessionEnd);
        assert!(env.payload.is_empty());
        assert_eq!(env.timestamp, 0);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"type":"transfer","sessionId":"s","payload":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_with_payload_requires_object() {
        assert!(matches!(
            Envelope::with_payload(MessageType::Error, "s", &"text"),
            Err(RelayError::Serialization(_))
        ));
    }

    #[test]
    fn test_payload_as_connect_response() {
        let env = Envelope::new(
            MessageType::ConnectResponse,
            "s",
            json!({"approved": true, "address": "sultan1abc", "publicKey": "pk"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let payload: ConnectResponsePayload = env.payload_as().unwrap();
        assert!(payload.approved);
        assert_eq!(payload.address.as_deref(), Some("sultan1abc"));
        assert_eq!(payload.public_key.as_deref(), Some("pk"));
        assert_eq!(payload.error, None);
    }

    #[test]
    fn test_sign_response_defaults_to_declined() {
        let env = Envelope::new(
            MessageType::SignMessageResponse,
            "s",
            json!({"requestId": "r"}).as_object().cloned().unwrap(),
        );
        let payload: SignMessageResponsePayload = env.payload_as().unwrap();
        assert!(!payload.approved);
        assert_eq!(payload.request_id, "r");
    }

    #[test]
    fn test_error_payload_accepts_message_alias() {
        let payload: ErrorPayload =
            serde_json::from_value(json!({"requestId": "r", "message": "boom"})).unwrap();
        assert_eq!(payload.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_control_frame() {
        let ack = ControlFrame::session_ack("abc");
        assert_eq!(ack.to_text(), r#"{"type":"session_ack","sessionId":"abc"}"#);
        assert!(ControlFrame::parse(&ack.to_text()).unwrap().is_ack());
        assert!(ControlFrame::parse(r#"{"type":"ack"}"#).unwrap().is_ack());
        assert!(!ControlFrame::parse(r#"{"type":"connect_response"}"#).unwrap().is_ack());
        assert!(ControlFrame::parse("not json").is_none());
    }

    #[test]
    fn test_message_type_names_match_serde() {
        for kind in [
            MessageType::SessionInit,
            MessageType::SessionAck,
            MessageType::SessionEnd,
            MessageType::Heartbeat,
            MessageType::ConnectRequest,
            MessageType::ConnectResponse,
            MessageType::SignMessageRequest,
            MessageType::SignMessageResponse,
            MessageType::Error,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(RelayError::Timeout.to_string(), "Connection timeout");
        assert_eq!(RelayError::Closed.to_string(), "Relay connection closed");
    }
}
