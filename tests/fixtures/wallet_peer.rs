//! Remote wallet driven by a test.
//!
//! Joins the session named in a pairing link, exactly as the wallet app does
//! after scanning the QR code, and answers requests with a real Ed25519 key.

use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use walletlink_core::PairingPayload;
use walletlink_discovery::relay::{
    ConnectResponsePayload, Envelope, ErrorPayload, MessageType, RelayClient, RelayClientConfig,
    RelayError, RelayEvent, SessionInitPayload, SignMessageRequestPayload,
    SignMessageResponsePayload,
};

/// How long the peer waits for any single frame
pub const PEER_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Wallet end of a pairing
pub struct WalletPeer {
    client: RelayClient,
    events: mpsc::Receiver<RelayEvent>,
    pairing: PairingPayload,
    signing_key: SigningKey,
    address: String,
}

impl WalletPeer {
    /// Join the session in `link` and wait for the relay to acknowledge.
    ///
    /// # Errors
    ///
    /// Returns the relay error if the socket cannot be opened, or
    /// [`RelayError::Timeout`] if no acknowledgement arrives.
    pub async fn join(link: &str, address: &str) -> Result<Self, RelayError> {
        let pairing = PairingPayload::parse(link)
            .map_err(|e| RelayError::InvalidSession(e.to_string()))?;
        Self::join_with_key(pairing, address).await
    }

    /// Join with an already parsed pairing payload.
    ///
    /// # Errors
    ///
    /// See [`WalletPeer::join`].
    pub async fn join_with_key(pairing: PairingPayload, address: &str) -> Result<Self, RelayError> {
        let key = pairing.secret.channel_key()?;
        let (client, mut events) = RelayClient::connect(
            &RelayClientConfig::with_url(&pairing.relay_url),
            &pairing.session_id,
            key,
            &SessionInitPayload::wallet(),
        )
        .await?;

        loop {
            match tokio::time::timeout(PEER_RECV_TIMEOUT, events.recv()).await {
                Ok(Some(RelayEvent::ControlAck)) => break,
                Ok(Some(_)) => {}
                Ok(None) => return Err(RelayError::Closed),
                Err(_) => return Err(RelayError::Timeout),
            }
        }

        tracing::debug!("Test wallet {} joined {}", address, pairing.session_id);
        Ok(Self {
            client,
            events,
            pairing,
            signing_key: SigningKey::generate(&mut OsRng),
            address: address.to_string(),
        })
    }

    /// Session this peer joined
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.pairing.session_id
    }

    /// Pairing payload this peer was given
    #[must_use]
    pub fn pairing(&self) -> &PairingPayload {
        &self.pairing
    }

    /// Wallet address this peer discloses
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hex-encoded Ed25519 public key
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Send a payload of the given type.
    ///
    /// # Panics
    ///
    /// Panics if the frame cannot be sent.
    pub async fn send<T: Serialize>(&self, kind: MessageType, payload: &T) {
        let envelope = Envelope::with_payload(kind, self.session_id(), payload)
            .expect("payload serializes");
        self.client.send(&envelope).await.expect("wallet send");
    }

    /// Approve the connection, disclosing address and public key
    pub async fn approve(&self) {
        let payload = ConnectResponsePayload {
            approved: true,
            address: Some(self.address.clone()),
            public_key: Some(self.public_key_hex()),
            error: None,
        };
        self.send(MessageType::ConnectResponse, &payload).await;
    }

    /// Decline the connection
    pub async fn decline(&self, reason: Option<&str>) {
        let payload = ConnectResponsePayload {
            approved: false,
            error: reason.map(str::to_string),
            ..ConnectResponsePayload::default()
        };
        self.send(MessageType::ConnectResponse, &payload).await;
    }

    /// Next envelope of `kind`, skipping heartbeats and anything else.
    ///
    /// # Panics
    ///
    /// Panics if nothing matching arrives within [`PEER_RECV_TIMEOUT`].
    pub async fn next_of(&mut self, kind: MessageType) -> Envelope {
        loop {
            let event = tokio::time::timeout(PEER_RECV_TIMEOUT, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("no {kind:?} within {PEER_RECV_TIMEOUT:?}"))
                .expect("wallet event channel open");
            if let RelayEvent::Envelope(envelope) = event {
                if envelope.kind == kind {
                    return envelope;
                }
            }
        }
    }

    /// Next signing request
    pub async fn next_sign_request(&mut self) -> SignMessageRequestPayload {
        self.next_of(MessageType::SignMessageRequest)
            .await
            .payload_as()
            .expect("sign request payload")
    }

    /// Sign the request's message with this wallet's key and answer it
    pub async fn sign(&self, request: &SignMessageRequestPayload) {
        let signature = self.signing_key.sign(request.message.as_bytes());
        let payload = SignMessageResponsePayload {
            request_id: request.request_id.clone(),
            approved: true,
            signature: Some(hex::encode(signature.to_bytes())),
            public_key: Some(self.public_key_hex()),
            error: None,
        };
        self.send(MessageType::SignMessageResponse, &payload).await;
    }

    /// Decline a signing request
    pub async fn reject(&self, request: &SignMessageRequestPayload) {
        let payload = SignMessageResponsePayload {
            request_id: request.request_id.clone(),
            approved: false,
            ..SignMessageResponsePayload::default()
        };
        self.send(MessageType::SignMessageResponse, &payload).await;
    }

    /// Report an error for a request
    pub async fn fail(&self, request_id: &str, error: &str) {
        let payload = ErrorPayload {
            request_id: Some(request_id.to_string()),
            error: Some(error.to_string()),
        };
        self.send(MessageType::Error, &payload).await;
    }

    /// End the session from the wallet side
    pub async fn end_session(&self) {
        let envelope = Envelope::empty(MessageType::SessionEnd, self.session_id());
        self.client.send(&envelope).await.expect("wallet send");
    }

    /// Close the socket
    pub async fn leave(self) {
        self.client.close().await;
    }
}
