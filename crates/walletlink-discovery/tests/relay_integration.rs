//! Integration tests for the relay infrastructure

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use walletlink_crypto::{SessionSecret, random::random_id};
use walletlink_discovery::relay::{
    ConnectResponsePayload, Envelope, MessageType, RelayClient, RelayClientConfig, RelayEvent,
    RelayServer, SessionInitPayload, TappedFrame,
};

async fn start_server() -> (Arc<RelayServer>, mpsc::UnboundedReceiver<TappedFrame>) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (tap_tx, tap_rx) = mpsc::unbounded_channel();
    let server = Arc::new(RelayServer::bind(addr).await.unwrap().with_tap(tap_tx));
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    (server, tap_rx)
}

/// Next envelope on `events`, skipping relay acks.
async fn next_envelope(events: &mut mpsc::Receiver<RelayEvent>) -> Envelope {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("event channel closed");
        match event {
            RelayEvent::Envelope(envelope) => return envelope,
            RelayEvent::ControlAck => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

async fn wait_for_ack(events: &mut mpsc::Receiver<RelayEvent>) {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, RelayEvent::ControlAck);
}

#[tokio::test]
async fn test_relay_server_startup() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = RelayServer::bind(addr).await.unwrap();
    assert_ne!(server.local_addr().port(), 0);
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_dapp_and_wallet_exchange_through_relay() {
    let (server, _tap) = start_server().await;
    let config = RelayClientConfig::with_url(server.url());
    let secret = SessionSecret::generate().unwrap();
    let session_id = random_id().unwrap();

    let (dapp, mut dapp_events) = RelayClient::connect(
        &config,
        &session_id,
        secret.channel_key().unwrap(),
        &SessionInitPayload::dapp("HODL Holdings", "https://hodl.example"),
    )
    .await
    .unwrap();
    wait_for_ack(&mut dapp_events).await;

    let (wallet, mut wallet_events) = RelayClient::connect(
        &config,
        &session_id,
        secret.channel_key().unwrap(),
        &SessionInitPayload::wallet(),
    )
    .await
    .unwrap();
    wait_for_ack(&mut wallet_events).await;
    assert_eq!(server.peer_count(&session_id), 2);

    // The dApp sees the wallet's hello
    let hello = next_envelope(&mut dapp_events).await;
    assert_eq!(hello.kind, MessageType::SessionInit);
    assert_eq!(hello.payload_as::<SessionInitPayload>().unwrap().role, "wallet");

    dapp.send(&Envelope::empty(MessageType::ConnectRequest, &session_id))
        .await
        .unwrap();
    let request = next_envelope(&mut wallet_events).await;
    assert_eq!(request.kind, MessageType::ConnectRequest);
    assert_eq!(request.session_id, session_id);

    let approval = ConnectResponsePayload {
        approved: true,
        address: Some("sultan1qpzry9x8gf2tvdw0s3jn54khce6mua7l".to_string()),
        public_key: Some("ab".repeat(32)),
        error: None,
    };
    wallet
        .send(&Envelope::with_payload(MessageType::ConnectResponse, &session_id, &approval).unwrap())
        .await
        .unwrap();
    let response = next_envelope(&mut dapp_events).await;
    assert_eq!(response.kind, MessageType::ConnectResponse);
    assert_eq!(response.payload_as::<ConnectResponsePayload>().unwrap(), approval);

    assert!(server.frames_forwarded() >= 3);
    assert!(dapp.stats().frames_received >= 2);
}

#[tokio::test]
async fn test_relay_only_sees_ciphertext() {
    let (server, mut tap) = start_server().await;
    let config = RelayClientConfig::with_url(server.url());
    let secret = SessionSecret::generate().unwrap();
    let session_id = random_id().unwrap();

    let (dapp, mut dapp_events) = RelayClient::connect(
        &config,
        &session_id,
        secret.channel_key().unwrap(),
        &SessionInitPayload::dapp("HODL Holdings", "https://hodl.example"),
    )
    .await
    .unwrap();
    wait_for_ack(&mut dapp_events).await;
    let (_wallet, mut wallet_events) = RelayClient::connect(
        &config,
        &session_id,
        secret.channel_key().unwrap(),
        &SessionInitPayload::wallet(),
    )
    .await
    .unwrap();
    wait_for_ack(&mut wallet_events).await;

    let mut request = Envelope::empty(MessageType::SignMessageRequest, &session_id);
    request
        .payload
        .insert("message".to_string(), serde_json::json!("transfer 100 SLTN"));
    dapp.send(&request).await.unwrap();
    let received = next_envelope(&mut wallet_events).await;
    assert_eq!(received.payload["message"], "transfer 100 SLTN");

    let other_key = SessionSecret::generate().unwrap().channel_key().unwrap();
    let key = secret.channel_key().unwrap();
    let mut seen = 0;
    while let Ok(tapped) = tap.try_recv() {
        seen += 1;
        assert_eq!(tapped.session_id, session_id);
        assert!(!tapped.frame.contains("transfer"));
        assert!(!tapped.frame.contains("session_init"));
        assert!(!tapped.frame.contains("HODL"));
        assert!(Envelope::open(&tapped.frame, &key).is_ok());
        assert!(Envelope::open(&tapped.frame, &other_key).is_err());
    }
    assert!(seen >= 2);
}

#[tokio::test]
async fn test_wrong_key_frames_are_dropped() {
    let (server, _tap) = start_server().await;
    let config = RelayClientConfig::with_url(server.url());
    let session_id = random_id().unwrap();

    let (_dapp, mut dapp_events) = RelayClient::connect(
        &config,
        &session_id,
        SessionSecret::generate().unwrap().channel_key().unwrap(),
        &SessionInitPayload::dapp("HODL Holdings", "https://hodl.example"),
    )
    .await
    .unwrap();
    wait_for_ack(&mut dapp_events).await;

    let (imposter, mut imposter_events) = RelayClient::connect(
        &config,
        &session_id,
        SessionSecret::generate().unwrap().channel_key().unwrap(),
        &SessionInitPayload::wallet(),
    )
    .await
    .unwrap();
    wait_for_ack(&mut imposter_events).await;
    imposter
        .send(&Envelope::empty(MessageType::ConnectResponse, &session_id))
        .await
        .unwrap();

    let nothing = tokio::time::timeout(Duration::from_millis(300), dapp_events.recv()).await;
    assert!(nothing.is_err(), "undecryptable frames must not surface");
}

#[tokio::test]
async fn test_closing_client_leaves_room() {
    let (server, _tap) = start_server().await;
    let config = RelayClientConfig::with_url(server.url());
    let secret = SessionSecret::generate().unwrap();
    let session_id = random_id().unwrap();

    let (dapp, mut dapp_events) = RelayClient::connect(
        &config,
        &session_id,
        secret.channel_key().unwrap(),
        &SessionInitPayload::dapp("HODL Holdings", "https://hodl.example"),
    )
    .await
    .unwrap();
    wait_for_ack(&mut dapp_events).await;
    assert_eq!(server.session_count(), 1);

    dapp.close().await;
    dapp.close().await;
    assert!(dapp.is_closed());
    assert!(dapp.send(&Envelope::empty(MessageType::Heartbeat, &session_id)).await.is_err());

    for _ in 0..50 {
        if server.session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_connect_to_missing_relay_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = RelayClientConfig::with_url(format!("ws://127.0.0.1:{port}"));
    let result = RelayClient::connect(
        &config,
        &random_id().unwrap(),
        SessionSecret::generate().unwrap().channel_key().unwrap(),
        &SessionInitPayload::wallet(),
    )
    .await;
    assert!(result.is_err());
}
