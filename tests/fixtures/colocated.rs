//! Wallet sharing the dApp's broadcast bus.

use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use walletlink_core::strategy::{
    BROADCAST_CONNECT, BROADCAST_DISCONNECT, BROADCAST_SIGN_AND_SEND, BROADCAST_SIGN_MESSAGE,
};
use walletlink_discovery::broadcast::{PING, REQUEST_CHANNEL, RESPONSE_CHANNEL};
use walletlink_transport::{BroadcastBus, LocalBroadcastBus};

/// A running co-located wallet
pub struct ColocatedWallet {
    /// Hex-encoded Ed25519 public key it signs with
    pub public_key: String,
    /// Address it discloses
    pub address: String,
    task: JoinHandle<()>,
}

impl Drop for ColocatedWallet {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a wallet answering requests on `bus`.
///
/// With `approve = false` every request except the probe is declined.
///
/// # Panics
///
/// Panics if the bus is already closed.
pub fn spawn_colocated_wallet(
    bus: &Arc<LocalBroadcastBus>,
    address: &str,
    approve: bool,
) -> ColocatedWallet {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = hex::encode(signing_key.verifying_key().to_bytes());
    let mut requests = bus.subscribe(REQUEST_CHANNEL).expect("bus open");

    let responder = Arc::clone(bus);
    let disclosed = address.to_string();
    let key_text = public_key.clone();
    let task = tokio::spawn(async move {
        while let Some(Value::Object(request)) = requests.recv().await {
            let kind = request.get("type").and_then(Value::as_str).unwrap_or_default();
            let mut answer = if kind == PING {
                json!({})
            } else if !approve {
                json!({"error": "User rejected the request"})
            } else {
                answer(kind, &request, &signing_key, &disclosed, &key_text)
            };
            if let Value::Object(map) = &mut answer {
                map.insert("id".to_string(), request.get("id").cloned().unwrap_or(Value::Null));
            }
            let _ = responder.post(RESPONSE_CHANNEL, answer);
        }
    });

    ColocatedWallet {
        public_key,
        address: address.to_string(),
        task,
    }
}

fn answer(
    kind: &str,
    request: &Map<String, Value>,
    signing_key: &SigningKey,
    address: &str,
    public_key: &str,
) -> Value {
    match kind {
        BROADCAST_CONNECT => json!({"address": address, "publicKey": public_key}),
        BROADCAST_SIGN_MESSAGE => {
            let message = request.get("message").and_then(Value::as_str).unwrap_or_default();
            let signature = signing_key.sign(message.as_bytes());
            json!({"signature": hex::encode(signature.to_bytes()), "publicKey": public_key})
        }
        BROADCAST_SIGN_AND_SEND => json!({"hash": format!("0x{}", "ab".repeat(32))}),
        BROADCAST_DISCONNECT => json!({}),
        other => json!({"error": format!("unsupported request {other}")}),
    }
}
