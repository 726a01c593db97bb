//! Fuzz target for plaintext relay frames
//!
//! Tests that control frames and envelope JSON are parsed without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use walletlink_discovery::relay::{
    ConnectResponsePayload, ControlFrame, Envelope, ErrorPayload, SignMessageResponsePayload,
};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(control) = ControlFrame::parse(text) {
        let _ = control.is_ack();
    }

    // Payload decoding runs on whatever an authenticated peer sent
    if let Ok(envelope) = serde_json::from_str::<Envelope>(text) {
        let _ = envelope.payload_as::<ConnectResponsePayload>();
        let _ = envelope.payload_as::<SignMessageResponsePayload>();
        let _ = envelope.payload_as::<ErrorPayload>();
    }
});
