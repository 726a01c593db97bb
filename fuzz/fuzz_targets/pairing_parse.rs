//! Fuzz target for pairing link parsing
//!
//! Links are scanned from QR codes and pasted by users.

#![no_main]

use libfuzzer_sys::fuzz_target;
use walletlink_core::{PairingPayload, WalletLinkConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(link) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(payload) = PairingPayload::parse(link) else {
        return;
    };

    // Whatever parsed must survive being re-linked
    let config = WalletLinkConfig::default();
    let relinked = PairingPayload::parse(&payload.to_link(&config)).expect("relink parses");
    assert_eq!(relinked.session_id, payload.session_id);
    assert_eq!(relinked.secret.as_bytes(), payload.secret.as_bytes());
    assert_eq!(relinked.relay_url, payload.relay_url);
    assert_eq!(relinked.app_name, payload.app_name);
    assert_eq!(relinked.origin, payload.origin);
});
