//! Fuzz target for opening sealed envelopes
//!
//! Frames come from an untrusted relay; opening must fail cleanly on
//! anything that was not sealed under the channel key.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use walletlink_crypto::aead::ChannelKey;
use walletlink_discovery::relay::Envelope;

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 32],
    frame: String,
    raw: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let key = ChannelKey::new(input.key);
    let _ = Envelope::open(&input.frame, &key);
    let _ = key.open(&input.frame);

    // Authentic ciphertext over arbitrary plaintext must open but may not parse
    if let Ok(sealed) = key.seal(&input.raw) {
        assert_eq!(key.open(&sealed).ok().as_deref(), Some(input.raw.as_slice()));
        let _ = Envelope::open(&sealed, &key);
    }
});
