//! Property-based tests for WalletLink
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Pairing Link Properties
// ============================================================================

mod pairing_properties {
    use super::*;
    use walletlink_core::{PairingPayload, WalletLinkConfig};
    use walletlink_crypto::SessionSecret;

    proptest! {
        /// Parsing never panics, whatever the scanner hands us
        #[test]
        fn parse_never_panics(link in ".{0,512}") {
            let _ = PairingPayload::parse(&link);
        }

        /// Parsing never panics on near-valid deep links either
        #[test]
        fn parse_deep_link_noise_never_panics(query in "[a-z=&%0-9A-F?:/.]{0,256}") {
            let _ = PairingPayload::parse(&format!("https://wallet.sltn.io/connect?session={query}"));
            let _ = PairingPayload::parse(&format!("sultan://wl?{query}"));
        }

        /// Names and origins with reserved characters survive the link
        #[test]
        fn link_preserves_fields(
            id_bytes in any::<[u8; 16]>(),
            key in any::<[u8; 32]>(),
            app_name in "\\PC{1,40}",
            origin in "https?://[a-z0-9.-]{1,20}(:[0-9]{1,5})?",
        ) {
            let config = WalletLinkConfig {
                app_name: app_name.clone(),
                origin: origin.clone(),
                ..WalletLinkConfig::with_relay("wss://relay.example/base?x=1&y=2")
            };
            let session_id = hex::encode(id_bytes);
            let secret = SessionSecret::from_bytes(key);
            let link = PairingPayload::new(&config, &session_id, &secret).to_link(&config);

            let parsed = PairingPayload::parse(&link).unwrap();
            prop_assert_eq!(&parsed.session_id, &session_id);
            prop_assert_eq!(parsed.secret.as_bytes(), &key);
            prop_assert_eq!(parsed.relay_url.as_str(), "wss://relay.example/base?x=1&y=2");
            prop_assert_eq!(&parsed.app_name, &app_name);
            prop_assert_eq!(&parsed.origin, &origin);
        }

        /// A key that is not exactly 32 bytes is refused
        #[test]
        fn wrong_key_length_rejected(len in 0usize..64) {
            prop_assume!(len != 32);
            let key = base64_standard(&vec![7u8; len]);
            let link = format!(
                "sultan://wl?s={}&k={}&b=wss%3A%2F%2Frelay.example&n=App&o=https%3A%2F%2Fa.example",
                "ab".repeat(16),
                percent_encode_b64(&key),
            );
            prop_assert!(PairingPayload::parse(&link).is_err());
        }
    }

    fn base64_standard(bytes: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    fn percent_encode_b64(text: &str) -> String {
        text.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
    }
}

// ============================================================================
// Envelope Encryption Properties
// ============================================================================

mod envelope_properties {
    use super::*;
    use walletlink_crypto::aead::{ChannelKey, Iv};
    use walletlink_crypto::kdf::derive_channel_key;
    use walletlink_discovery::relay::{Envelope, MessageType, SignMessageRequestPayload};

    proptest! {
        /// A frame sealed under one session key never opens under another
        #[test]
        fn wrong_key_never_opens(
            key_a in any::<[u8; 32]>(),
            key_b in any::<[u8; 32]>(),
            message in ".{0,200}",
        ) {
            prop_assume!(key_a != key_b);
            let a = derive_channel_key(&key_a).unwrap();
            let b = derive_channel_key(&key_b).unwrap();

            let request = SignMessageRequestPayload {
                request_id: "0123456789abcdef0123456789abcdef".to_string(),
                message,
                origin: "https://hodl.example".to_string(),
            };
            let envelope = Envelope::with_payload(
                MessageType::SignMessageRequest,
                "fedcba9876543210fedcba9876543210",
                &request,
            ).unwrap();
            let frame = envelope.seal(&a).unwrap();

            prop_assert!(Envelope::open(&frame, &b).is_err());
            let opened = Envelope::open(&frame, &a).unwrap();
            prop_assert_eq!(opened.payload_as::<SignMessageRequestPayload>().unwrap(), request);
        }

        /// Flipping any bit of ciphertext or tag fails authentication
        #[test]
        fn tampering_detected(
            key in any::<[u8; 32]>(),
            iv in any::<[u8; 12]>(),
            plaintext in prop::collection::vec(any::<u8>(), 0..256),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = ChannelKey::new(key);
            let iv = Iv::from_bytes(iv);
            let mut sealed = key.encrypt(&iv, &plaintext).unwrap();
            let at = position.index(sealed.len());
            sealed[at] ^= 1 << bit;
            prop_assert!(key.decrypt(&iv, &sealed).is_err());
        }

        /// Garbage never opens and never panics
        #[test]
        fn garbage_frames_rejected(key in any::<[u8; 32]>(), frame in ".{0,300}") {
            let key = ChannelKey::new(key);
            prop_assert!(Envelope::open(&frame, &key).is_err());
        }
    }

    #[test]
    fn test_sealing_draws_fresh_ivs() {
        use std::collections::HashSet;
        let key = ChannelKey::new([0x11; 32]);
        let ivs: HashSet<Vec<u8>> = (0..256)
            .map(|_| {
                let blob = key.seal(b"same plaintext").unwrap();
                let raw = {
                    use base64::Engine;
                    base64::engine::general_purpose::STANDARD.decode(blob).unwrap()
                };
                raw[..12].to_vec()
            })
            .collect();
        assert_eq!(ivs.len(), 256);
    }
}

// ============================================================================
// Session Lifetime Properties
// ============================================================================

mod lifetime_properties {
    use super::*;
    use std::time::Duration;
    use walletlink_core::session::is_expired;

    proptest! {
        /// Once expired, a session stays expired
        #[test]
        fn expiry_is_monotonic(
            created_at in 0u64..(1 << 48),
            ttl_ms in 0u64..(1 << 32),
            first in 0u64..(1 << 40),
            later in 0u64..(1 << 40),
        ) {
            let ttl = Duration::from_millis(ttl_ms);
            let now = created_at + first;
            if is_expired(created_at, ttl, now) {
                prop_assert!(is_expired(created_at, ttl, now + later));
            }
        }

        /// Exactly at the boundary a session is still live; one ms later it is not
        #[test]
        fn expiry_boundary(created_at in 0u64..(1 << 48), ttl_ms in 0u64..(1 << 32)) {
            let ttl = Duration::from_millis(ttl_ms);
            prop_assert!(!is_expired(created_at, ttl, created_at + ttl_ms));
            prop_assert!(is_expired(created_at, ttl, created_at + ttl_ms + 1));
        }

        /// A clock behind the creation time never expires a session
        #[test]
        fn clock_skew_never_expires(created_at in 1u64..(1 << 48), behind in 1u64..(1 << 20)) {
            let now = created_at.saturating_sub(behind);
            prop_assert!(!is_expired(created_at, Duration::ZERO, now));
        }
    }
}

// ============================================================================
// Request Correlation Properties
// ============================================================================

mod correlation_properties {
    use super::*;
    use walletlink_core::PendingRequests;

    proptest! {
        /// Responses in any order reach their own requester exactly once
        #[test]
        fn out_of_order_resolution(order in Just((0..24usize).collect::<Vec<_>>()).prop_shuffle()) {
            let pending = PendingRequests::<usize>::new();
            let ids: Vec<String> = (0..order.len()).map(|i| format!("{i:032x}")).collect();
            let mut receivers: Vec<_> = ids.iter().map(|id| pending.register(id).unwrap()).collect();

            for &i in &order {
                prop_assert!(pending.resolve(&ids[i], i));
                // A duplicate response finds nothing to resolve
                prop_assert!(!pending.resolve(&ids[i], usize::MAX));
            }
            prop_assert!(pending.is_empty());

            for (i, receiver) in receivers.iter_mut().enumerate() {
                prop_assert_eq!(receiver.try_recv().unwrap().unwrap(), i);
            }
        }
    }
}

// ============================================================================
// Identifier Properties
// ============================================================================

mod identifier_properties {
    use walletlink_crypto::random::random_id;
    use walletlink_discovery::relay::is_valid_session_id;

    #[test]
    fn test_random_ids_are_hex_and_distinct() {
        let ids: std::collections::HashSet<String> =
            (0..512).map(|_| random_id().unwrap()).collect();
        assert_eq!(ids.len(), 512);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
            assert!(is_valid_session_id(id));
        }
    }
}
