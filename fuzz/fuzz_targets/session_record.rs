//! Fuzz test for persisted session records
//!
//! Tests that arbitrary store contents don't cause panics when restored.

#![no_main]

use libfuzzer_sys::fuzz_target;
use walletlink_core::{PersistedSession, Session};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Corrupt records are discarded, never trusted
        if let Ok(record) = PersistedSession::from_json(s) {
            let _ = Session::from_persisted(&record);
        }
    }
});
