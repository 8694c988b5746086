//! Fuzz target for relayed lines and relay addresses

#![no_main]

use libfuzzer_sys::fuzz_target;
use lanshare_signal::relay::{RelayEnvelope, normalize_relay_addr};

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = RelayEnvelope::decode(line);
        let _ = normalize_relay_addr(line);
    }
});
