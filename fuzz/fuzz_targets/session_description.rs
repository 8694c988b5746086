//! Fuzz target for pasted session descriptions
//!
//! Tests that the description parser handles arbitrary operator input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lanshare_signal::{parse_description, validate_description};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(description) = parse_description(text) {
            // Anything accepted once stays valid
            assert!(validate_description(&description).is_ok());
        }
    }
});
