//! Fuzz target for inbound text classification
//!
//! Arbitrary text must classify as chat or a control frame without panicking,
//! and every parsed control frame must re-encode to an equal frame.

#![no_main]

use lanshare_core::{ControlMessage, Inbound, classify};
use lanshare_transport::ChannelMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Inbound::Control(control) = classify(ChannelMessage::Text(text.to_string())) {
            let reparsed = ControlMessage::parse(&control.encode());
            assert_eq!(reparsed.as_ref(), Some(&control));
            let _ = control.reason();
        }
    }
});
