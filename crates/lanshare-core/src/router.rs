//! Inbound message classification.
//!
//! Chat and control share one text channel: a text frame is a control frame
//! only if it parses as one, everything else is chat.

use crate::frame::ControlMessage;
use bytes::Bytes;
use lanshare_transport::ChannelMessage;

/// A classified inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Plain chat text
    Chat(String),
    /// Transfer control frame
    Control(ControlMessage),
    /// Chunk data
    Chunk(Bytes),
}

/// Classify a received channel message
#[must_use]
pub fn classify(message: ChannelMessage) -> Inbound {
    match message {
        ChannelMessage::Binary(data) => Inbound::Chunk(data),
        ChannelMessage::Text(text) => match ControlMessage::parse(&text) {
            Some(control) => Inbound::Control(control),
            None => Inbound::Chat(text),
        },
    }
}
