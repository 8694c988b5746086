//! # LANShare Transport
//!
//! Channel layer for the LANShare protocol.
//!
//! This crate provides:
//! - The [`Channel`] trait: an ordered, reliable, message-oriented duplex
//!   channel with a backpressure signal (buffered amount + low-water event)
//! - The [`PeerConnector`] trait: the connectivity stack that turns an
//!   offer/answer exchange into an open [`Channel`]
//! - An in-process channel and connector pair ([`memory`]) used by tests and
//!   benchmarks
//! - A WebRTC data channel backend ([`rtc`], feature `webrtc`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      PeerConnector                               │
//! │   (offer/answer, candidate gathering, channel establishment)    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Channel                                  │
//! │   (text + binary messages, buffered amount, close)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connector;
pub mod memory;
pub mod transport;
#[cfg(feature = "webrtc")]
pub mod rtc;

pub use connector::{PeerConnector, SdpType, SessionDescription};
pub use memory::{Gathering, MemoryChannel, MemoryConnector};
#[cfg(feature = "webrtc")]
pub use rtc::{DEFAULT_STUN_SERVER, WebRtcChannel, WebRtcConnector};
pub use transport::{
    Channel, ChannelEvent, ChannelEvents, ChannelMessage, ChannelState, TransportError,
    TransportResult, TransportStats,
};

/// Label of the single data channel carrying chat, control and chunk frames
pub const CHANNEL_LABEL: &str = "chat";
