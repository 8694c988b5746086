//! Test fixtures
//!
//! - [`EndpointPair`]: two endpoints joined by an in-memory channel
//! - [`WireHarness`]: one transfer manager with raw access to the peer side
//! - [`start_relay`] / [`negotiate_over_relay`]: a full signaling exchange

mod endpoint_pair;
mod wire;

pub use endpoint_pair::{EndpointPair, Events, next_event, start_relay, negotiate_over_relay};
pub use wire::{WireHarness, control_frames};
