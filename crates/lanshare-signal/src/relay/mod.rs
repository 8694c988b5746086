//! # Signaling Relay
//!
//! A minimal broadcast relay for exchanging session descriptions when the
//! operators cannot copy/paste between machines.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │   Relay Server  │
//!                    │ (line broadcast)│
//!                    └────────┬────────┘
//!                             │
//!              ┌──────────────┴──────────────┐
//!              │                              │
//!              ▼                              ▼
//!       ┌─────────────┐                ┌─────────────┐
//!       │  Offerer    │                │  Answerer   │
//!       └─────────────┘                └─────────────┘
//! ```
//!
//! The relay does not multiplex sessions: it forwards every line to every
//! other client, so it admits two clients by default.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lanshare_signal::relay::{RelayClient, RelayServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = RelayServer::bind("0.0.0.0:8080".parse()?).await?;
//! tokio::spawn(server.run());
//!
//! let mut client = RelayClient::connect("127.0.0.1:8080").await?;
//! client.send_line(r#"{"type":"offer","sdp":{"type":"offer","sdp":"v=0..."}}"#).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RelayClient;
pub use protocol::{
    DEFAULT_MAX_LINE_LEN, DEFAULT_RELAY_PORT, EnvelopeKind, READY_TYPE, RelayEnvelope, RelayError,
    RelayMessage, normalize_relay_addr,
};
pub use server::{RelayServer, RelayServerConfig};
