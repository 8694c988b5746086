//! # LANShare Signal
//!
//! Session negotiation for the LANShare protocol.
//!
//! This crate provides:
//! - Session description parsing and validation ([`description`])
//! - The offer/answer state machine ([`Negotiator`]) that drives a
//!   [`PeerConnector`](lanshare_transport::PeerConnector) to an open channel
//! - Signaling strategies ([`signaling`]): manual copy/paste and a relayed
//!   line protocol
//! - A minimal broadcast relay server and client ([`relay`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use lanshare_signal::{NegotiationConfig, Negotiator};
//! use lanshare_transport::MemoryConnector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (a, b) = MemoryConnector::pair();
//! let mut offerer = Negotiator::new(a, NegotiationConfig::default());
//! let mut answerer = Negotiator::new(b, NegotiationConfig::default());
//!
//! let offer = offerer.create_offer().await?;
//! let answer = answerer.accept_offer(&offer.description).await?;
//! offerer.accept_answer(&answer.description).await?;
//!
//! let (channel, events) = offerer.connect().await?;
//! # let _ = (channel, events);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod description;
pub mod error;
pub mod negotiator;
pub mod relay;
pub mod signaling;

pub use description::{parse_description, validate_description};
pub use error::{DescriptionError, NegotiationError, SignalError};
pub use negotiator::{NegotiationConfig, NegotiationDescription, NegotiationState, Negotiator, Role};
pub use relay::{RelayClient, RelayError, RelayServer, RelayServerConfig};
pub use signaling::{
    Established, ManualSignaling, RelayedSignaling, SignalingTransport, establish_as_answerer,
    establish_as_offerer,
};
