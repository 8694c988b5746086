//! Connectivity stack abstraction.
//!
//! A [`PeerConnector`] owns one peer connection attempt: it produces local
//! descriptions, consumes remote ones, gathers candidates and finally yields
//! the open [`Channel`]. The negotiation state machine drives it; the
//! connector itself keeps no negotiation state beyond what the underlying
//! stack needs.

use crate::transport::{Channel, ChannelEvents, TransportResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session description type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Roll back a pending offer
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Pranswer => write!(f, "pranswer"),
            Self::Answer => write!(f, "answer"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Session description as exchanged during negotiation.
///
/// Serializes as `{"type": "offer", "sdp": "v=0\r\n..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Encode as a single-line JSON string
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Connectivity stack driven by the session negotiator.
///
/// Offerer sequence: `create_offer` → `gathering_complete` →
/// `local_description` → (remote answer) `accept_answer` → `wait_channel`.
///
/// Answerer sequence: `accept_offer` → `gathering_complete` →
/// `local_description` → `wait_channel`.
///
/// `close` tears the attempt down and leaves the connector ready for a fresh
/// `create_offer` or `accept_offer`.
#[async_trait]
pub trait PeerConnector: Send {
    /// Channel type produced once the connection is up
    type Channel: Channel + 'static;

    /// Create a local offer (and the data channel it announces) and install
    /// it as the local description. Candidate gathering starts here.
    async fn create_offer(&mut self) -> TransportResult<()>;

    /// Install a remote offer, create the local answer and install it as the
    /// local description. Candidate gathering starts here.
    async fn accept_offer(&mut self, offer: &SessionDescription) -> TransportResult<()>;

    /// Install the remote answer for a pending local offer.
    async fn accept_answer(&mut self, answer: &SessionDescription) -> TransportResult<()>;

    /// Resolve once candidate gathering has completed.
    ///
    /// Callers bound this with a timeout; it may never resolve on hostile
    /// networks.
    async fn gathering_complete(&mut self);

    /// Current local description, including every candidate gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Wait for the data channel to open and hand it over.
    ///
    /// Only the first successful call returns the channel.
    async fn wait_channel(&mut self) -> TransportResult<(Arc<Self::Channel>, ChannelEvents)>;

    /// Check if a data channel has opened on this attempt
    fn channel_opened(&self) -> bool;

    /// Tear down the current attempt. Idempotent.
    async fn close(&mut self) -> TransportResult<()>;
}
