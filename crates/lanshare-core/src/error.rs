//! Error types for the transfer protocol.
//!
//! Every transfer failure maps to a reason string sent to the peer
//! ([`TransferError::wire_reason`]). Failures that merely echo something the
//! peer already knows are never sent back ([`TransferError::is_peer_echo`]),
//! which keeps the two ends from bouncing notifications at each other.

use crate::transfer::CancelOrigin;
use lanshare_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Wire reason: the local sender cancelled
pub const REASON_SENDER_CANCELLED: &str = "sender cancelled";
/// Wire reason: the local receiver cancelled
pub const REASON_RECEIVER_CANCELLED: &str = "receiver cancelled";
/// Wire reason: default for a `file-cancel` without reason
pub const REASON_PEER_CANCELLED: &str = "peer cancelled";
/// Wire reason: default for a `file-error` without reason
pub const REASON_PEER_ERROR: &str = "peer error";
/// Wire reason: binary chunk arrived with no open transfer
pub const REASON_MISSING_METADATA: &str = "missing metadata before file data";
/// Wire reason: metadata rejected by the rate limiter
pub const REASON_RATE_LIMITED: &str = "rate limited";
/// Wire reason: the channel closed mid-transfer
pub const REASON_CHANNEL_CLOSED: &str = "channel closed";
/// Wire reason: the channel failed mid-send
pub const REASON_CONNECTION_RESET: &str = "connection reset";
/// Wire reason: a chunk pushed the received total past the declared size
pub const REASON_CHUNK_OVERFLOW: &str = "chunk exceeds declared size";
/// Wire reason: the source ran dry before the declared size
pub const REASON_SOURCE_ENDED: &str = "source ended early";
/// Local reason: a new `file-meta` replaced an open inbound transfer
pub const REASON_SUPERSEDED: &str = "superseded";

/// Reasons that are never echoed back to the peer
pub const SUPPRESSED_REASONS: [&str; 5] = [
    REASON_SENDER_CANCELLED,
    REASON_RECEIVER_CANCELLED,
    REASON_PEER_CANCELLED,
    REASON_MISSING_METADATA,
    REASON_PEER_ERROR,
];

/// Transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// Channel not open at send time
    #[error("Channel unavailable")]
    ChannelUnavailable,

    /// Transfer cancelled locally or by the peer
    #[error("Transfer cancelled ({origin}): {reason}")]
    Cancelled {
        /// Which side cancelled
        origin: CancelOrigin,
        /// Cancellation reason
        reason: Cow<'static, str>,
    },

    /// Peer reported a `file-error`
    #[error("Peer reported error: {reason}")]
    PeerError {
        /// Reason sent by the peer
        reason: Cow<'static, str>,
    },

    /// Too many `file-meta` messages within the rate window
    #[error("Metadata rate limit exceeded")]
    RateLimitExceeded,

    /// An outbound transfer is already in flight
    #[error("Another file transfer is already in progress")]
    TransferInProgress,

    /// No transfer to act on
    #[error("No active transfer")]
    NoActiveTransfer,

    /// Peer violated the transfer protocol
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// Object source failed
    #[error("Source error: {0}")]
    Source(Cow<'static, str>),

    /// Channel send failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Endpoint task is gone
    #[error("Endpoint closed")]
    EndpointClosed,

    /// Transfer settings are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

impl TransferError {
    /// Reason string carried in `file-error`/`file-cancel` frames
    #[must_use]
    pub fn wire_reason(&self) -> Cow<'static, str> {
        match self {
            Self::ChannelUnavailable | Self::EndpointClosed => REASON_CHANNEL_CLOSED.into(),
            Self::Cancelled { reason, .. } | Self::PeerError { reason } => reason.clone(),
            Self::RateLimitExceeded => REASON_RATE_LIMITED.into(),
            Self::TransferInProgress | Self::NoActiveTransfer => self.to_string().into(),
            Self::Protocol(reason) | Self::Source(reason) | Self::InvalidConfig(reason) => {
                reason.clone()
            }
            Self::Transport(TransportError::Closed | TransportError::NotOpen) => {
                REASON_CHANNEL_CLOSED.into()
            }
            Self::Transport(_) => REASON_CONNECTION_RESET.into(),
        }
    }

    /// Check if reporting this failure to the peer would only echo something
    /// the peer already knows
    #[must_use]
    pub fn is_peer_echo(&self) -> bool {
        match self {
            Self::Cancelled {
                origin: CancelOrigin::Peer,
                ..
            }
            | Self::PeerError { .. } => true,
            _ => SUPPRESSED_REASONS.contains(&self.wire_reason().as_ref()),
        }
    }

    /// Check if this is a cancellation (as opposed to a failure)
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
