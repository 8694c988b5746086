//! Error types for session negotiation and signaling.

use crate::negotiator::NegotiationState;
use crate::relay::RelayError;
use lanshare_transport::TransportError;
use std::time::Duration;

/// Reasons a session description is rejected before use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptionError {
    /// Payload is not a JSON object of the expected shape
    #[error("Malformed description: {0}")]
    Malformed(String),

    /// Type tag is not one of offer/pranswer/answer/rollback
    #[error("Unknown description type: {0}")]
    UnknownType(String),

    /// Type tag is valid but not the one this step expects
    #[error("Unexpected description type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Expected tag
        expected: &'static str,
        /// Received tag
        actual: String,
    },

    /// Description body is missing or blank
    #[error("Description body is empty")]
    EmptyBody,

    /// Body lacks the `v=0` version marker
    #[error("Description is missing the version marker")]
    MissingVersion,

    /// Body has no `m=` section
    #[error("Description has no media section")]
    MissingMediaSection,
}

/// Negotiation state machine errors
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// Remote description failed validation; state unchanged
    #[error("Invalid description: {0}")]
    InvalidDescription(#[from] DescriptionError),

    /// An answer arrived with no pending local offer
    #[error("No pending offer to answer")]
    NoPendingOffer,

    /// Operation not valid in the current state
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// State at the time of the call
        state: NegotiationState,
    },

    /// A channel is already open; reset before renegotiating
    #[error("A channel is already open; reset before renegotiating")]
    ResetRequired,

    /// Channel did not open in time
    #[error("Timed out after {0:?} waiting for the channel to open")]
    Timeout(Duration),

    /// Connectivity stack failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Signaling failure while driving a full exchange
    #[error("Signaling error: {0}")]
    Signal(#[from] SignalError),

    /// Negotiation settings are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Signaling errors
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Received payload could not be parsed; recoverable
    #[error("Description parse error: {0}")]
    DescriptionParse(#[from] DescriptionError),

    /// The signaling source closed before a description arrived
    #[error("Signaling channel closed")]
    Closed,

    /// I/O error on the manual source/sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Relay failure
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

impl SignalError {
    /// Check if negotiation can continue after this error
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DescriptionParse(_))
    }
}
