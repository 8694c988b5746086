//! Relay wire format.
//!
//! One UTF-8 JSON message per line. The relay forwards lines verbatim; only
//! the endpoints interpret the envelope:
//!
//! ```text
//! {"type":"ready"}
//! {"type":"offer","sdp":{"type":"offer","sdp":"v=0\r\n..."}}
//! ```
//!
//! A client announces itself with `ready` when it joins. The relay keeps no
//! history, so a peer that already sent its description resends it on
//! seeing the announcement.

use crate::description::description_from_value;
use crate::error::DescriptionError;
use lanshare_transport::SessionDescription;
use serde_json::{Value, json};

/// Default relay port when the address omits one
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Default maximum line length accepted by server and client
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Relay address could not be understood
    #[error("Invalid relay address: {0}")]
    InvalidAddress(String),

    /// A line exceeded the configured limit
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Connection closed by the other side
    #[error("Relay connection closed")]
    Closed,
}

/// Type tag of the join announcement
pub const READY_TYPE: &str = "ready";

/// Outer envelope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Carries an offer
    Offer,
    /// Carries an answer
    Answer,
}

impl EnvelopeKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

/// Negotiation message as relayed between endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEnvelope {
    /// Outer kind tag
    pub kind: EnvelopeKind,
    /// Carried description
    pub description: SessionDescription,
}

impl RelayEnvelope {
    /// Wrap a description, deriving the kind from its type tag
    #[must_use]
    pub fn new(description: SessionDescription) -> Self {
        let kind = match description.sdp_type {
            lanshare_transport::SdpType::Offer => EnvelopeKind::Offer,
            _ => EnvelopeKind::Answer,
        };
        Self { kind, description }
    }

    /// Encode as a single line (without the trailing newline)
    #[must_use]
    pub fn encode(&self) -> String {
        json!({
            "type": self.kind.as_str(),
            "sdp": {
                "type": self.description.sdp_type,
                "sdp": self.description.sdp,
            },
        })
        .to_string()
    }

    /// Decode one relayed line.
    ///
    /// Returns `Ok(None)` for well-formed messages that carry no
    /// description.
    ///
    /// # Errors
    ///
    /// Returns error if the line is not JSON or the carried description is
    /// invalid.
    pub fn decode(line: &str) -> Result<Option<Self>, DescriptionError> {
        match RelayMessage::decode(line)? {
            RelayMessage::Description(envelope) => Ok(Some(envelope)),
            RelayMessage::Ready | RelayMessage::Other => Ok(None),
        }
    }
}

/// Any line seen on the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// An offer or answer
    Description(RelayEnvelope),
    /// The other client just joined
    Ready,
    /// Well-formed JSON of a type this endpoint does not handle
    Other,
}

impl RelayMessage {
    /// Encoded join announcement (without the trailing newline)
    #[must_use]
    pub fn ready_line() -> String {
        json!({ "type": READY_TYPE }).to_string()
    }

    /// Decode one relayed line.
    ///
    /// # Errors
    ///
    /// Returns error if the line is not JSON or a carried description is
    /// invalid.
    pub fn decode(line: &str) -> Result<Self, DescriptionError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| DescriptionError::Malformed(e.to_string()))?;

        let kind = match value.get("type").and_then(Value::as_str) {
            Some("offer") => EnvelopeKind::Offer,
            Some("answer") => EnvelopeKind::Answer,
            Some(READY_TYPE) => return Ok(Self::Ready),
            _ => return Ok(Self::Other),
        };

        let payload = value.get("sdp").ok_or(DescriptionError::EmptyBody)?;
        let description = description_from_value(payload)?;

        Ok(Self::Description(RelayEnvelope { kind, description }))
    }
}

/// Normalise a user-supplied relay address to `host:port`.
///
/// Accepts `host:port`, `host`, `tcp://`, `http://`, `https://` and `//`
/// prefixed forms. Paths are ignored. The relay speaks line-delimited JSON
/// over plain TCP, so WebSocket urls are refused.
///
/// # Errors
///
/// Returns `InvalidAddress` for empty input, a `ws://`/`wss://` url, a
/// missing host, or a port outside 1-65535.
pub fn normalize_relay_addr(input: &str) -> Result<String, RelayError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(RelayError::InvalidAddress("empty address".to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        return Err(RelayError::InvalidAddress(format!(
            "{input}: WebSocket relays are not supported, use host:port of a lanshare relay"
        )));
    }

    let rest = ["tcp://", "http://", "https://", "//"]
        .iter()
        .find_map(|prefix| {
            trimmed
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| &trimmed[prefix.len()..])
        })
        .unwrap_or(trimmed);

    // A non-special scheme keeps an explicit port even when it equals a
    // well-known default.
    let parsed = url::Url::parse(&format!("tcp://{rest}"))
        .map_err(|e| RelayError::InvalidAddress(format!("{input}: {e}")))?;

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| RelayError::InvalidAddress(format!("{input}: missing host")))?;
    let port = parsed.port().unwrap_or(DEFAULT_RELAY_PORT);
    if port == 0 {
        return Err(RelayError::InvalidAddress(format!(
            "{input}: port must be 1-65535"
        )));
    }

    Ok(format!("{host}:{port}"))
}
