//! Transfer state.
//!
//! At most one outbound and one inbound transfer exist per channel. The
//! outbound side pulls byte ranges from a [`ChunkSource`]; the inbound side
//! buffers chunks until the declared size is reached.

pub mod inbound;
pub mod outbound;
pub mod source;
pub mod window;

pub use inbound::{IncomingTransfer, InboundSlot, OrphanPolicy};
pub use outbound::OutboundTransfer;
pub use source::{BufferSource, ChunkSource, FileSource, StreamSource};
pub use window::{WindowOutcome, wait_open};

use rand::Rng;
use std::fmt;

/// Transfer session identifier.
///
/// Locally generated ids are 16 hex characters. Ids received from a peer are
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferId(String);

impl TransferId {
    /// Generate a fresh random id
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an id received on the wire
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as sent on the wire
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a control frame's optional id refers to this transfer.
    ///
    /// A missing id matches.
    #[must_use]
    pub fn matches(&self, wire: Option<&str>) -> bool {
        wire.is_none_or(|id| id == self.0)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// We are sending
    Outbound,
    /// We are receiving
    Inbound,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "outbound"),
            Self::Inbound => write!(f, "inbound"),
        }
    }
}

/// Which side cancelled a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelOrigin {
    /// Cancelled by the local user
    Local,
    /// Cancelled by the peer
    Peer,
}

impl fmt::Display for CancelOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Peer => write!(f, "peer"),
        }
    }
}
