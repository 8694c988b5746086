//! Structured events reported by the transfer manager.
//!
//! Front ends implement [`TransferObserver`] (or pass a closure or an
//! unbounded sender) to render chat, progress and transfer outcomes.

use crate::transfer::{CancelOrigin, TransferDirection, TransferId};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Event emitted by a [`TransferManager`](crate::TransferManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Chat text from the peer
    Chat {
        /// Message text
        text: String,
    },

    /// Local object announced to the peer
    OutboundStarted {
        /// Transfer id
        id: TransferId,
        /// Object name
        name: String,
        /// Total size in bytes
        size: u64,
    },

    /// Peer announced an object
    InboundStarted {
        /// Transfer id
        id: TransferId,
        /// Object name
        name: String,
        /// Total size in bytes
        size: u64,
    },

    /// Bytes moved so far
    Progress {
        /// Direction
        direction: TransferDirection,
        /// Transfer id
        id: TransferId,
        /// Bytes sent or received
        transferred: u64,
        /// Total size in bytes
        total: u64,
    },

    /// Every chunk of a local object was handed to the channel
    OutboundCompleted {
        /// Transfer id
        id: TransferId,
        /// Object name
        name: String,
        /// Total size in bytes
        size: u64,
    },

    /// Peer object fully received
    InboundCompleted {
        /// Transfer id
        id: TransferId,
        /// Object name
        name: String,
        /// Reassembled object
        data: Bytes,
    },

    /// Transfer cancelled by either side
    Cancelled {
        /// Direction
        direction: TransferDirection,
        /// Transfer id
        id: TransferId,
        /// Object name
        name: String,
        /// Which side cancelled
        origin: CancelOrigin,
        /// Reason
        reason: String,
    },

    /// Transfer failed
    Failed {
        /// Direction
        direction: TransferDirection,
        /// Transfer id
        id: TransferId,
        /// Object name
        name: String,
        /// Reason
        reason: String,
    },

    /// Peer metadata rejected by the rate limiter
    MetaRejected {
        /// Transfer id announced by the peer
        id: String,
        /// Object name announced by the peer
        name: String,
    },

    /// Channel closed; the endpoint is done
    ChannelClosed,
}

/// Receives [`TransferEvent`]s
pub trait TransferObserver: Send {
    /// Handle one event
    fn on_event(&mut self, event: TransferEvent);
}

impl<F> TransferObserver for F
where
    F: FnMut(TransferEvent) + Send,
{
    fn on_event(&mut self, event: TransferEvent) {
        self(event);
    }
}

impl TransferObserver for mpsc::UnboundedSender<TransferEvent> {
    fn on_event(&mut self, event: TransferEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Rate limit for progress events
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    /// Create a throttle emitting at most once per `interval`
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Check whether a progress event should be emitted now.
    ///
    /// The final update (`done`) always passes.
    pub fn should_emit(&mut self, now: Instant, done: bool) -> bool {
        let due = done
            || self
                .last
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}
