//! Channel trait abstraction for the data channel backends.
//!
//! This module defines the core `Channel` trait that abstracts over the
//! message channel produced by negotiation (a WebRTC data channel in
//! production, an in-process pair in tests). The transfer protocol only ever
//! talks to this trait, so it never depends on the connectivity stack.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::sync::mpsc;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Channel is closed
    #[error("Channel is closed")]
    Closed,

    /// Channel exists but is not (yet) open
    #[error("Channel is not open")]
    NotOpen,

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connectivity stack rejected a description or negotiation step
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A single message carried by a [`Channel`].
///
/// Text frames carry chat and control messages, binary frames carry chunk
/// data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// UTF-8 text frame
    Text(String),
    /// Raw binary frame
    Binary(Bytes),
}

impl ChannelMessage {
    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Check if the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel created, not yet usable
    Connecting,
    /// Channel open for sending and receiving
    Open,
    /// Close requested
    Closing,
    /// Channel closed; terminal
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Event delivered to the owner of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Channel became open
    Open,
    /// A message arrived from the peer
    Message(ChannelMessage),
    /// Channel closed (locally or by the peer); no further events follow
    Closed,
}

/// Receiving half of a channel: the ordered stream of [`ChannelEvent`]s
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Async message channel trait.
///
/// Implementations guarantee ordered, reliable delivery of whole messages.
/// Inbound traffic is not read through this trait; it is delivered on the
/// [`ChannelEvents`] stream handed out together with the channel.
///
/// # Examples
///
/// ```
/// use lanshare_transport::{Channel, ChannelEvent, ChannelMessage, MemoryChannel};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ((local, _local_events), (_remote, mut remote_events)) = MemoryChannel::pair();
///
/// local.send_text("hello").await?;
///
/// match remote_events.recv().await {
///     Some(ChannelEvent::Message(ChannelMessage::Text(text))) => assert_eq!(text, "hello"),
///     other => panic!("unexpected event: {other:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a text frame.
    ///
    /// # Errors
    /// Returns `TransportError::NotOpen`/`Closed` if the channel is not open,
    /// or a backend error if the send fails.
    async fn send_text(&self, text: &str) -> TransportResult<()>;

    /// Send a binary frame.
    ///
    /// # Errors
    /// Returns `TransportError::NotOpen`/`Closed` if the channel is not open,
    /// or a backend error if the send fails.
    async fn send_binary(&self, data: Bytes) -> TransportResult<()>;

    /// Bytes queued locally but not yet handed to the network.
    async fn buffered_amount(&self) -> usize;

    /// Set the threshold at or below which [`Channel::buffered_amount_low`]
    /// resolves.
    async fn set_buffered_amount_low_threshold(&self, threshold: usize);

    /// Resolve once the buffered amount drops to the low threshold, or the
    /// channel closes.
    ///
    /// This is an edge notification: callers must re-check
    /// [`Channel::buffered_amount`] after it resolves.
    async fn buffered_amount_low(&self);

    /// Current lifecycle state
    fn state(&self) -> ChannelState;

    /// Check if the channel is open
    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Close the channel.
    ///
    /// Both ends observe [`ChannelEvent::Closed`].
    ///
    /// # Errors
    /// Returns a backend error if closing fails.
    async fn close(&self) -> TransportResult<()>;

    /// Get channel statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Channel statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Text frames sent
    pub text_sent: u64,
    /// Binary frames sent
    pub binary_sent: u64,
    /// Frames received
    pub messages_received: u64,
    /// Send errors
    pub send_errors: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, message: &ChannelMessage) {
        self.bytes_sent += message.len() as u64;
        match message {
            ChannelMessage::Text(_) => self.text_sent += 1,
            ChannelMessage::Binary(_) => self.binary_sent += 1,
        }
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats() {
        let mut stats = TransportStats::new();
        assert_eq!(stats.bytes_sent, 0);

        stats.record_send(&ChannelMessage::Text("hi".into()));
        stats.record_send(&ChannelMessage::Binary(Bytes::from_static(&[0u8; 100])));
        assert_eq!(stats.bytes_sent, 102);
        assert_eq!(stats.text_sent, 1);
        assert_eq!(stats.binary_sent, 1);

        stats.record_recv(200);
        assert_eq!(stats.bytes_received, 200);
        assert_eq!(stats.messages_received, 1);

        stats.record_send_error();
        assert_eq!(stats.send_errors, 1);
    }

    #[test]
    fn test_channel_message_len() {
        assert_eq!(ChannelMessage::Text("abc".into()).len(), 3);
        assert!(ChannelMessage::Binary(Bytes::new()).is_empty());
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "Channel is closed");
        assert_eq!(TransportError::NotOpen.to_string(), "Channel is not open");

        let err = TransportError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = TransportError::Other("test error".to_string());
        assert_eq!(err.to_string(), "Transport error: test error");
    }

    #[test]
    fn test_transport_error_from_io() {
        let io_err = std::io::Error::other("test");
        let transport_err = TransportError::from(io_err);

        assert!(matches!(transport_err, TransportError::Io(_)));
    }

    #[test]
    fn test_channel_state_display() {
        assert_eq!(ChannelState::Open.to_string(), "open");
        assert_eq!(ChannelState::Closed.to_string(), "closed");
    }
}
