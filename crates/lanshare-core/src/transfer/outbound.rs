//! Outbound transfer state.

use super::{ChunkSource, TransferId};
use crate::error::TransferResult;
use crate::events::ProgressThrottle;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

/// Object being sent to the peer
pub struct OutboundTransfer {
    id: TransferId,
    name: String,
    total: u64,
    bytes_sent: u64,
    chunks_sent: u64,
    source: Box<dyn ChunkSource>,
    progress: ProgressThrottle,
    /// Drain deadline of the window wait in progress, if any
    drain_deadline: Option<Instant>,
}

impl OutboundTransfer {
    /// Start a transfer of `source` under a fresh id
    #[must_use]
    pub fn new(name: impl Into<String>, source: Box<dyn ChunkSource>, progress: Duration) -> Self {
        Self {
            id: TransferId::generate(),
            name: name.into(),
            total: source.total_size(),
            bytes_sent: 0,
            chunks_sent: 0,
            source,
            progress: ProgressThrottle::new(progress),
            drain_deadline: None,
        }
    }

    /// Transfer id
    #[must_use]
    pub fn id(&self) -> &TransferId {
        &self.id
    }

    /// Object name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared size
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes handed to the channel so far
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Chunks handed to the channel so far
    #[must_use]
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Check if every byte has been sent
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total
    }

    /// Pull the next chunk from the source
    pub(crate) async fn next_chunk(&mut self, max: usize) -> TransferResult<Option<Bytes>> {
        self.source.next_range(max).await
    }

    /// Record a chunk handed to the channel; returns whether a progress
    /// event is due.
    pub(crate) fn record_sent(&mut self, len: usize, now: Instant) -> bool {
        self.bytes_sent += len as u64;
        self.chunks_sent += 1;
        self.drain_deadline = None;
        let done = self.is_complete();
        self.progress.should_emit(now, done)
    }

    /// Deadline of the current window wait, starting one now if none is running
    pub(crate) fn drain_deadline(&mut self, now: Instant, timeout: Duration) -> Instant {
        *self.drain_deadline.get_or_insert(now + timeout)
    }
}

impl std::fmt::Debug for OutboundTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundTransfer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("total", &self.total)
            .field("bytes_sent", &self.bytes_sent)
            .field("chunks_sent", &self.chunks_sent)
            .finish_non_exhaustive()
    }
}
