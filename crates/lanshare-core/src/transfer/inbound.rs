//! Inbound transfer state.

use super::TransferId;
use crate::error::{REASON_CHUNK_OVERFLOW, TransferError, TransferResult};
use crate::events::ProgressThrottle;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::time::Instant;

/// Object being received from the peer
#[derive(Debug)]
pub struct IncomingTransfer {
    id: TransferId,
    name: String,
    size: u64,
    received: u64,
    chunks: Vec<Bytes>,
    progress: ProgressThrottle,
}

impl IncomingTransfer {
    /// Open a transfer announced by `file-meta`
    #[must_use]
    pub fn new(id: TransferId, name: impl Into<String>, size: u64, progress: Duration) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            received: 0,
            chunks: Vec::new(),
            progress: ProgressThrottle::new(progress),
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
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes received so far
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Check if the declared size has been reached
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received >= self.size
    }

    /// Append a chunk; returns whether a progress event is due.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Protocol` if the chunk would push the total
    /// past the declared size.
    pub fn append(&mut self, chunk: Bytes, now: Instant) -> TransferResult<bool> {
        let received = self.received + chunk.len() as u64;
        if received > self.size {
            return Err(TransferError::Protocol(REASON_CHUNK_OVERFLOW.into()));
        }
        self.received = received;
        self.chunks.push(chunk);
        let done = self.is_complete();
        Ok(self.progress.should_emit(now, done))
    }

    /// Concatenate the received chunks in arrival order
    #[must_use]
    pub fn assemble(mut self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.pop().unwrap_or_default();
        }
        let mut data = BytesMut::with_capacity(usize::try_from(self.received).unwrap_or(0));
        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }
        data.freeze()
    }
}

/// What to do with a binary chunk that arrives while no transfer is open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Tell the peer (once), then go silent
    Notify,
    /// Drop without telling the peer
    Silent,
}

/// Receive side of a channel: idle or receiving one object
#[derive(Debug)]
pub enum InboundSlot {
    /// No transfer open
    Idle(OrphanPolicy),
    /// Receiving an announced object
    Receiving(IncomingTransfer),
}

impl Default for InboundSlot {
    fn default() -> Self {
        Self::Idle(OrphanPolicy::Notify)
    }
}

impl InboundSlot {
    /// Open transfer, if any
    #[must_use]
    pub fn transfer(&self) -> Option<&IncomingTransfer> {
        match self {
            Self::Receiving(transfer) => Some(transfer),
            Self::Idle(_) => None,
        }
    }

    /// Check if a transfer is open
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        matches!(self, Self::Receiving(_))
    }

    /// Close the slot, returning the open transfer if there was one
    pub fn finish(&mut self, policy: OrphanPolicy) -> Option<IncomingTransfer> {
        match std::mem::replace(self, Self::Idle(policy)) {
            Self::Receiving(transfer) => Some(transfer),
            Self::Idle(_) => None,
        }
    }

    /// Register an orphan chunk; returns whether the peer must be told.
    ///
    /// Only the first orphan after a reset is reported.
    pub fn orphan(&mut self) -> bool {
        match self {
            Self::Idle(OrphanPolicy::Notify) => {
                *self = Self::Idle(OrphanPolicy::Silent);
                true
            }
            Self::Idle(OrphanPolicy::Silent) | Self::Receiving(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(size: u64) -> IncomingTransfer {
        IncomingTransfer::new(TransferId::from_wire("t1"), "a.bin", size, Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_and_assemble() {
        let mut incoming = transfer(6);
        let now = Instant::now();
        incoming.append(Bytes::from_static(b"abc"), now).unwrap();
        assert!(!incoming.is_complete());
        incoming.append(Bytes::from_static(b"def"), now).unwrap();
        assert!(incoming.is_complete());
        assert_eq!(incoming.received(), 6);
        assert_eq!(incoming.assemble(), Bytes::from_static(b"abcdef"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_rejected() {
        let mut incoming = transfer(4);
        let err = incoming
            .append(Bytes::from_static(b"too long"), Instant::now())
            .unwrap_err();
        assert_eq!(err.wire_reason(), "chunk exceeds declared size");
        assert_eq!(incoming.received(), 0);
    }

    #[test]
    fn test_orphan_reported_once() {
        let mut slot = InboundSlot::default();
        assert!(slot.orphan());
        assert!(!slot.orphan());
        assert!(!slot.orphan());

        // Completion re-arms, cancellation keeps it quiet
        slot.finish(OrphanPolicy::Notify);
        assert!(slot.orphan());
        slot.finish(OrphanPolicy::Silent);
        assert!(!slot.orphan());
    }

    #[test]
    fn test_finish_returns_transfer() {
        let mut slot = InboundSlot::Receiving(transfer(10));
        assert!(slot.is_receiving());
        assert_eq!(slot.transfer().map(IncomingTransfer::size), Some(10));

        let taken = slot.finish(OrphanPolicy::Silent).unwrap();
        assert_eq!(taken.name(), "a.bin");
        assert!(!slot.is_receiving());
        assert!(slot.finish(OrphanPolicy::Notify).is_none());
    }
}
