//! Transfer session manager.
//!
//! Owns at most one outbound and one inbound transfer on a channel and
//! implements the transfer protocol on top of it:
//!
//! ```text
//! Sender                              Receiver
//!     |                                   |
//!     |-- file-meta {id,name,size} ------>|  opens IncomingTransfer
//!     |-- chunk 0 (binary) -------------->|
//!     |-- chunk 1 (binary) -------------->|
//!     |      ...  (send window gated)     |
//!     |-- chunk N (binary) -------------->|  received == size: complete
//!     |                                   |
//!     |<-------- file-cancel {id,reason} -|  receiver cancelled
//!     |<-------- file-error  {id,reason} -|  receive failed / rate limited
//! ```
//!
//! The manager never spawns or locks anything. The [endpoint](crate::endpoint)
//! drives it from a single task: inbound messages go to
//! [`TransferManager::handle_message`], and every outbound chunk is preceded by
//! a [`TransferManager::window_wait`] / [`TransferManager::send_next_chunk`]
//! pair, so a cancel processed between two chunks always lands on a chunk
//! boundary.

use crate::config::TransferConfig;
use crate::error::{
    REASON_CHANNEL_CLOSED, REASON_MISSING_METADATA,
    REASON_RECEIVER_CANCELLED, REASON_SENDER_CANCELLED, REASON_SOURCE_ENDED, REASON_SUPERSEDED,
    TransferError, TransferResult,
};
use crate::events::{TransferEvent, TransferObserver};
use crate::frame::ControlMessage;
use crate::rate_limiter::MetaRateLimiter;
use crate::router::{Inbound, classify};
use crate::transfer::{
    CancelOrigin, ChunkSource, InboundSlot, IncomingTransfer, OrphanPolicy, OutboundTransfer,
    TransferDirection, TransferId, WindowOutcome, wait_open,
};
use bytes::Bytes;
use lanshare_transport::{Channel, ChannelMessage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// Future returned by [`TransferManager::window_wait`]
pub type WindowWait = Pin<Box<dyn Future<Output = WindowOutcome> + Send + 'static>>;

/// Transfer session manager for one channel
pub struct TransferManager<C: ?Sized, O> {
    channel: Arc<C>,
    config: TransferConfig,
    observer: O,
    outbound: Option<OutboundTransfer>,
    inbound: InboundSlot,
    limiter: MetaRateLimiter,
}

impl<C, O> TransferManager<C, O>
where
    C: Channel + ?Sized + 'static,
    O: TransferObserver,
{
    /// Create a manager for `channel`
    pub fn new(channel: Arc<C>, config: TransferConfig, observer: O) -> Self {
        let limiter = MetaRateLimiter::new(config.max_meta_per_window, config.meta_window);
        Self {
            channel,
            config,
            observer,
            outbound: None,
            inbound: InboundSlot::default(),
            limiter,
        }
    }

    /// Configure the channel's low-water threshold
    pub async fn init(&mut self) {
        self.channel
            .set_buffered_amount_low_threshold(self.config.low_water)
            .await;
    }

    /// Channel handle
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Transfer configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Active outbound transfer
    pub fn outbound(&self) -> Option<&OutboundTransfer> {
        self.outbound.as_ref()
    }

    /// Receive side state
    pub fn inbound(&self) -> &InboundSlot {
        &self.inbound
    }

    /// Check if an outbound transfer is in flight
    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }

    /// Send a chat message.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ChannelUnavailable` if the channel is not open.
    pub async fn send_chat(&mut self, text: &str) -> TransferResult<()> {
        if !self.channel.is_open() {
            return Err(TransferError::ChannelUnavailable);
        }
        self.channel.send_text(text).await?;
        Ok(())
    }

    /// Announce an object and make it the active outbound transfer.
    ///
    /// Chunks are sent by subsequent [`TransferManager::send_next_chunk`]
    /// calls. An empty object completes immediately.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::TransferInProgress` if an outbound transfer is
    /// already in flight, `TransferError::ChannelUnavailable` if the channel
    /// is not open.
    pub async fn begin_send(
        &mut self,
        name: impl Into<String>,
        source: Box<dyn ChunkSource>,
    ) -> TransferResult<TransferId> {
        if self.outbound.is_some() {
            return Err(TransferError::TransferInProgress);
        }
        if !self.channel.is_open() {
            return Err(TransferError::ChannelUnavailable);
        }

        let transfer = OutboundTransfer::new(name, source, self.config.progress_interval);
        let id = transfer.id().clone();
        let meta = ControlMessage::meta(id.as_str(), transfer.name(), transfer.total());
        self.channel.send_text(&meta.encode()).await?;

        tracing::info!(
            id = %id,
            name = transfer.name(),
            size = transfer.total(),
            "Sending object"
        );
        self.emit(TransferEvent::OutboundStarted {
            id: id.clone(),
            name: transfer.name().to_string(),
            size: transfer.total(),
        });

        if transfer.total() == 0 {
            self.complete_outbound(transfer);
        } else {
            self.outbound = Some(transfer);
        }
        Ok(id)
    }

    /// Future that resolves when the next chunk may be sent.
    ///
    /// The drain deadline is fixed when a wait first starts and kept across
    /// re-created futures until a chunk goes out, so inbound traffic that
    /// interrupts the wait does not extend it.
    pub fn window_wait(&mut self) -> WindowWait {
        let Some(transfer) = self.outbound.as_mut() else {
            return Box::pin(std::future::ready(WindowOutcome::Open));
        };
        let deadline = transfer.drain_deadline(Instant::now(), self.config.drain_timeout);
        Box::pin(wait_open(
            Arc::clone(&self.channel),
            self.config.high_water,
            self.config.drain_poll_interval,
            deadline,
        ))
    }

    /// Send the next chunk of the active outbound transfer
    pub async fn send_next_chunk(&mut self, outcome: WindowOutcome) {
        let chunk_size = self.config.chunk_size;
        let Some(transfer) = self.outbound.as_mut() else {
            return;
        };

        if outcome == WindowOutcome::DrainTimeout {
            let buffered = self.channel.buffered_amount().await;
            tracing::warn!(
                id = %transfer.id(),
                buffered,
                "Send window did not drain in time, sending anyway"
            );
        }

        let chunk = match transfer.next_chunk(chunk_size).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                self.fail_outbound(TransferError::Source(REASON_SOURCE_ENDED.into()))
                    .await;
                return;
            }
            Err(e) => {
                self.fail_outbound(e).await;
                return;
            }
        };

        let len = chunk.len();
        if let Err(e) = self.channel.send_binary(chunk).await {
            tracing::error!(id = %transfer.id(), "Chunk send failed: {}", e);
            self.fail_outbound(e.into()).await;
            return;
        }

        let progress = transfer.record_sent(len, Instant::now());
        tracing::debug!(
            id = %transfer.id(),
            chunk = transfer.chunks_sent(),
            bytes = len,
            sent = transfer.bytes_sent(),
            total = transfer.total(),
            "Sent chunk"
        );

        let event = progress.then(|| TransferEvent::Progress {
            direction: TransferDirection::Outbound,
            id: transfer.id().clone(),
            transferred: transfer.bytes_sent(),
            total: transfer.total(),
        });
        let complete = transfer.is_complete();
        if let Some(event) = event {
            self.emit(event);
        }
        if complete {
            if let Some(transfer) = self.outbound.take() {
                self.complete_outbound(transfer);
            }
        }
    }

    /// Send every remaining chunk of the active outbound transfer
    pub async fn drive_outbound(&mut self) {
        while self.has_outbound() {
            let outcome = self.window_wait().await;
            self.send_next_chunk(outcome).await;
        }
    }

    /// Process one message received from the peer
    pub async fn handle_message(&mut self, message: ChannelMessage) {
        match classify(message) {
            Inbound::Chat(text) => self.emit(TransferEvent::Chat { text }),
            Inbound::Control(control) => self.handle_control(control).await,
            Inbound::Chunk(data) => self.handle_chunk(data).await,
        }
    }

    async fn handle_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::Meta { id, name, size } => self.handle_meta(id, name, size).await,
            ControlMessage::Cancel { .. } => {
                let reason = control.reason().to_string();
                self.handle_peer_cancel(control.id(), reason).await;
            }
            ControlMessage::Error { .. } => {
                let reason = control.reason().to_string();
                self.handle_peer_error(control.id(), reason).await;
            }
        }
    }

    async fn handle_meta(&mut self, id: String, name: String, size: u64) {
        if !self.limiter.check() {
            let err = TransferError::RateLimitExceeded;
            tracing::warn!(id = %id, name = %name, "Rejecting metadata: {}", err);
            let reply = ControlMessage::error(Some(id.clone()), Some(name.clone()), err.wire_reason());
            self.notify_peer(&reply).await;
            self.emit(TransferEvent::MetaRejected { id, name });
            return;
        }

        if let Some(prior) = self.inbound.finish(OrphanPolicy::Notify) {
            tracing::info!(id = %prior.id(), "Inbound transfer superseded by new metadata");
            self.emit(TransferEvent::Failed {
                direction: TransferDirection::Inbound,
                id: prior.id().clone(),
                name: prior.name().to_string(),
                reason: REASON_SUPERSEDED.to_string(),
            });
        }

        let transfer = IncomingTransfer::new(
            TransferId::from_wire(id),
            name,
            size,
            self.config.progress_interval,
        );
        tracing::info!(id = %transfer.id(), name = transfer.name(), size, "Receiving object");
        self.emit(TransferEvent::InboundStarted {
            id: transfer.id().clone(),
            name: transfer.name().to_string(),
            size,
        });

        if size == 0 {
            self.complete_inbound(transfer);
        } else {
            self.inbound = InboundSlot::Receiving(transfer);
        }
    }

    async fn handle_peer_cancel(&mut self, id: Option<&str>, reason: String) {
        let mut matched = false;

        if self.outbound.as_ref().is_some_and(|t| t.id().matches(id)) {
            let err = TransferError::Cancelled {
                origin: CancelOrigin::Peer,
                reason: REASON_RECEIVER_CANCELLED.into(),
            };
            self.fail_outbound(err).await;
            matched = true;
        }

        if self.inbound.transfer().is_some_and(|t| t.id().matches(id)) {
            if let Some(transfer) = self.inbound.finish(OrphanPolicy::Silent) {
                let err = TransferError::Cancelled {
                    origin: CancelOrigin::Peer,
                    reason: reason.clone().into(),
                };
                self.fail_inbound(transfer, err).await;
                matched = true;
            }
        }

        if !matched {
            tracing::debug!(id = ?id, reason = %reason, "Ignoring cancel for unknown transfer");
        }
    }

    async fn handle_peer_error(&mut self, id: Option<&str>, reason: String) {
        let mut matched = false;

        if self.outbound.as_ref().is_some_and(|t| t.id().matches(id)) {
            let err = TransferError::PeerError {
                reason: reason.clone().into(),
            };
            self.fail_outbound(err).await;
            matched = true;
        }

        if self.inbound.transfer().is_some_and(|t| t.id().matches(id)) {
            if let Some(transfer) = self.inbound.finish(OrphanPolicy::Silent) {
                let err = TransferError::PeerError {
                    reason: reason.clone().into(),
                };
                self.fail_inbound(transfer, err).await;
                matched = true;
            }
        }

        if !matched {
            tracing::debug!(id = ?id, reason = %reason, "Ignoring error for unknown transfer");
        }
    }

    async fn handle_chunk(&mut self, data: Bytes) {
        let InboundSlot::Receiving(transfer) = &mut self.inbound else {
            if self.inbound.orphan() {
                tracing::warn!(bytes = data.len(), "Chunk arrived before any metadata");
                let reply = ControlMessage::error(None, None, REASON_MISSING_METADATA);
                self.notify_peer(&reply).await;
            } else {
                tracing::debug!(bytes = data.len(), "Dropping orphan chunk");
            }
            return;
        };

        match transfer.append(data, Instant::now()) {
            Ok(progress) => {
                let event = progress.then(|| TransferEvent::Progress {
                    direction: TransferDirection::Inbound,
                    id: transfer.id().clone(),
                    transferred: transfer.received(),
                    total: transfer.size(),
                });
                let complete = transfer.is_complete();
                if let Some(event) = event {
                    self.emit(event);
                }
                if complete {
                    if let Some(transfer) = self.inbound.finish(OrphanPolicy::Notify) {
                        self.complete_inbound(transfer);
                    }
                }
            }
            Err(e) => {
                if let Some(transfer) = self.inbound.finish(OrphanPolicy::Silent) {
                    self.fail_inbound(transfer, e).await;
                }
            }
        }
    }

    /// Cancel the active outbound transfer.
    ///
    /// No further chunk of the transfer is sent. The transfer is cancelled
    /// locally even if the `file-cancel` frame cannot be sent; that failure
    /// is only logged.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::NoActiveTransfer` if there is nothing to cancel.
    pub async fn cancel_outbound(&mut self) -> TransferResult<()> {
        let Some(transfer) = self.outbound.take() else {
            return Err(TransferError::NoActiveTransfer);
        };

        let frame = ControlMessage::cancel(
            transfer.id().as_str(),
            transfer.name(),
            REASON_SENDER_CANCELLED,
        );
        self.notify_peer(&frame).await;

        tracing::info!(
            id = %transfer.id(),
            sent = transfer.bytes_sent(),
            total = transfer.total(),
            "Outbound transfer cancelled"
        );
        let err = TransferError::Cancelled {
            origin: CancelOrigin::Local,
            reason: REASON_SENDER_CANCELLED.into(),
        };
        self.emit(Self::termination_event(
            TransferDirection::Outbound,
            transfer.id(),
            transfer.name(),
            &err,
        ));
        Ok(())
    }

    /// Cancel the open inbound transfer, discarding received data.
    ///
    /// Chunks still in flight are dropped silently. As with
    /// [`TransferManager::cancel_outbound`], a `file-cancel` that cannot be
    /// sent is only logged.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::NoActiveTransfer` if nothing is being received.
    pub async fn cancel_inbound(&mut self) -> TransferResult<()> {
        let Some(transfer) = self.inbound.finish(OrphanPolicy::Silent) else {
            return Err(TransferError::NoActiveTransfer);
        };

        let frame = ControlMessage::cancel(
            transfer.id().as_str(),
            transfer.name(),
            REASON_RECEIVER_CANCELLED,
        );
        self.notify_peer(&frame).await;

        tracing::info!(
            id = %transfer.id(),
            received = transfer.received(),
            size = transfer.size(),
            "Inbound transfer cancelled"
        );
        let err = TransferError::Cancelled {
            origin: CancelOrigin::Local,
            reason: REASON_RECEIVER_CANCELLED.into(),
        };
        self.emit(Self::termination_event(
            TransferDirection::Inbound,
            transfer.id(),
            transfer.name(),
            &err,
        ));
        Ok(())
    }

    /// The channel closed: discard both directions
    pub fn channel_closed(&mut self) {
        if let Some(transfer) = self.outbound.take() {
            self.emit(TransferEvent::Failed {
                direction: TransferDirection::Outbound,
                id: transfer.id().clone(),
                name: transfer.name().to_string(),
                reason: REASON_CHANNEL_CLOSED.to_string(),
            });
        }
        if let Some(transfer) = self.inbound.finish(OrphanPolicy::Silent) {
            self.emit(TransferEvent::Failed {
                direction: TransferDirection::Inbound,
                id: transfer.id().clone(),
                name: transfer.name().to_string(),
                reason: REASON_CHANNEL_CLOSED.to_string(),
            });
        }
        let stats = self.channel.stats();
        tracing::info!(
            sent = stats.bytes_sent,
            received = stats.bytes_received,
            frames_in = stats.messages_received,
            "Channel closed"
        );
        self.emit(TransferEvent::ChannelClosed);
    }

    fn complete_outbound(&mut self, transfer: OutboundTransfer) {
        tracing::info!(
            id = %transfer.id(),
            bytes = transfer.total(),
            chunks = transfer.chunks_sent(),
            "Object sent"
        );
        self.emit(TransferEvent::OutboundCompleted {
            id: transfer.id().clone(),
            name: transfer.name().to_string(),
            size: transfer.total(),
        });
    }

    fn complete_inbound(&mut self, transfer: IncomingTransfer) {
        tracing::info!(id = %transfer.id(), bytes = transfer.size(), "Object received");
        let id = transfer.id().clone();
        let name = transfer.name().to_string();
        let data = transfer.assemble();
        self.emit(TransferEvent::InboundCompleted { id, name, data });
    }

    async fn fail_outbound(&mut self, err: TransferError) {
        let Some(transfer) = self.outbound.take() else {
            return;
        };
        if err.is_cancellation() {
            tracing::info!(id = %transfer.id(), "Outbound transfer stopped: {}", err);
        } else {
            tracing::warn!(id = %transfer.id(), "Outbound transfer failed: {}", err);
        }
        if !err.is_peer_echo() {
            let frame = ControlMessage::error(
                Some(transfer.id().to_string()),
                Some(transfer.name().to_string()),
                err.wire_reason(),
            );
            self.notify_peer(&frame).await;
        }
        self.emit(Self::termination_event(
            TransferDirection::Outbound,
            transfer.id(),
            transfer.name(),
            &err,
        ));
    }

    async fn fail_inbound(&mut self, transfer: IncomingTransfer, err: TransferError) {
        if err.is_cancellation() {
            tracing::info!(id = %transfer.id(), "Inbound transfer stopped: {}", err);
        } else {
            tracing::warn!(id = %transfer.id(), "Inbound transfer failed: {}", err);
        }
        if !err.is_peer_echo() {
            let frame = ControlMessage::error(
                Some(transfer.id().to_string()),
                Some(transfer.name().to_string()),
                err.wire_reason(),
            );
            self.notify_peer(&frame).await;
        }
        self.emit(Self::termination_event(
            TransferDirection::Inbound,
            transfer.id(),
            transfer.name(),
            &err,
        ));
    }

    fn termination_event(
        direction: TransferDirection,
        id: &TransferId,
        name: &str,
        err: &TransferError,
    ) -> TransferEvent {
        match err {
            TransferError::Cancelled { origin, reason } => TransferEvent::Cancelled {
                direction,
                id: id.clone(),
                name: name.to_string(),
                origin: *origin,
                reason: reason.to_string(),
            },
            _ => TransferEvent::Failed {
                direction,
                id: id.clone(),
                name: name.to_string(),
                reason: err.wire_reason().into_owned(),
            },
        }
    }

    async fn notify_peer(&mut self, frame: &ControlMessage) {
        if let Err(e) = self.channel.send_text(&frame.encode()).await {
            tracing::debug!(kind = frame.tag(), "Could not notify peer: {}", e);
        }
    }

    fn emit(&mut self, event: TransferEvent) {
        self.observer.on_event(event);
    }
}
