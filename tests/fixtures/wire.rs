//! A transfer manager driven by hand, with raw access to the peer side.

use bytes::Bytes;
use lanshare_core::{TransferConfig, TransferEvent, TransferManager};
use lanshare_transport::{Channel, ChannelEvent, ChannelEvents, ChannelMessage, MemoryChannel};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

type Manager = TransferManager<MemoryChannel, mpsc::UnboundedSender<TransferEvent>>;

/// Manager under test plus the far end of its channel
pub struct WireHarness {
    pub manager: Manager,
    pub events: mpsc::UnboundedReceiver<TransferEvent>,
    /// What the peer sent to the manager
    pub inbox: ChannelEvents,
    /// Peer end of the channel
    pub peer: Arc<MemoryChannel>,
    /// What the manager sent to the peer
    pub wire: ChannelEvents,
}

impl WireHarness {
    /// Build a harness over a fresh channel pair
    pub async fn new(config: TransferConfig) -> Self {
        let ((local, inbox), (peer, wire)) = MemoryChannel::pair();
        let (tx, events) = mpsc::unbounded_channel();
        let mut manager = TransferManager::new(local, config, tx);
        manager.init().await;
        Self {
            manager,
            events,
            inbox,
            peer,
            wire,
        }
    }

    /// Send a raw text frame from the peer and let the manager handle it
    pub async fn peer_text(&mut self, text: &str) {
        self.peer.send_text(text).await.unwrap();
        self.pump().await;
    }

    /// Send a raw binary frame from the peer and let the manager handle it
    pub async fn peer_binary(&mut self, data: impl Into<Bytes>) {
        self.peer.send_binary(data.into()).await.unwrap();
        self.pump().await;
    }

    /// Feed every frame queued for the manager into it
    pub async fn pump(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            if let ChannelEvent::Message(message) = event {
                self.manager.handle_message(message).await;
            }
        }
    }

    /// Events emitted so far
    pub fn drain_events(&mut self) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Frames the manager has sent so far
    pub fn drain_wire(&mut self) -> Vec<ChannelMessage> {
        let mut frames = Vec::new();
        while let Ok(event) = self.wire.try_recv() {
            if let ChannelEvent::Message(message) = event {
                frames.push(message);
            }
        }
        frames
    }
}

/// Parse the text frames in `frames` as JSON control messages
pub fn control_frames(frames: &[ChannelMessage]) -> Vec<Value> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ChannelMessage::Text(text) => serde_json::from_str(text).ok(),
            ChannelMessage::Binary(_) => None,
        })
        .collect()
}
