//! WebRTC data channel backend.
//!
//! Wraps a webrtc-rs peer connection carrying a single ordered, reliable data
//! channel labelled [`CHANNEL_LABEL`]. Candidates are gathered up front
//! (non-trickle), so the local description is only complete once
//! [`PeerConnector::gathering_complete`] resolves.

use crate::CHANNEL_LABEL;
use crate::connector::{PeerConnector, SdpType, SessionDescription};
use crate::transport::{
    Channel, ChannelEvent, ChannelEvents, ChannelMessage, ChannelState, TransportError,
    TransportResult, TransportStats,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

fn stack_error(err: webrtc::Error) -> TransportError {
    TransportError::Negotiation(err.to_string())
}

fn to_rtc(desc: &SessionDescription) -> TransportResult<RTCSessionDescription> {
    let sdp = desc.sdp.clone();
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Rollback => {
            return Err(TransportError::Negotiation(
                "rollback descriptions are not supported".to_string(),
            ));
        }
    }
    .map_err(stack_error)
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    // The wire shape is identical; go through serde to map the type tag.
    let json = serde_json::to_string(&desc).ok()?;
    serde_json::from_str(&json).ok()
}

/// Data channel wrapped behind the [`Channel`] trait
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    low: Arc<Notify>,
    stats: Arc<Mutex<TransportStats>>,
}

impl WebRtcChannel {
    fn record(&self, result: &TransportResult<()>, message: &ChannelMessage) {
        if let Ok(mut stats) = self.stats.lock() {
            match result {
                Ok(()) => stats.record_send(message),
                Err(_) => stats.record_send_error(),
            }
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        match self.state() {
            ChannelState::Open => Ok(()),
            ChannelState::Connecting => Err(TransportError::NotOpen),
            ChannelState::Closing | ChannelState::Closed => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Channel for WebRtcChannel {
    async fn send_text(&self, text: &str) -> TransportResult<()> {
        self.ensure_open()?;
        let result = self
            .dc
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Other(e.to_string()));
        self.record(&result, &ChannelMessage::Text(text.to_string()));
        result
    }

    async fn send_binary(&self, data: Bytes) -> TransportResult<()> {
        self.ensure_open()?;
        let result = self
            .dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Other(e.to_string()));
        self.record(&result, &ChannelMessage::Binary(data));
        result
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.dc.set_buffered_amount_low_threshold(threshold).await;
    }

    async fn buffered_amount_low(&self) {
        let notified = self.low.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_open() || self.dc.buffered_amount().await <= self.dc.buffered_amount_low_threshold().await {
            return;
        }
        notified.await;
    }

    fn state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.low.notify_waiters();
        self.dc
            .close()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn stats(&self) -> TransportStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

type Ready = (Arc<WebRtcChannel>, ChannelEvents);

/// Wire the data channel callbacks into a [`ChannelEvents`] stream.
///
/// `opened` is raised and the channel handed to `ready_tx` once it opens.
async fn attach_channel(
    dc: Arc<RTCDataChannel>,
    ready_tx: mpsc::UnboundedSender<Ready>,
    opened: Arc<AtomicBool>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let low = Arc::new(Notify::new());
    let stats = Arc::new(Mutex::new(TransportStats::new()));
    let channel = Arc::new(WebRtcChannel {
        dc: Arc::clone(&dc),
        low: Arc::clone(&low),
        stats: Arc::clone(&stats),
    });
    let pending = Arc::new(Mutex::new(Some((channel, events_rx))));

    {
        let events_tx = events_tx.clone();
        let pending = Arc::clone(&pending);
        dc.on_open(Box::new(move || {
            let events_tx = events_tx.clone();
            let ready_tx = ready_tx.clone();
            let pending = Arc::clone(&pending);
            let opened = Arc::clone(&opened);
            Box::pin(async move {
                opened.store(true, Ordering::Release);
                info!(label = CHANNEL_LABEL, "Data channel open");
                let _ = events_tx.send(ChannelEvent::Open);
                let ready = pending.lock().ok().and_then(|mut guard| guard.take());
                if let Some(ready) = ready {
                    let _ = ready_tx.send(ready);
                }
            })
        }));
    }

    {
        let events_tx = events_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let events_tx = events_tx.clone();
            let stats = Arc::clone(&stats);
            Box::pin(async move {
                if let Ok(mut stats) = stats.lock() {
                    stats.record_recv(msg.data.len());
                }
                let message = if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => ChannelMessage::Text(text),
                        Err(_) => {
                            warn!("Dropping text frame with invalid UTF-8");
                            return;
                        }
                    }
                } else {
                    ChannelMessage::Binary(msg.data)
                };
                let _ = events_tx.send(ChannelEvent::Message(message));
            })
        }));
    }

    {
        let low = Arc::clone(&low);
        dc.on_close(Box::new(move || {
            let events_tx = events_tx.clone();
            let low = Arc::clone(&low);
            Box::pin(async move {
                debug!(label = CHANNEL_LABEL, "Data channel closed");
                low.notify_waiters();
                let _ = events_tx.send(ChannelEvent::Closed);
            })
        }));
    }

    dc.on_buffered_amount_low(Box::new(move || {
        let low = Arc::clone(&low);
        Box::pin(async move {
            low.notify_waiters();
        })
    }))
    .await;
}

/// Connectivity stack backed by webrtc-rs
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
    pc: Option<Arc<RTCPeerConnection>>,
    gathered: Option<mpsc::Receiver<()>>,
    ready_rx: Option<mpsc::UnboundedReceiver<Ready>>,
    /// Raised by the data channel's open callback for the current attempt
    opened: Arc<AtomicBool>,
}

impl WebRtcConnector {
    /// Create a connector using the given STUN/TURN urls
    #[must_use]
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            pc: None,
            gathered: None,
            ready_rx: None,
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn new_peer_connection(&self) -> TransportResult<Arc<RTCPeerConnection>> {
        let mut media = MediaEngine::default();
        let registry =
            register_default_interceptors(Registry::new(), &mut media).map_err(stack_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(stack_error)?);
        pc.on_peer_connection_state_change(Box::new(|state| {
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => info!("Peer connection established"),
                    RTCPeerConnectionState::Failed => warn!("Peer connection failed"),
                    RTCPeerConnectionState::Disconnected => {
                        warn!("Peer connection disconnected (ICE may recover)");
                    }
                    other => debug!(state = %other, "Peer connection state change"),
                }
            })
        }));
        Ok(pc)
    }

    fn peer(&self) -> TransportResult<&Arc<RTCPeerConnection>> {
        self.pc
            .as_ref()
            .ok_or_else(|| TransportError::Negotiation("no active peer connection".to_string()))
    }

    async fn install_local(&mut self, pc: &Arc<RTCPeerConnection>, desc: RTCSessionDescription) -> TransportResult<()> {
        self.gathered = Some(pc.gathering_complete_promise().await);
        pc.set_local_description(desc).await.map_err(stack_error)
    }
}

impl Default for WebRtcConnector {
    fn default() -> Self {
        Self::new(vec![DEFAULT_STUN_SERVER.to_string()])
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    type Channel = WebRtcChannel;

    async fn create_offer(&mut self) -> TransportResult<()> {
        let pc = self.new_peer_connection().await?;
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = pc
            .create_data_channel(CHANNEL_LABEL, Some(init))
            .await
            .map_err(stack_error)?;
        let opened = Arc::new(AtomicBool::new(false));
        attach_channel(dc, ready_tx, Arc::clone(&opened)).await;

        let offer = pc.create_offer(None).await.map_err(stack_error)?;
        self.install_local(&pc, offer).await?;

        self.pc = Some(pc);
        self.ready_rx = Some(ready_rx);
        self.opened = opened;
        Ok(())
    }

    async fn accept_offer(&mut self, offer: &SessionDescription) -> TransportResult<()> {
        let remote = to_rtc(offer)?;
        let pc = self.new_peer_connection().await?;
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let opened = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&opened);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let ready_tx = ready_tx.clone();
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                if dc.label() != CHANNEL_LABEL {
                    warn!(label = dc.label(), "Ignoring unexpected data channel");
                    return;
                }
                attach_channel(dc, ready_tx, flag).await;
            })
        }));

        pc.set_remote_description(remote).await.map_err(stack_error)?;
        let answer = pc.create_answer(None).await.map_err(stack_error)?;
        self.install_local(&pc, answer).await?;

        self.pc = Some(pc);
        self.ready_rx = Some(ready_rx);
        self.opened = opened;
        Ok(())
    }

    async fn accept_answer(&mut self, answer: &SessionDescription) -> TransportResult<()> {
        let remote = to_rtc(answer)?;
        self.peer()?
            .set_remote_description(remote)
            .await
            .map_err(stack_error)
    }

    async fn gathering_complete(&mut self) {
        match self.gathered.as_mut() {
            Some(done) => {
                let _ = done.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let pc = self.pc.as_ref()?;
        from_rtc(pc.local_description().await?)
    }

    async fn wait_channel(&mut self) -> TransportResult<(Arc<WebRtcChannel>, ChannelEvents)> {
        let ready_rx = self.ready_rx.as_mut().ok_or(TransportError::NotOpen)?;
        ready_rx.recv().await.ok_or(TransportError::Closed)
    }

    fn channel_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.gathered = None;
        self.ready_rx = None;
        self.opened = Arc::new(AtomicBool::new(false));
        if let Some(pc) = self.pc.take() {
            pc.close().await.map_err(stack_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_rejected() {
        let desc = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(to_rtc(&desc), Err(TransportError::Negotiation(_))));
    }

    #[test]
    fn test_default_uses_public_stun() {
        let connector = WebRtcConnector::default();
        assert_eq!(connector.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert!(!connector.channel_opened());
    }
}
