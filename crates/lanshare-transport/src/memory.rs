//! In-process channel and connector pair.
//!
//! [`MemoryChannel`] is an ordered, reliable channel between two ends of the
//! same process. Sends are delivered straight to the peer's event stream
//! unless the channel is *holding*, in which case they queue up and count
//! towards the buffered amount until released. That makes congestion
//! reproducible in tests.
//!
//! [`MemoryConnector`] pairs two connectors through a shared switchboard so
//! the full offer/answer flow can run without a network.

use crate::connector::{PeerConnector, SessionDescription};
use crate::transport::{
    Channel, ChannelEvent, ChannelEvents, ChannelMessage, ChannelState, TransportError,
    TransportResult, TransportStats,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};

/// Shared lifecycle state of both ends
#[derive(Debug)]
struct LinkState(AtomicU8);

impl LinkState {
    fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    fn encode(state: ChannelState) -> u8 {
        match state {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closing => 2,
            ChannelState::Closed => 3,
        }
    }

    fn decode(raw: u8) -> ChannelState {
        match raw {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    fn get(&self) -> ChannelState {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    fn swap(&self, state: ChannelState) -> ChannelState {
        Self::decode(self.0.swap(Self::encode(state), Ordering::AcqRel))
    }
}

/// One end of an in-process channel
#[derive(Debug)]
pub struct MemoryChannel {
    /// Lifecycle state shared with the peer end
    link: Arc<LinkState>,
    /// Own event stream (for `Open`/`Closed`)
    own_tx: mpsc::UnboundedSender<ChannelEvent>,
    /// Peer event stream
    peer_tx: mpsc::UnboundedSender<ChannelEvent>,
    /// Messages queued while holding
    outbox: Mutex<VecDeque<ChannelMessage>>,
    /// Whether sends are queued instead of delivered
    holding: AtomicBool,
    /// Bytes queued in the outbox
    buffered: AtomicUsize,
    /// Buffered-amount-low threshold
    low_threshold: AtomicUsize,
    /// Fired when the buffered amount drops to the threshold or on close
    low: Notify,
    /// Frames sent (including queued ones)
    sent_frames: AtomicU64,
    /// Traffic statistics for this end
    stats: Arc<Mutex<TransportStats>>,
    /// Statistics of the peer end, credited on delivery
    peer_stats: Arc<Mutex<TransportStats>>,
}

impl MemoryChannel {
    fn new_pair(
        initial: ChannelState,
    ) -> ((Arc<Self>, ChannelEvents), (Arc<Self>, ChannelEvents)) {
        let link = Arc::new(LinkState::new(initial));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a_stats = Arc::new(Mutex::new(TransportStats::new()));
        let b_stats = Arc::new(Mutex::new(TransportStats::new()));

        let a = Arc::new(Self::new_end(
            Arc::clone(&link),
            (a_tx.clone(), Arc::clone(&a_stats)),
            (b_tx.clone(), Arc::clone(&b_stats)),
        ));
        let b = Arc::new(Self::new_end(link, (b_tx, b_stats), (a_tx, a_stats)));

        ((a, a_rx), (b, b_rx))
    }

    fn new_end(
        link: Arc<LinkState>,
        (own_tx, stats): (mpsc::UnboundedSender<ChannelEvent>, Arc<Mutex<TransportStats>>),
        (peer_tx, peer_stats): (mpsc::UnboundedSender<ChannelEvent>, Arc<Mutex<TransportStats>>),
    ) -> Self {
        Self {
            link,
            own_tx,
            peer_tx,
            outbox: Mutex::new(VecDeque::new()),
            holding: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            low_threshold: AtomicUsize::new(0),
            low: Notify::new(),
            sent_frames: AtomicU64::new(0),
            stats,
            peer_stats,
        }
    }

    /// Create an already-open channel pair
    #[must_use]
    pub fn pair() -> ((Arc<Self>, ChannelEvents), (Arc<Self>, ChannelEvents)) {
        Self::new_pair(ChannelState::Open)
    }

    /// Create a channel pair in the `Connecting` state; call [`MemoryChannel::open`]
    /// on either end to open both.
    #[must_use]
    pub fn pending_pair() -> ((Arc<Self>, ChannelEvents), (Arc<Self>, ChannelEvents)) {
        Self::new_pair(ChannelState::Connecting)
    }

    /// Open both ends, emitting [`ChannelEvent::Open`] on each.
    pub fn open(&self) {
        if self.link.get() == ChannelState::Connecting {
            self.link.swap(ChannelState::Open);
            let _ = self.own_tx.send(ChannelEvent::Open);
            let _ = self.peer_tx.send(ChannelEvent::Open);
        }
    }

    /// Start queuing sends instead of delivering them (simulated congestion).
    pub fn hold(&self) {
        self.holding.store(true, Ordering::Release);
    }

    /// Deliver queued messages in order until at least `max_bytes` have been
    /// released or the queue is empty. Returns the bytes released.
    pub fn release(&self, max_bytes: usize) -> usize {
        let mut released = 0;
        let mut outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());

        while released < max_bytes {
            let Some(message) = outbox.pop_front() else {
                break;
            };
            let len = message.len();
            released += len;
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            let _ = self.deliver(message);
        }
        drop(outbox);

        if self.buffered.load(Ordering::Acquire) <= self.low_threshold.load(Ordering::Acquire) {
            self.low.notify_waiters();
        }

        released
    }

    /// Stop holding and deliver everything queued so far.
    pub fn release_all(&self) -> usize {
        self.holding.store(false, Ordering::Release);
        self.release(usize::MAX)
    }

    /// Number of frames sent so far (delivered or queued)
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.sent_frames.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> TransportResult<()> {
        match self.link.get() {
            ChannelState::Open => Ok(()),
            ChannelState::Connecting => Err(TransportError::NotOpen),
            ChannelState::Closing | ChannelState::Closed => Err(TransportError::Closed),
        }
    }

    fn dispatch(&self, message: ChannelMessage) -> TransportResult<()> {
        self.ensure_open()?;

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_send(&message);
        }
        self.sent_frames.fetch_add(1, Ordering::AcqRel);

        if self.holding.load(Ordering::Acquire) {
            self.buffered.fetch_add(message.len(), Ordering::AcqRel);
            self.outbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(message);
            return Ok(());
        }

        self.deliver(message)
    }

    fn deliver(&self, message: ChannelMessage) -> TransportResult<()> {
        let len = message.len();
        self.peer_tx
            .send(ChannelEvent::Message(message))
            .map_err(|_| TransportError::Closed)?;
        if let Ok(mut stats) = self.peer_stats.lock() {
            stats.record_recv(len);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_text(&self, text: &str) -> TransportResult<()> {
        self.dispatch(ChannelMessage::Text(text.to_string()))
    }

    async fn send_binary(&self, data: Bytes) -> TransportResult<()> {
        self.dispatch(ChannelMessage::Binary(data))
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    async fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.low_threshold.store(threshold, Ordering::Release);
    }

    async fn buffered_amount_low(&self) {
        let notified = self.low.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.link.get() == ChannelState::Closed
            || self.buffered.load(Ordering::Acquire) <= self.low_threshold.load(Ordering::Acquire)
        {
            return;
        }
        notified.await;
    }

    fn state(&self) -> ChannelState {
        self.link.get()
    }

    async fn close(&self) -> TransportResult<()> {
        if self.link.swap(ChannelState::Closed) == ChannelState::Closed {
            return Ok(());
        }

        self.outbox.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.buffered.store(0, Ordering::Release);
        self.low.notify_waiters();

        let _ = self.own_tx.send(ChannelEvent::Closed);
        let _ = self.peer_tx.send(ChannelEvent::Closed);
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

/// Candidate gathering behaviour of a [`MemoryConnector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gathering {
    /// Gathering completes after the given delay
    After(Duration),
    /// Gathering never completes (exercises the gathering timeout)
    Never,
}

type End = (Arc<MemoryChannel>, ChannelEvents);

/// State shared by both connectors of a pair
struct Switchboard {
    /// Channel ends for the current attempt: (offerer end, answerer end)
    channels: Mutex<(Option<End>, Option<End>)>,
    /// Set once the offerer has applied the answer
    connected: watch::Sender<bool>,
    /// Attempt counter, bumped on every reset
    generation: AtomicU64,
}

impl Switchboard {
    fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (offer_end, answer_end) = MemoryChannel::pending_pair();
        Self {
            channels: Mutex::new((Some(offer_end), Some(answer_end))),
            connected,
            generation: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        let (offer_end, answer_end) = MemoryChannel::pending_pair();
        *self.channels.lock().unwrap_or_else(|e| e.into_inner()) =
            (Some(offer_end), Some(answer_end));
        self.connected.send_replace(false);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Open the pending pair; both ends see `Open` right away
    fn open_pending(&self) {
        let guard = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((end, _)) = guard.0.as_ref().or(guard.1.as_ref()) {
            end.open();
        }
    }

    fn take_end(&self, offerer: bool) -> Option<End> {
        let mut guard = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if offerer {
            guard.0.take()
        } else {
            guard.1.take()
        }
    }
}

/// Negotiation role of a memory connector attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Offerer,
    Answerer,
}

/// In-process connectivity stack.
///
/// Descriptions are syntactically valid SDP so they pass the same validation
/// as real ones; the connection itself is established through the shared
/// switchboard once the offerer applies the answer.
pub struct MemoryConnector {
    board: Arc<Switchboard>,
    side: Option<Side>,
    local: Option<SessionDescription>,
    gathering: Gathering,
    gathered: bool,
    taken: bool,
    fail_next: bool,
}

impl MemoryConnector {
    /// Create two connectors wired to each other
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let board = Arc::new(Switchboard::new());
        (Self::with_board(Arc::clone(&board)), Self::with_board(board))
    }

    fn with_board(board: Arc<Switchboard>) -> Self {
        Self {
            board,
            side: None,
            local: None,
            gathering: Gathering::After(Duration::ZERO),
            gathered: false,
            taken: false,
            fail_next: false,
        }
    }

    /// Set the candidate gathering behaviour
    #[must_use]
    pub fn with_gathering(mut self, gathering: Gathering) -> Self {
        self.gathering = gathering;
        self
    }

    /// Make the next `create_offer`/`accept_offer` fail inside the stack
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    fn render_sdp(&self) -> String {
        let generation = self.board.generation.load(Ordering::Acquire);
        let mut sdp = format!(
            "v=0\r\no=- {generation} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
             c=IN IP4 0.0.0.0\r\na=mid:0\r\na=sctp-port:5000\r\n"
        );
        if self.gathered {
            sdp.push_str("a=candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host\r\n");
            sdp.push_str("a=end-of-candidates\r\n");
        }
        sdp
    }

    fn take_failure(&mut self) -> TransportResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(TransportError::Negotiation(
                "simulated connectivity stack failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    type Channel = MemoryChannel;

    async fn create_offer(&mut self) -> TransportResult<()> {
        self.take_failure()?;
        self.side = Some(Side::Offerer);
        self.gathered = false;
        self.local = Some(SessionDescription::offer(self.render_sdp()));
        Ok(())
    }

    async fn accept_offer(&mut self, _offer: &SessionDescription) -> TransportResult<()> {
        self.take_failure()?;
        self.side = Some(Side::Answerer);
        self.gathered = false;
        self.local = Some(SessionDescription::answer(self.render_sdp()));
        Ok(())
    }

    async fn accept_answer(&mut self, _answer: &SessionDescription) -> TransportResult<()> {
        if self.side != Some(Side::Offerer) {
            return Err(TransportError::Negotiation(
                "no local offer to answer".to_string(),
            ));
        }
        self.board.open_pending();
        self.board.connected.send_replace(true);
        Ok(())
    }

    async fn gathering_complete(&mut self) {
        match self.gathering {
            Gathering::After(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.gathered = true;
            }
            Gathering::Never => std::future::pending::<()>().await,
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let mut local = self.local.clone()?;
        local.sdp = self.render_sdp();
        Some(local)
    }

    async fn wait_channel(&mut self) -> TransportResult<(Arc<MemoryChannel>, ChannelEvents)> {
        let side = self.side.ok_or(TransportError::NotOpen)?;
        if self.taken {
            return Err(TransportError::Other("channel already taken".to_string()));
        }

        let mut connected = self.board.connected.subscribe();
        connected
            .wait_for(|up| *up)
            .await
            .map_err(|_| TransportError::Closed)?;

        let (channel, events) = self
            .board
            .take_end(side == Side::Offerer)
            .ok_or(TransportError::Closed)?;
        self.taken = true;
        Ok((channel, events))
    }

    fn channel_opened(&self) -> bool {
        self.side.is_some() && *self.board.connected.borrow()
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.side.take().is_some() || self.taken {
            self.board.reset();
        }
        self.local = None;
        self.gathered = false;
        self.taken = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_message(events: &mut ChannelEvents) -> ChannelMessage {
        loop {
            match events.recv().await {
                Some(ChannelEvent::Message(message)) => return message,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let ((a, _a_events), (b, mut b_events)) = MemoryChannel::pair();

        a.send_text("one").await.unwrap();
        a.send_binary(Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(next_message(&mut b_events).await, ChannelMessage::Text("one".into()));
        assert_eq!(
            next_message(&mut b_events).await,
            ChannelMessage::Binary(Bytes::from_static(b"two"))
        );
        assert_eq!(a.stats().text_sent, 1);
        assert_eq!(a.stats().binary_sent, 1);
        assert_eq!(b.stats().messages_received, 2);
        assert_eq!(b.stats().bytes_received, 6);
        assert_eq!(a.stats().bytes_received, 0);
    }

    #[tokio::test]
    async fn test_held_frames_counted_on_release() {
        let ((a, _a_events), (b, _b_events)) = MemoryChannel::pair();
        a.hold();
        a.send_binary(Bytes::from(vec![0u8; 10])).await.unwrap();
        assert_eq!(a.stats().bytes_sent, 10);
        assert_eq!(b.stats().bytes_received, 0);

        a.release_all();
        assert_eq!(b.stats().bytes_received, 10);
        assert_eq!(b.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_hold_accumulates_buffered_amount() {
        let ((a, _a_events), (_b, mut b_events)) = MemoryChannel::pair();
        a.set_buffered_amount_low_threshold(4).await;
        a.hold();

        a.send_binary(Bytes::from(vec![0u8; 10])).await.unwrap();
        a.send_binary(Bytes::from(vec![1u8; 10])).await.unwrap();
        assert_eq!(a.buffered_amount().await, 20);
        assert!(b_events.try_recv().is_err());

        assert_eq!(a.release(10), 10);
        assert_eq!(a.buffered_amount().await, 10);
        assert_eq!(next_message(&mut b_events).await.len(), 10);

        assert_eq!(a.release_all(), 10);
        assert_eq!(a.buffered_amount().await, 0);
        // Below threshold now: resolves immediately.
        a.buffered_amount_low().await;
    }

    #[tokio::test]
    async fn test_close_notifies_both_ends() {
        let ((a, mut a_events), (b, mut b_events)) = MemoryChannel::pair();

        a.close().await.unwrap();
        a.close().await.unwrap();

        assert_eq!(a_events.recv().await, Some(ChannelEvent::Closed));
        assert_eq!(b_events.recv().await, Some(ChannelEvent::Closed));
        assert!(a_events.try_recv().is_err());
        assert_eq!(b.state(), ChannelState::Closed);
        assert!(matches!(b.send_text("late").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_pending_pair_rejects_sends() {
        let ((a, mut a_events), (_b, mut b_events)) = MemoryChannel::pending_pair();
        assert!(matches!(a.send_text("early").await, Err(TransportError::NotOpen)));

        a.open();
        assert_eq!(a_events.recv().await, Some(ChannelEvent::Open));
        assert_eq!(b_events.recv().await, Some(ChannelEvent::Open));
        assert!(a.send_text("now").await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_pair_establishes_channel() {
        let (mut offerer, mut answerer) = MemoryConnector::pair();

        offerer.create_offer().await.unwrap();
        offerer.gathering_complete().await;
        let offer = offerer.local_description().await.unwrap();
        assert!(offer.sdp.contains("a=candidate:"));

        answerer.accept_offer(&offer).await.unwrap();
        answerer.gathering_complete().await;
        let answer = answerer.local_description().await.unwrap();

        offerer.accept_answer(&answer).await.unwrap();

        let (a, _a_events) = offerer.wait_channel().await.unwrap();
        let (_b, mut b_events) = answerer.wait_channel().await.unwrap();
        assert!(offerer.channel_opened());

        a.send_text("over the switchboard").await.unwrap();
        assert_eq!(
            next_message(&mut b_events).await,
            ChannelMessage::Text("over the switchboard".into())
        );
    }

    #[tokio::test]
    async fn test_channel_opened_before_handover() {
        let (mut offerer, mut answerer) = MemoryConnector::pair();
        offerer.create_offer().await.unwrap();
        let offer = offerer.local_description().await.unwrap();
        answerer.accept_offer(&offer).await.unwrap();
        let answer = answerer.local_description().await.unwrap();
        assert!(!answerer.channel_opened());

        // Open as soon as the answer is applied, before anyone takes the channel
        offerer.accept_answer(&answer).await.unwrap();
        assert!(offerer.channel_opened());
        assert!(answerer.channel_opened());

        let (b, mut b_events) = answerer.wait_channel().await.unwrap();
        assert!(b.is_open());
        assert_eq!(b_events.recv().await, Some(ChannelEvent::Open));

        answerer.close().await.unwrap();
        assert!(!answerer.channel_opened());
    }

    #[tokio::test]
    async fn test_connector_fail_next() {
        let (mut offerer, _answerer) = MemoryConnector::pair();
        offerer.fail_next();
        assert!(offerer.create_offer().await.is_err());
        assert!(offerer.create_offer().await.is_ok());
    }
}
