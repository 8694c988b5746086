//! Two connected endpoints over an in-memory channel.

use lanshare_core::{EndpointHandle, TransferConfig, TransferEvent, spawn_endpoint};
use lanshare_signal::{
    NegotiationConfig, NegotiationError, Negotiator, RelayServer, RelayedSignaling,
    establish_as_answerer, establish_as_offerer,
};
use lanshare_transport::{ChannelEvents, MemoryChannel, MemoryConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Observer side of an endpoint
pub type Events = mpsc::UnboundedReceiver<TransferEvent>;

/// Two endpoints, "alice" and "bob", with access to the raw channels
pub struct EndpointPair {
    pub alice: EndpointHandle,
    pub alice_events: Events,
    pub alice_channel: Arc<MemoryChannel>,
    pub alice_task: JoinHandle<()>,
    pub bob: EndpointHandle,
    pub bob_events: Events,
    pub bob_channel: Arc<MemoryChannel>,
    pub bob_task: JoinHandle<()>,
}

impl EndpointPair {
    /// Connect two endpoints over a fresh in-memory channel
    pub fn new(config: TransferConfig) -> Self {
        let ((a, a_events), (b, b_events)) = MemoryChannel::pair();
        Self::from_channels(config, (a, a_events), (b, b_events))
    }

    /// Spawn endpoints over already-established channels
    pub fn from_channels(
        config: TransferConfig,
        (alice_channel, a_events): (Arc<MemoryChannel>, ChannelEvents),
        (bob_channel, b_events): (Arc<MemoryChannel>, ChannelEvents),
    ) -> Self {
        let (a_tx, alice_events) = mpsc::unbounded_channel();
        let (b_tx, bob_events) = mpsc::unbounded_channel();
        let (alice, alice_task) =
            spawn_endpoint(Arc::clone(&alice_channel), a_events, config.clone(), a_tx);
        let (bob, bob_task) = spawn_endpoint(Arc::clone(&bob_channel), b_events, config, b_tx);

        Self {
            alice,
            alice_events,
            alice_channel,
            alice_task,
            bob,
            bob_events,
            bob_channel,
            bob_task,
        }
    }
}

/// Wait for the first event matching `pred`, skipping others.
///
/// # Panics
///
/// Panics if the stream ends or nothing matches within ten seconds.
pub async fn next_event(events: &mut Events, pred: impl Fn(&TransferEvent) -> bool) -> TransferEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Start a relay on an ephemeral loopback port
///
/// # Panics
///
/// Panics if the listener cannot bind.
pub async fn start_relay() -> SocketAddr {
    let server = RelayServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// Negotiate an in-memory channel pair through a relay, offerer first.
///
/// The answerer connects before the offer is sent so the relay can
/// forward it.
pub async fn negotiate_over_relay(
    relay: SocketAddr,
) -> Result<
    (
        (Arc<MemoryChannel>, ChannelEvents),
        (Arc<MemoryChannel>, ChannelEvents),
    ),
    NegotiationError,
> {
    let (offer_side, answer_side) = MemoryConnector::pair();
    let mut offerer = Negotiator::new(offer_side, NegotiationConfig::default());
    let mut answerer = Negotiator::new(answer_side, NegotiationConfig::default());

    let addr = relay.to_string();
    let mut answer_signaling = RelayedSignaling::connect(&addr).await?;
    let mut offer_signaling = RelayedSignaling::connect(&addr).await?;
    // Both clients must be registered before the first line is relayed
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (offered, answered) = tokio::join!(
        establish_as_offerer(&mut offerer, &mut offer_signaling),
        establish_as_answerer(&mut answerer, &mut answer_signaling),
    );

    Ok((offered?, answered?))
}
