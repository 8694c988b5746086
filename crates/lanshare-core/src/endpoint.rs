//! Endpoint task.
//!
//! An endpoint owns one open channel and its [`TransferManager`] on a single
//! spawned task. The task multiplexes three sources, in priority order:
//!
//! 1. channel events (peer messages, close)
//! 2. commands from [`EndpointHandle`]s
//! 3. the send window of the active outbound transfer
//!
//! Because the select is biased, anything the peer or the user says is
//! processed before the next chunk leaves, so cancellation always takes
//! effect at the next chunk boundary.

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::events::TransferObserver;
use crate::manager::TransferManager;
use crate::transfer::{BufferSource, ChunkSource, FileSource, TransferId};
use bytes::Bytes;
use lanshare_transport::{Channel, ChannelEvent, ChannelEvents};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Pending commands per endpoint
const COMMAND_QUEUE: usize = 32;

type Reply<T> = oneshot::Sender<TransferResult<T>>;

enum Command {
    Chat {
        text: String,
        reply: Reply<()>,
    },
    Send {
        name: String,
        source: Box<dyn ChunkSource>,
        reply: Reply<TransferId>,
    },
    CancelSend {
        reply: Reply<()>,
    },
    CancelReceive {
        reply: Reply<()>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Handle to a running endpoint.
///
/// Cloneable; the endpoint closes its channel and stops once every handle
/// has been dropped.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat { .. } => f.write_str("Chat"),
            Self::Send { name, .. } => write!(f, "Send({name})"),
            Self::CancelSend { .. } => f.write_str("CancelSend"),
            Self::CancelReceive { .. } => f.write_str("CancelReceive"),
            Self::Close { .. } => f.write_str("Close"),
        }
    }
}

impl EndpointHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> TransferResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TransferError::EndpointClosed)?;
        response.await.map_err(|_| TransferError::EndpointClosed)?
    }

    /// Send a chat message
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ChannelUnavailable` if the channel is not
    /// open, `TransferError::EndpointClosed` if the endpoint has stopped.
    pub async fn send_chat(&self, text: impl Into<String>) -> TransferResult<()> {
        let text = text.into();
        self.request(|reply| Command::Chat { text, reply }).await
    }

    /// Start sending an object.
    ///
    /// Returns once the object has been announced; progress and completion
    /// are reported to the observer.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::TransferInProgress` if another object is
    /// being sent.
    pub async fn send_object(
        &self,
        name: impl Into<String>,
        source: Box<dyn ChunkSource>,
    ) -> TransferResult<TransferId> {
        let name = name.into();
        self.request(|reply| Command::Send {
            name,
            source,
            reply,
        })
        .await
    }

    /// Start sending an in-memory object
    ///
    /// # Errors
    ///
    /// See [`EndpointHandle::send_object`].
    pub async fn send_bytes(
        &self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> TransferResult<TransferId> {
        self.send_object(name, Box::new(BufferSource::new(data)))
            .await
    }

    /// Start sending a file, named after its last path component
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Source` if the file cannot be opened, or see
    /// [`EndpointHandle::send_object`].
    pub async fn send_file(&self, path: impl AsRef<Path>) -> TransferResult<TransferId> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        let source = FileSource::open(path).await?;
        self.send_object(name, Box::new(source)).await
    }

    /// Cancel the outbound transfer
    ///
    /// # Errors
    ///
    /// Returns `TransferError::NoActiveTransfer` if nothing is being sent,
    /// `TransferError::EndpointClosed` if the endpoint has stopped.
    pub async fn cancel_send(&self) -> TransferResult<()> {
        self.request(|reply| Command::CancelSend { reply }).await
    }

    /// Cancel the inbound transfer
    ///
    /// # Errors
    ///
    /// Returns `TransferError::NoActiveTransfer` if nothing is being
    /// received, `TransferError::EndpointClosed` if the endpoint has stopped.
    pub async fn cancel_receive(&self) -> TransferResult<()> {
        self.request(|reply| Command::CancelReceive { reply }).await
    }

    /// Close the channel and stop the endpoint
    ///
    /// # Errors
    ///
    /// Returns `TransferError::EndpointClosed` if the endpoint had already
    /// stopped, or the channel's close error.
    pub async fn close(&self) -> TransferResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Check if the endpoint task has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Spawn the endpoint task for an open channel.
///
/// `events` must be the event stream delivered with `channel`.
pub fn spawn_endpoint<C, O>(
    channel: Arc<C>,
    events: ChannelEvents,
    config: TransferConfig,
    observer: O,
) -> (EndpointHandle, JoinHandle<()>)
where
    C: Channel + ?Sized + 'static,
    O: TransferObserver + 'static,
{
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    let manager = TransferManager::new(channel, config, observer);
    let task = tokio::spawn(run(manager, events, commands_rx));
    (
        EndpointHandle {
            commands: commands_tx,
        },
        task,
    )
}

/// Whether the loop keeps running after a command
enum Flow {
    Continue,
    Stop,
}

async fn run<C, O>(
    mut manager: TransferManager<C, O>,
    mut events: ChannelEvents,
    mut commands: mpsc::Receiver<Command>,
) where
    C: Channel + ?Sized + 'static,
    O: TransferObserver,
{
    manager.init().await;
    tracing::debug!("Endpoint started");

    loop {
        let sending = manager.has_outbound();
        let window = manager.window_wait();

        tokio::select! {
            biased;

            event = events.recv() => match event {
                Some(ChannelEvent::Message(message)) => manager.handle_message(message).await,
                Some(ChannelEvent::Open) => tracing::debug!("Channel open"),
                Some(ChannelEvent::Closed) | None => {
                    manager.channel_closed();
                    break;
                }
            },

            command = commands.recv() => {
                let flow = match command {
                    Some(command) => execute(&mut manager, command).await,
                    None => {
                        tracing::debug!("All endpoint handles dropped, closing channel");
                        let channel = Arc::clone(manager.channel());
                        if let Err(e) = channel.close().await {
                            tracing::debug!("Channel close failed: {}", e);
                        }
                        manager.channel_closed();
                        Flow::Stop
                    }
                };
                if matches!(flow, Flow::Stop) {
                    break;
                }
            },

            outcome = window, if sending => manager.send_next_chunk(outcome).await,
        }
    }

    tracing::debug!("Endpoint stopped");
}

async fn execute<C, O>(manager: &mut TransferManager<C, O>, command: Command) -> Flow
where
    C: Channel + ?Sized + 'static,
    O: TransferObserver,
{
    tracing::trace!(?command, "Endpoint command");
    match command {
        Command::Chat { text, reply } => {
            let _ = reply.send(manager.send_chat(&text).await);
        }
        Command::Send {
            name,
            source,
            reply,
        } => {
            let _ = reply.send(manager.begin_send(name, source).await);
        }
        Command::CancelSend { reply } => {
            let _ = reply.send(manager.cancel_outbound().await);
        }
        Command::CancelReceive { reply } => {
            let _ = reply.send(manager.cancel_inbound().await);
        }
        Command::Close { reply } => {
            let channel = Arc::clone(manager.channel());
            let result = channel.close().await.map_err(TransferError::from);
            manager.channel_closed();
            let _ = reply.send(result);
            return Flow::Stop;
        }
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransferEvent;
    use lanshare_transport::MemoryChannel;
    use std::time::Duration;
    use tokio::time::timeout;

    type Events = mpsc::UnboundedReceiver<TransferEvent>;

    fn endpoint_pair(config: TransferConfig) -> ((EndpointHandle, Events), (EndpointHandle, Events)) {
        let ((a, a_events), (b, b_events)) = MemoryChannel::pair();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let (a_handle, _) = spawn_endpoint(a, a_events, config.clone(), a_tx);
        let (b_handle, _) = spawn_endpoint(b, b_events, config, b_tx);
        ((a_handle, a_rx), (b_handle, b_rx))
    }

    async fn next_matching(
        events: &mut Events,
        pred: impl Fn(&TransferEvent) -> bool,
    ) -> TransferEvent {
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

    #[tokio::test]
    async fn test_chat_roundtrip() {
        let ((alice, _), (_bob, mut bob_events)) = endpoint_pair(TransferConfig::default());
        alice.send_chat("hello bob").await.unwrap();

        let event = next_matching(&mut bob_events, |e| matches!(e, TransferEvent::Chat { .. })).await;
        assert_eq!(event, TransferEvent::Chat { text: "hello bob".into() });
    }

    #[tokio::test]
    async fn test_object_transfer() {
        let ((alice, mut alice_events), (_bob, mut bob_events)) =
            endpoint_pair(TransferConfig::default());
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let id = alice.send_bytes("data.bin", data.clone()).await.unwrap();

        let received = next_matching(&mut bob_events, |e| {
            matches!(e, TransferEvent::InboundCompleted { .. })
        })
        .await;
        match received {
            TransferEvent::InboundCompleted { id: got, name, data: bytes } => {
                assert_eq!(got, id);
                assert_eq!(name, "data.bin");
                assert_eq!(bytes.as_ref(), data.as_slice());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        next_matching(&mut alice_events, |e| {
            matches!(e, TransferEvent::OutboundCompleted { size: 100_000, .. })
        })
        .await;
    }

    #[tokio::test]
    async fn test_file_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        tokio::fs::write(&path, b"quarterly numbers").await.unwrap();

        let ((alice, _), (_bob, mut bob_events)) = endpoint_pair(TransferConfig::default());
        alice.send_file(&path).await.unwrap();

        match next_matching(&mut bob_events, |e| {
            matches!(e, TransferEvent::InboundCompleted { .. })
        })
        .await
        {
            TransferEvent::InboundCompleted { name, data, .. } => {
                assert_eq!(name, "report.txt");
                assert_eq!(data.as_ref(), b"quarterly numbers");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let ((alice, _), _) = endpoint_pair(TransferConfig::default());
        let err = alice.send_file("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, TransferError::Source(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_congested() {
        let ((a, a_events), (b, b_events)) = MemoryChannel::pair();
        let (a_tx, mut alice_events) = mpsc::unbounded_channel();
        let (b_tx, mut bob_events) = mpsc::unbounded_channel();
        let config = TransferConfig {
            chunk_size: 1024,
            high_water: 4096,
            low_water: 1024,
            drain_timeout: Duration::from_secs(3600),
            ..Default::default()
        };
        a.hold();
        let (alice, _) = spawn_endpoint(Arc::clone(&a), a_events, config.clone(), a_tx);
        let (_bob, _) = spawn_endpoint(b, b_events, config, b_tx);

        alice.send_bytes("big", vec![0u8; 64 * 1024]).await.unwrap();
        // Wait until the sender is parked on the window
        tokio::time::sleep(Duration::from_millis(100)).await;
        let frames = a.frames_sent();
        assert!(frames < 10, "sent {frames} frames into a congested channel");

        alice.cancel_send().await.unwrap();
        assert!(matches!(
            alice.cancel_send().await,
            Err(TransferError::NoActiveTransfer)
        ));
        assert_eq!(a.frames_sent(), frames + 1);

        next_matching(&mut alice_events, |e| {
            matches!(e, TransferEvent::Cancelled { origin: crate::CancelOrigin::Local, .. })
        })
        .await;

        a.release_all();
        next_matching(&mut bob_events, |e| {
            matches!(e, TransferEvent::Cancelled { origin: crate::CancelOrigin::Peer, .. })
        })
        .await;
    }

    #[tokio::test]
    async fn test_close_stops_both_endpoints() {
        let ((alice, mut alice_events), (bob, mut bob_events)) =
            endpoint_pair(TransferConfig::default());

        alice.close().await.unwrap();
        next_matching(&mut alice_events, |e| matches!(e, TransferEvent::ChannelClosed)).await;
        next_matching(&mut bob_events, |e| matches!(e, TransferEvent::ChannelClosed)).await;

        // Give bob's task a moment to exit
        timeout(Duration::from_secs(5), async {
            while !bob.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(
            alice.send_chat("anyone?").await,
            Err(TransferError::EndpointClosed)
        ));
        assert!(matches!(bob.cancel_send().await, Err(TransferError::EndpointClosed)));
    }

    #[tokio::test]
    async fn test_dropping_handles_closes_channel() {
        let ((alice, _), (_bob, mut bob_events)) = endpoint_pair(TransferConfig::default());
        drop(alice);
        next_matching(&mut bob_events, |e| matches!(e, TransferEvent::ChannelClosed)).await;
    }
}
