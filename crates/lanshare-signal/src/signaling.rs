//! Signaling strategies.
//!
//! A [`SignalingTransport`] moves session descriptions between the two
//! endpoints. [`ManualSignaling`] hands them to the operator for copy/paste;
//! [`RelayedSignaling`] sends them through a [`RelayClient`]. The
//! `establish_as_*` drivers run a complete exchange over either one.

use crate::description::parse_description;
use crate::error::{NegotiationError, SignalError};
use crate::negotiator::Negotiator;
use crate::relay::{RelayClient, RelayEnvelope, RelayMessage};
use async_trait::async_trait;
use lanshare_transport::{ChannelEvents, PeerConnector, SessionDescription};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Delivery strategy for session descriptions
#[async_trait]
pub trait SignalingTransport: Send {
    /// Hand the local description to the peer.
    async fn deliver(&mut self, description: &SessionDescription) -> Result<(), SignalError>;

    /// Wait for the next remote description.
    ///
    /// `SignalError::DescriptionParse` is recoverable: the caller may simply
    /// call `receive` again.
    async fn receive(&mut self) -> Result<SessionDescription, SignalError>;
}

/// Copy/paste signaling over a line reader and a writer (stdin/stdout in the CLI)
pub struct ManualSignaling<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ManualSignaling<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create manual signaling over the given source and sink
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Recover the reader and writer
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

const BANNER_PREFIX: &str = "-----";

#[async_trait]
impl<R, W> SignalingTransport for ManualSignaling<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&mut self, description: &SessionDescription) -> Result<(), SignalError> {
        let kind = description.sdp_type.to_string().to_uppercase();
        let json = description
            .to_json()
            .map_err(|e| SignalError::Io(std::io::Error::other(e)))?;

        let text = format!(
            "{BANNER_PREFIX} BEGIN LANSHARE {kind} (copy the next line to your peer) {BANNER_PREFIX}\n\
             {json}\n\
             {BANNER_PREFIX} END LANSHARE {kind} {BANNER_PREFIX}\n"
        );
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<SessionDescription, SignalError> {
        self.writer
            .write_all(b"Paste the peer's description and press Enter:\n")
            .await?;
        self.writer.flush().await?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(SignalError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(BANNER_PREFIX) {
                continue;
            }
            return Ok(parse_description(trimmed)?);
        }
    }
}

/// Signaling through a broadcast relay.
///
/// The relay does not buffer, so the last delivered description is kept
/// and sent again whenever the other client announces that it joined.
pub struct RelayedSignaling {
    client: RelayClient,
    delivered: Option<String>,
}

impl RelayedSignaling {
    /// Wrap a connected relay client without announcing it
    #[must_use]
    pub fn new(client: RelayClient) -> Self {
        Self {
            client,
            delivered: None,
        }
    }

    /// Connect to a relay, wrap the client and announce it to the other
    /// participant
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot be reached.
    pub async fn connect(addr: &str) -> Result<Self, SignalError> {
        let mut signaling = Self::new(RelayClient::connect(addr).await?);
        signaling.announce().await?;
        Ok(signaling)
    }

    /// Tell the other participant that this client is listening
    ///
    /// # Errors
    ///
    /// Returns error if the relay connection fails.
    pub async fn announce(&mut self) -> Result<(), SignalError> {
        self.client.send_line(&RelayMessage::ready_line()).await?;
        debug!("Announced on relay");
        Ok(())
    }
}

#[async_trait]
impl SignalingTransport for RelayedSignaling {
    async fn deliver(&mut self, description: &SessionDescription) -> Result<(), SignalError> {
        let envelope = RelayEnvelope::new(description.clone());
        let line = envelope.encode();
        self.client.send_line(&line).await?;
        debug!(kind = ?envelope.kind, "Description sent via relay");
        self.delivered = Some(line);
        Ok(())
    }

    async fn receive(&mut self) -> Result<SessionDescription, SignalError> {
        loop {
            let line = self.client.recv_line().await?;
            match RelayMessage::decode(&line) {
                Ok(RelayMessage::Description(envelope)) => {
                    debug!(kind = ?envelope.kind, "Description received via relay");
                    return Ok(envelope.description);
                }
                Ok(RelayMessage::Ready) => {
                    if let Some(line) = &self.delivered {
                        info!("Peer joined the relay; sending description again");
                        self.client.send_line(line).await?;
                    } else {
                        debug!("Peer joined the relay");
                    }
                }
                Ok(RelayMessage::Other) => {
                    warn!("Skipping relayed message of unknown type");
                }
                Err(e) => {
                    warn!(error = %e, "Malformed relayed description");
                    return Err(SignalError::DescriptionParse(e));
                }
            }
        }
    }
}

/// Channel established by a complete exchange
pub type Established<P> = (Arc<<P as PeerConnector>::Channel>, ChannelEvents);

async fn next_description<S>(signaling: &mut S) -> Result<SessionDescription, NegotiationError>
where
    S: SignalingTransport + ?Sized,
{
    loop {
        match signaling.receive().await {
            Ok(description) => return Ok(description),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Ignoring unusable description; waiting for another");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Run the offerer side: create and deliver an offer, apply the answer,
/// then wait for the channel.
///
/// Malformed or mistyped answers are logged and skipped.
///
/// # Errors
///
/// Returns the first unrecoverable negotiation or signaling error.
pub async fn establish_as_offerer<P, S>(
    negotiator: &mut Negotiator<P>,
    signaling: &mut S,
) -> Result<Established<P>, NegotiationError>
where
    P: PeerConnector,
    S: SignalingTransport + ?Sized,
{
    let offer = negotiator.create_offer().await?;
    signaling.deliver(&offer.description).await?;

    loop {
        let answer = next_description(signaling).await?;
        match negotiator.accept_answer(&answer).await {
            Ok(()) => break,
            Err(NegotiationError::InvalidDescription(e)) => {
                warn!(error = %e, "Ignoring description that is not an answer");
            }
            Err(e) => return Err(e),
        }
    }

    negotiator.connect().await
}

/// Run the answerer side: wait for an offer, deliver the answer, then wait
/// for the channel.
///
/// Malformed or mistyped offers are logged and skipped.
///
/// # Errors
///
/// Returns the first unrecoverable negotiation or signaling error.
pub async fn establish_as_answerer<P, S>(
    negotiator: &mut Negotiator<P>,
    signaling: &mut S,
) -> Result<Established<P>, NegotiationError>
where
    P: PeerConnector,
    S: SignalingTransport + ?Sized,
{
    let answer = loop {
        let offer = next_description(signaling).await?;
        match negotiator.accept_offer(&offer).await {
            Ok(answer) => break answer,
            Err(NegotiationError::InvalidDescription(e)) => {
                warn!(error = %e, "Ignoring description that is not an offer");
            }
            Err(e) => return Err(e),
        }
    };
    signaling.deliver(&answer.description).await?;

    negotiator.connect().await
}
