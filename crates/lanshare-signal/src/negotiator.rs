//! Offer/answer negotiation state machine.
//!
//! The [`Negotiator`] owns one [`PeerConnector`] and exposes only the
//! operations valid in its current state. Every failed operation leaves the
//! state as it was (or, when an earlier attempt had to be torn down first, in
//! `Reset`), so a caller can always retry or reset and renegotiate.
//!
//! ```text
//! Idle/Reset ─create_offer─▶ LocalOfferCreated ─▶ GatheringCandidates ─▶ LocalDescriptionReady ─connect─▶ Connected
//! Idle/Reset ─accept_offer─▶ RemoteOfferReceived ─▶ LocalAnswerCreated ─▶ GatheringCandidates ─▶ ...
//!                                                                          LocalDescriptionReady ─timeout─▶ Failed
//! any ─reset─▶ Reset
//! ```

use crate::description::{expect_type, validate_description};
use crate::error::NegotiationError;
use lanshare_transport::{ChannelEvents, PeerConnector, SdpType, SessionDescription};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default candidate gathering bound
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on waiting for the channel to open
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default STUN server handed to the connectivity stack
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Negotiation configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Bound on candidate gathering; on expiry the partial description is used
    pub gather_timeout: Duration,
    /// Bound on waiting for the channel to open
    pub connect_timeout: Duration,
    /// STUN/TURN server urls
    pub ice_servers: Vec<String>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

impl NegotiationConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `NegotiationError::InvalidConfig` naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<(), NegotiationError> {
        for (name, value) in [
            ("gather_timeout", self.gather_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(NegotiationError::InvalidConfig(format!(
                    "{name} must be non-zero"
                )));
            }
        }
        Ok(())
    }
}

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing negotiated yet
    Idle,
    /// Local offer installed (offerer)
    LocalOfferCreated,
    /// Remote offer installed (answerer)
    RemoteOfferReceived,
    /// Local answer installed (answerer)
    LocalAnswerCreated,
    /// Waiting for candidate gathering
    GatheringCandidates,
    /// Local description ready to hand to the peer
    LocalDescriptionReady,
    /// Channel open
    Connected,
    /// Channel failed to open
    Failed,
    /// Torn down; a new negotiation may start
    Reset,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LocalOfferCreated => "local-offer-created",
            Self::RemoteOfferReceived => "remote-offer-received",
            Self::LocalAnswerCreated => "local-answer-created",
            Self::GatheringCandidates => "gathering-candidates",
            Self::LocalDescriptionReady => "local-description-ready",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

impl NegotiationState {
    /// Check if a new negotiation may start from this state
    #[must_use]
    pub fn is_startable(self) -> bool {
        matches!(self, Self::Idle | Self::Reset)
    }
}

/// Negotiation role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the offer
    Offerer,
    /// Answered a remote offer
    Answerer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offerer => f.write_str("offerer"),
            Self::Answerer => f.write_str("answerer"),
        }
    }
}

/// Local description produced by one negotiation step.
///
/// Superseded wholesale on renegotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationDescription {
    /// Role that produced it
    pub role: Role,
    /// Description to deliver to the peer
    pub description: SessionDescription,
    /// Whether candidate gathering finished before the bound expired
    pub gathering_complete: bool,
}

/// Offer/answer state machine over a [`PeerConnector`]
pub struct Negotiator<P: PeerConnector> {
    connector: P,
    config: NegotiationConfig,
    state: NegotiationState,
    role: Option<Role>,
    local: Option<NegotiationDescription>,
    answer_applied: bool,
}

impl<P: PeerConnector> Negotiator<P> {
    /// Create an idle negotiator
    pub fn new(connector: P, config: NegotiationConfig) -> Self {
        Self {
            connector,
            config,
            state: NegotiationState::Idle,
            role: None,
            local: None,
            answer_applied: false,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Current role, if a negotiation is under way
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Latest local description
    #[must_use]
    pub fn local_description(&self) -> Option<&NegotiationDescription> {
        self.local.as_ref()
    }

    /// Negotiation configuration
    #[must_use]
    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Access the underlying connector
    pub fn connector_mut(&mut self) -> &mut P {
        &mut self.connector
    }

    /// Check if a transition is valid
    #[must_use]
    pub fn can_transition(&self, to: NegotiationState) -> bool {
        use NegotiationState::*;

        match (self.state, to) {
            (_, Reset) => true,
            (Idle | Reset, LocalOfferCreated | RemoteOfferReceived) => true,
            (LocalOfferCreated | LocalAnswerCreated, GatheringCandidates) => true,
            (RemoteOfferReceived, LocalAnswerCreated) => true,
            (GatheringCandidates, LocalDescriptionReady) => true,
            (LocalDescriptionReady, Connected | Failed | RemoteOfferReceived) => true,
            _ => false,
        }
    }

    fn transition_to(&mut self, to: NegotiationState) {
        debug_assert!(self.can_transition(to), "{} -> {}", self.state, to);
        debug!(from = %self.state, to = %to, "Negotiation state transition");
        self.state = to;
    }

    /// Put the state back after a failed step without going through the table
    fn restore(&mut self, to: NegotiationState, role: Option<Role>) {
        debug!(from = %self.state, to = %to, "Negotiation state restored");
        self.state = to;
        self.role = role;
    }

    /// Create a local offer and gather candidates.
    ///
    /// Valid from `Idle` or `Reset`. On gathering timeout the partial
    /// description is returned with `gathering_complete == false`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `Idle`/`Reset`, or `Transport` if the
    /// connectivity stack fails (state restored).
    pub async fn create_offer(&mut self) -> Result<NegotiationDescription, NegotiationError> {
        if !self.state.is_startable() {
            return Err(NegotiationError::InvalidState {
                operation: "create an offer",
                state: self.state,
            });
        }

        let prior = (self.state, self.role);
        if let Err(e) = self.connector.create_offer().await {
            self.teardown_after_error().await;
            self.restore(prior.0, prior.1);
            return Err(e.into());
        }

        self.role = Some(Role::Offerer);
        self.answer_applied = false;
        self.transition_to(NegotiationState::LocalOfferCreated);

        match self.finish_local(Role::Offerer).await {
            Ok(desc) => Ok(desc),
            Err(e) => {
                self.teardown_after_error().await;
                self.restore(prior.0, prior.1);
                Err(e)
            }
        }
    }

    /// Install a remote offer and produce the local answer.
    ///
    /// Valid from `Idle` or `Reset`. While a previous answer is pending and no
    /// channel has opened, a new offer supersedes it.
    ///
    /// # Errors
    ///
    /// - `InvalidDescription` if the offer fails validation (state unchanged)
    /// - `ResetRequired` if a channel is already open
    /// - `InvalidState` if this side is a pending offerer
    /// - `Transport` if the connectivity stack fails
    pub async fn accept_offer(
        &mut self,
        offer: &SessionDescription,
    ) -> Result<NegotiationDescription, NegotiationError> {
        validate_description(offer)?;
        expect_type(offer, &[SdpType::Offer], "offer")?;

        let mut prior = (self.state, self.role);
        match (self.state, self.role) {
            (state, _) if state.is_startable() => {}
            (NegotiationState::Connected, _) => return Err(NegotiationError::ResetRequired),
            (NegotiationState::LocalDescriptionReady, Some(Role::Answerer)) => {
                if self.connector.channel_opened() {
                    return Err(NegotiationError::ResetRequired);
                }
                info!("Superseding pending answer with a new offer");
                if let Err(e) = self.connector.close().await {
                    warn!(error = %e, "Failed to tear down superseded attempt");
                }
                self.local = None;
                // The earlier attempt is gone; a failure from here lands in Reset.
                prior = (NegotiationState::Reset, None);
            }
            (NegotiationState::Failed, _) => return Err(NegotiationError::ResetRequired),
            (state, _) => {
                return Err(NegotiationError::InvalidState {
                    operation: "accept an offer",
                    state,
                });
            }
        }

        if let Err(e) = self.connector.accept_offer(offer).await {
            self.teardown_after_error().await;
            self.restore(prior.0, prior.1);
            return Err(e.into());
        }

        self.role = Some(Role::Answerer);
        self.transition_to(NegotiationState::RemoteOfferReceived);
        self.transition_to(NegotiationState::LocalAnswerCreated);

        match self.finish_local(Role::Answerer).await {
            Ok(desc) => Ok(desc),
            Err(e) => {
                self.teardown_after_error().await;
                self.restore(prior.0, prior.1);
                Err(e)
            }
        }
    }

    /// Parse pasted or relayed text as an offer and accept it
    ///
    /// # Errors
    ///
    /// Same as [`Negotiator::accept_offer`]; unparsable text is
    /// `InvalidDescription`.
    pub async fn accept_offer_text(
        &mut self,
        text: &str,
    ) -> Result<NegotiationDescription, NegotiationError> {
        let offer = crate::description::parse_description(text)?;
        self.accept_offer(&offer).await
    }

    /// Install the remote answer for the pending local offer.
    ///
    /// # Errors
    ///
    /// - `InvalidDescription` if the answer fails validation
    /// - `NoPendingOffer` unless this side is an offerer with a local offer
    ///   awaiting its answer
    /// - `Transport` if the stack rejects the answer (state unchanged)
    pub async fn accept_answer(&mut self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        validate_description(answer)?;
        expect_type(answer, &[SdpType::Answer, SdpType::Pranswer], "answer")?;

        if self.role != Some(Role::Offerer)
            || self.state != NegotiationState::LocalDescriptionReady
            || self.answer_applied
        {
            return Err(NegotiationError::NoPendingOffer);
        }

        self.connector.accept_answer(answer).await?;
        self.answer_applied = true;
        debug!("Remote answer applied");
        Ok(())
    }

    /// Wait for the channel to open, bounded by the configured connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before the local description is ready (or, for
    /// an offerer, before the answer is applied), `Timeout` if the channel does
    /// not open in time, or `Transport` on stack failure. The latter two leave
    /// the negotiator in `Failed`.
    pub async fn connect(
        &mut self,
    ) -> Result<(Arc<P::Channel>, ChannelEvents), NegotiationError> {
        let ready = self.state == NegotiationState::LocalDescriptionReady
            && (self.role == Some(Role::Answerer) || self.answer_applied);
        if !ready {
            return Err(NegotiationError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }

        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.wait_channel()).await {
            Ok(Ok(channel)) => {
                self.transition_to(NegotiationState::Connected);
                info!(role = ?self.role, "Channel established");
                Ok(channel)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Channel failed to open");
                self.transition_to(NegotiationState::Failed);
                Err(e.into())
            }
            Err(_) => {
                warn!(?timeout, "Timed out waiting for channel");
                self.transition_to(NegotiationState::Failed);
                Err(NegotiationError::Timeout(timeout))
            }
        }
    }

    /// Tear down any attempt. Unconditional and idempotent.
    pub async fn reset(&mut self) {
        if let Err(e) = self.connector.close().await {
            warn!(error = %e, "Connector close failed during reset");
        }
        self.role = None;
        self.local = None;
        self.answer_applied = false;
        if self.state != NegotiationState::Reset {
            self.transition_to(NegotiationState::Reset);
        }
    }

    async fn finish_local(&mut self, role: Role) -> Result<NegotiationDescription, NegotiationError> {
        self.transition_to(NegotiationState::GatheringCandidates);

        let gather_timeout = self.config.gather_timeout;
        let gathering_complete =
            tokio::time::timeout(gather_timeout, self.connector.gathering_complete())
                .await
                .is_ok();
        if !gathering_complete {
            warn!(
                timeout = ?gather_timeout,
                "Candidate gathering timed out; using partial description"
            );
        }

        let description = self.connector.local_description().await.ok_or_else(|| {
            NegotiationError::Transport(lanshare_transport::TransportError::Negotiation(
                "connectivity stack produced no local description".to_string(),
            ))
        })?;

        let local = NegotiationDescription {
            role,
            description,
            gathering_complete,
        };
        self.local = Some(local.clone());
        self.transition_to(NegotiationState::LocalDescriptionReady);
        Ok(local)
    }

    async fn teardown_after_error(&mut self) {
        if let Err(e) = self.connector.close().await {
            warn!(error = %e, "Connector close failed after error");
        }
        self.local = None;
        self.answer_applied = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_transport::{Channel, ChannelEvent, ChannelMessage, Gathering, MemoryConnector};

    fn pair() -> (Negotiator<MemoryConnector>, Negotiator<MemoryConnector>) {
        let (a, b) = MemoryConnector::pair();
        (
            Negotiator::new(a, NegotiationConfig::default()),
            Negotiator::new(b, NegotiationConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_full_exchange_connects() {
        let (mut offerer, mut answerer) = pair();

        let offer = offerer.create_offer().await.unwrap();
        assert_eq!(offer.role, Role::Offerer);
        assert!(offer.gathering_complete);
        assert_eq!(offerer.state(), NegotiationState::LocalDescriptionReady);

        let answer = answerer.accept_offer(&offer.description).await.unwrap();
        assert_eq!(answer.role, Role::Answerer);
        assert_eq!(answer.description.sdp_type, SdpType::Answer);

        offerer.accept_answer(&answer.description).await.unwrap();

        let (a, _a_events) = offerer.connect().await.unwrap();
        let (_b, mut b_events) = answerer.connect().await.unwrap();
        assert_eq!(offerer.state(), NegotiationState::Connected);
        assert_eq!(answerer.state(), NegotiationState::Connected);

        a.send_text("hi").await.unwrap();
        loop {
            match b_events.recv().await {
                Some(ChannelEvent::Message(message)) => {
                    assert_eq!(message, ChannelMessage::Text("hi".into()));
                    break;
                }
                Some(_) => continue,
                None => panic!("stream ended"),
            }
        }
    }

    #[tokio::test]
    async fn test_create_offer_only_from_idle() {
        let (mut offerer, _) = pair();
        offerer.create_offer().await.unwrap();

        let err = offerer.create_offer().await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { .. }));
        assert_eq!(offerer.state(), NegotiationState::LocalDescriptionReady);
    }

    #[tokio::test]
    async fn test_accept_offer_missing_body_leaves_idle() {
        let (_, mut answerer) = pair();

        let err = answerer.accept_offer_text(r#"{"type":"offer"}"#).await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidDescription(_)));
        assert_eq!(answerer.state(), NegotiationState::Idle);
        assert!(answerer.role().is_none());
    }

    #[tokio::test]
    async fn test_accept_offer_rejects_answer_type() {
        let (mut offerer, mut answerer) = pair();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer.description).await.unwrap();

        let (_, mut other) = pair();
        let err = other.accept_offer(&answer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidDescription(_)));
        assert_eq!(other.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_accept_answer_without_offer() {
        let (mut offerer, mut answerer) = pair();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer.description).await.unwrap();

        let (_, mut idle) = pair();
        let err = idle.accept_answer(&answer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::NoPendingOffer));

        // Answerer has no pending offer of its own either.
        let err = answerer.accept_answer(&answer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::NoPendingOffer));

        // Applying the answer twice is refused.
        offerer.accept_answer(&answer.description).await.unwrap();
        let err = offerer.accept_answer(&answer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::NoPendingOffer));
    }

    #[tokio::test]
    async fn test_pending_offerer_refuses_offer() {
        let (mut offerer, mut other) = pair();
        let offer = offerer.create_offer().await.unwrap();
        let _ = other.create_offer().await.unwrap();

        let err = other.accept_offer(&offer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { .. }));
        assert_eq!(other.role(), Some(Role::Offerer));
    }

    #[tokio::test]
    async fn test_second_offer_supersedes_before_open() {
        let (mut offerer, mut answerer) = pair();
        let first = offerer.create_offer().await.unwrap();
        answerer.accept_offer(&first.description).await.unwrap();

        offerer.reset().await;
        let second = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&second.description).await.unwrap();
        assert_eq!(answerer.state(), NegotiationState::LocalDescriptionReady);

        offerer.accept_answer(&answer.description).await.unwrap();
        assert!(offerer.connect().await.is_ok());
        assert!(answerer.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_offer_after_connect_requires_reset() {
        let (mut offerer, mut answerer) = pair();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer.description).await.unwrap();
        offerer.accept_answer(&answer.description).await.unwrap();
        let _a = offerer.connect().await.unwrap();
        let _b = answerer.connect().await.unwrap();

        let err = answerer.accept_offer(&offer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::ResetRequired));
        assert_eq!(answerer.state(), NegotiationState::Connected);

        answerer.reset().await;
        assert_eq!(answerer.state(), NegotiationState::Reset);
        assert!(answerer.accept_offer(&offer.description).await.is_ok());
    }

    #[tokio::test]
    async fn test_offer_after_channel_open_before_connect_requires_reset() {
        let (mut offerer, mut answerer) = pair();
        let offer = offerer.create_offer().await.unwrap();
        let answer = answerer.accept_offer(&offer.description).await.unwrap();
        // The channel opens here, before either side calls connect
        offerer.accept_answer(&answer.description).await.unwrap();

        let err = answerer.accept_offer(&offer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::ResetRequired));
        assert_eq!(answerer.state(), NegotiationState::LocalDescriptionReady);

        let (a, _a_events) = offerer.connect().await.unwrap();
        let (b, _b_events) = answerer.connect().await.unwrap();
        assert!(a.is_open());
        assert!(b.is_open());
    }

    #[tokio::test]
    async fn test_connector_failure_restores_state() {
        let (mut a, _b) = MemoryConnector::pair();
        a.fail_next();
        let mut offerer = Negotiator::new(a, NegotiationConfig::default());

        let err = offerer.create_offer().await.unwrap_err();
        assert!(matches!(err, NegotiationError::Transport(_)));
        assert_eq!(offerer.state(), NegotiationState::Idle);
        assert!(offerer.role().is_none());

        assert!(offerer.create_offer().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gathering_timeout_yields_partial_description() {
        let (a, _b) = MemoryConnector::pair();
        let config = NegotiationConfig {
            gather_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let mut offerer = Negotiator::new(a.with_gathering(Gathering::Never), config);

        let offer = offerer.create_offer().await.unwrap();
        assert!(!offer.gathering_complete);
        assert!(!offer.description.sdp.contains("a=candidate:"));
        assert_eq!(offerer.state(), NegotiationState::LocalDescriptionReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fails() {
        let (a, _b) = MemoryConnector::pair();
        let (_, c) = MemoryConnector::pair();
        let config = NegotiationConfig {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut offerer = Negotiator::new(a, config.clone());
        let mut stranger = Negotiator::new(c, config);

        let offer = offerer.create_offer().await.unwrap();
        let answer = stranger.accept_offer(&offer.description).await.unwrap();
        // Answer applied on the offerer's switchboard, but the stranger's never connects.
        offerer.accept_answer(&answer.description).await.unwrap();

        let err = stranger.connect().await.unwrap_err();
        assert!(matches!(err, NegotiationError::Timeout(_)));
        assert_eq!(stranger.state(), NegotiationState::Failed);

        let err = stranger.accept_offer(&offer.description).await.unwrap_err();
        assert!(matches!(err, NegotiationError::ResetRequired));
    }

    #[tokio::test]
    async fn test_connect_before_answer_is_invalid() {
        let (mut offerer, _) = pair();
        offerer.create_offer().await.unwrap();
        let err = offerer.connect().await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (mut offerer, _) = pair();
        offerer.reset().await;
        offerer.reset().await;
        assert_eq!(offerer.state(), NegotiationState::Reset);
        assert!(offerer.local_description().is_none());
    }

    #[test]
    fn test_transition_table() {
        let (a, _) = MemoryConnector::pair();
        let negotiator = Negotiator::new(a, NegotiationConfig::default());
        assert!(negotiator.can_transition(NegotiationState::LocalOfferCreated));
        assert!(negotiator.can_transition(NegotiationState::Reset));
        assert!(!negotiator.can_transition(NegotiationState::Connected));
    }

    #[test]
    fn test_config_validate() {
        assert!(NegotiationConfig::default().validate().is_ok());
        let config = NegotiationConfig {
            gather_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NegotiationError::InvalidConfig(msg)) if msg.contains("gather_timeout")
        ));
    }
}
