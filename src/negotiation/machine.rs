//! Offer/answer state machine of one room session.
//!
//! Every operation runs to completion on the negotiation task before the next
//! one starts. The engine's signaling state is re-read after each engine call
//! so the session never contradicts it. An engine fault commits no token, and
//! a half-applied remote offer is rolled back to `stable`.

use crate::negotiation::glare;
use crate::peer::engine::{DataChannel, EngineError, EngineEvent, SessionEngine};
use crate::peer::ice::{apply_pending_candidates, CandidateRelay};
use crate::peer::state::NegotiationSession;
use crate::peer::types::{
    ConnectionState, DataChannelState, IceCandidate, IceConnectionState, IceGatheringState,
    SessionDescription, SignalingState,
};
use crate::sdp;
use crate::signaling::{RelayChannel, RelayError, SignalMessage};
use crate::utils::random_id;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("cannot {operation} in signaling state {state}")]
    InvalidState {
        operation: &'static str,
        state: SignalingState,
    },
    #[error("ignoring self-originated offer")]
    SelfOriginated,
    #[error("no data channel")]
    NoDataChannel,
    #[error("data channel is not open ({0})")]
    DataChannelNotOpen(DataChannelState),
    #[error("no active session")]
    NoActiveSession,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stale or duplicate input.
    Info,
    /// Precondition not met; the session is untouched.
    Warn,
    /// Engine or relay fault.
    Error,
}

impl NegotiationError {
    pub fn severity(&self) -> Severity {
        match self {
            NegotiationError::SelfOriginated => Severity::Info,
            NegotiationError::InvalidState { .. }
            | NegotiationError::NoDataChannel
            | NegotiationError::DataChannelNotOpen(_)
            | NegotiationError::NoActiveSession => Severity::Warn,
            NegotiationError::Engine(_) | NegotiationError::Relay(_) => Severity::Error,
        }
    }

    /// Logs at the level matching [`severity`](Self::severity).
    pub fn log(&self, context: &str) {
        match self.severity() {
            Severity::Info => info!(error = %self, "{context}"),
            Severity::Warn => warn!(error = %self, "{context}"),
            Severity::Error => error!(error = %self, "{context}"),
        }
    }
}

/// Codec moved to the front of one media section of every local description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPreference {
    pub kind: String,
    pub codec: String,
}

impl Default for CodecPreference {
    fn default() -> Self {
        Self {
            kind: "video".into(),
            codec: "H264".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub room_id: String,
    pub signaling: SignalingState,
    pub connection: ConnectionState,
    pub ice_connection: IceConnectionState,
    pub ice_gathering: IceGatheringState,
    pub data_channel: Option<DataChannelState>,
    pub offer_pending: bool,
    pub buffered_candidates: usize,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Room: {}", self.room_id)?;
        writeln!(f, "Signaling state: {}", self.signaling)?;
        writeln!(f, "Connection state: {}", self.connection)?;
        writeln!(f, "ICE connection state: {}", self.ice_connection)?;
        writeln!(f, "ICE gathering state: {}", self.ice_gathering)?;
        match self.data_channel {
            Some(state) => writeln!(f, "Data channel: {state}")?,
            None => writeln!(f, "Data channel: None")?,
        }
        writeln!(f, "Offer pending: {}", if self.offer_pending { "yes" } else { "no" })?;
        write!(f, "Buffered candidates: {}", self.buffered_candidates)
    }
}

#[derive(Clone, Copy)]
enum OfferKind {
    Fresh,
    Restart,
}

impl OfferKind {
    fn operation(self) -> &'static str {
        match self {
            OfferKind::Fresh => "create offer",
            OfferKind::Restart => "restart ICE",
        }
    }
}

pub struct Negotiator {
    session: NegotiationSession,
    engine: Arc<dyn SessionEngine>,
    relay: Arc<dyn RelayChannel>,
    candidates: CandidateRelay,
    codec: CodecPreference,
    data_channel_label: String,
}

impl Negotiator {
    pub fn new(
        room_id: impl Into<String>,
        engine: Arc<dyn SessionEngine>,
        relay: Arc<dyn RelayChannel>,
        codec: CodecPreference,
        data_channel_label: impl Into<String>,
    ) -> Self {
        let room_id = room_id.into();
        let mut session = NegotiationSession::new(room_id.clone());
        session.observe_state(engine.signaling_state());
        Self {
            session,
            engine,
            relay,
            candidates: CandidateRelay::new(room_id),
            codec,
            data_channel_label: data_channel_label.into(),
        }
    }

    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    /// Marks the session closed after teardown.
    pub(crate) fn close(&mut self) {
        self.session.close();
    }

    pub fn room_id(&self) -> &str {
        self.session.room_id()
    }

    fn sync_state(&mut self) -> SignalingState {
        let state = self.engine.signaling_state();
        if state != self.session.signaling_state() {
            debug!(room = %self.session.room_id(), from = %self.session.signaling_state(), to = %state, "signaling state");
        }
        self.session.observe_state(state);
        state
    }

    fn require(&mut self, operation: &'static str, allowed: &[SignalingState]) -> Result<(), NegotiationError> {
        let state = self.sync_state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(NegotiationError::InvalidState { operation, state })
        }
    }

    fn local_sdp(&self, sdp: &str) -> String {
        sdp::prefer_codec(sdp, &self.codec.kind, &self.codec.codec)
    }

    /// Creates, tags and sends a new offer. Only allowed in `stable`.
    pub async fn begin_offer(&mut self) -> Result<(), NegotiationError> {
        self.offer(OfferKind::Fresh).await
    }

    /// Offer with a new ICE generation.
    ///
    /// Also runs from `have-local-offer`: the unanswered offer is withdrawn,
    /// a remote offer that lost to it is answered, then a new offer is sent.
    pub async fn restart(&mut self) -> Result<(), NegotiationError> {
        self.require(
            OfferKind::Restart.operation(),
            &[SignalingState::Stable, SignalingState::HaveLocalOffer],
        )?;
        if self.session.signaling_state() == SignalingState::HaveLocalOffer {
            self.withdraw_local_offer().await?;
        }
        self.offer(OfferKind::Restart).await
    }

    async fn withdraw_local_offer(&mut self) -> Result<(), NegotiationError> {
        let held = self.session.take_held_offer();
        info!(
            room = %self.session.room_id(),
            token = ?self.session.pending_offer_token(),
            "withdrawing unanswered offer"
        );
        if let Err(err) = self.engine.rollback().await {
            self.sync_state();
            return Err(err.into());
        }
        self.sync_state();
        if let Some(offer) = held {
            info!(room = %self.session.room_id(), "answering offer held back by glare");
            self.accept_offer(offer).await?;
        }
        Ok(())
    }

    async fn offer(&mut self, kind: OfferKind) -> Result<(), NegotiationError> {
        self.require(kind.operation(), &[SignalingState::Stable])?;

        let token = random_id();
        let created = match kind {
            OfferKind::Fresh => self.engine.create_offer().await,
            OfferKind::Restart => self.engine.create_restart_offer().await,
        };
        let offer = match created {
            Ok(offer) => offer,
            Err(err) => {
                self.sync_state();
                return Err(err.into());
            }
        };
        let tagged = sdp::embed_token(&offer.sdp, &token);
        let local = SessionDescription::offer(self.local_sdp(&tagged));

        if let Err(err) = self.engine.set_local_description(local.clone()).await {
            self.sync_state();
            return Err(err.into());
        }
        let state = self.engine.signaling_state();
        self.session.commit_local_offer(token.clone(), state);
        if matches!(kind, OfferKind::Restart) {
            self.candidates.reset();
        }
        info!(room = %self.session.room_id(), token = %token, state = %state, "local offer set");

        self.relay
            .send(SignalMessage::Offer {
                description: local,
                room_id: self.session.room_id().to_owned(),
            })
            .await?;
        Ok(())
    }

    /// Answers a genuine remote offer.
    ///
    /// Accepted in `stable` and in `have-remote-offer`, where a newer offer
    /// replaces one whose answer was never produced.
    pub async fn accept_offer(&mut self, remote: SessionDescription) -> Result<(), NegotiationError> {
        if glare::is_self_originated(&remote, Some(&self.session)) {
            let echoed = self
                .session
                .pending_offer_token()
                .is_some_and(|token| sdp::contains_token(&remote.sdp, token));
            if !echoed {
                self.session.hold_offer(remote);
            }
            return Err(NegotiationError::SelfOriginated);
        }
        self.require(
            "accept offer",
            &[SignalingState::Stable, SignalingState::HaveRemoteOffer],
        )?;

        let was_ready = self.session.remote_description_ready();
        if let Err(err) = self.engine.set_remote_description(remote).await {
            self.sync_state();
            return Err(err.into());
        }
        self.session.mark_remote_description();
        self.sync_state();
        let applied = apply_pending_candidates(&mut self.session, self.engine.as_ref()).await;
        if applied > 0 {
            debug!(room = %self.session.room_id(), applied, "flushed buffered candidates");
        }

        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                self.abandon_remote_offer(was_ready).await;
                return Err(err.into());
            }
        };
        let local = SessionDescription::answer(self.local_sdp(&answer.sdp));
        if let Err(err) = self.engine.set_local_description(local.clone()).await {
            self.abandon_remote_offer(was_ready).await;
            return Err(err.into());
        }
        let state = self.sync_state();
        info!(room = %self.session.room_id(), state = %state, "answer set");

        self.relay
            .send(SignalMessage::Answer {
                description: local,
                room_id: self.session.room_id().to_owned(),
            })
            .await?;
        Ok(())
    }

    /// Returns to `stable` after the answer to a remote offer failed.
    async fn abandon_remote_offer(&mut self, was_ready: bool) {
        if let Err(err) = self.engine.rollback().await {
            warn!(error = %err, "rollback failed");
        }
        self.session.restore_remote_description(was_ready);
        let state = self.sync_state();
        warn!(room = %self.session.room_id(), state = %state, "remote offer rolled back");
    }

    /// Applies the answer to our outstanding offer.
    pub async fn accept_answer(&mut self, remote: SessionDescription) -> Result<(), NegotiationError> {
        self.require("accept answer", &[SignalingState::HaveLocalOffer])?;

        if let Err(err) = self.engine.set_remote_description(remote).await {
            self.sync_state();
            return Err(err.into());
        }
        self.session.mark_remote_description();
        let state = self.sync_state();
        info!(room = %self.session.room_id(), state = %state, "answer applied");
        apply_pending_candidates(&mut self.session, self.engine.as_ref()).await;
        Ok(())
    }

    /// Forwards the candidate to the engine, or buffers it until the current
    /// round has a remote description.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.session.signaling_state() == SignalingState::Closed {
            return Err(NegotiationError::InvalidState {
                operation: "add candidate",
                state: SignalingState::Closed,
            });
        }
        if !self.session.remote_description_ready() {
            debug!(candidate = %candidate.candidate, "remote description not set yet, queuing candidate");
            self.session.buffer_candidate(candidate);
            return Ok(());
        }
        self.engine.add_remote_candidate(candidate).await?;
        Ok(())
    }

    /// Creates the data channel once; renegotiates when `stable`.
    pub async fn create_data_channel(&mut self) -> Result<(), NegotiationError> {
        if let Some(existing) = self.session.data_channel() {
            info!(label = %existing.label(), "data channel already exists");
            return Ok(());
        }
        let state = self.sync_state();
        if state == SignalingState::Closed {
            return Err(NegotiationError::InvalidState {
                operation: "create data channel",
                state,
            });
        }
        if state != SignalingState::Stable && state != SignalingState::HaveLocalOffer {
            warn!(state = %state, "not in ideal state to create data channel");
        }

        let channel = self.engine.create_data_channel(&self.data_channel_label).await?;
        info!(label = %channel.label(), "data channel created");
        self.session.adopt_data_channel(channel);

        if self.sync_state() == SignalingState::Stable {
            self.begin_offer().await?;
        }
        Ok(())
    }

    pub async fn send_text(&mut self, text: String) -> Result<(), NegotiationError> {
        let channel = self
            .session
            .data_channel()
            .cloned()
            .ok_or(NegotiationError::NoDataChannel)?;
        let state = channel.ready_state();
        if state != DataChannelState::Open {
            return Err(NegotiationError::DataChannelNotOpen(state));
        }
        channel.send_text(text.clone()).await?;
        info!(label = %channel.label(), message = %text, "sent message");
        Ok(())
    }

    pub fn status(&mut self) -> StatusSnapshot {
        let signaling = self.sync_state();
        StatusSnapshot {
            room_id: self.session.room_id().to_owned(),
            signaling,
            connection: self.engine.connection_state(),
            ice_connection: self.engine.ice_connection_state(),
            ice_gathering: self.engine.ice_gathering_state(),
            data_channel: self.session.data_channel().map(|dc| dc.ready_state()),
            offer_pending: self.session.pending_offer_token().is_some(),
            buffered_candidates: self.session.buffered_candidates(),
        }
    }

    /// Dispatches one inbound relay message.
    pub async fn handle_signal(&mut self, message: SignalMessage) -> Result<(), NegotiationError> {
        if let Some(room) = message.room_id() {
            if room != self.session.room_id() {
                debug!(room, event = message.event_name(), "ignoring message for another room");
                return Ok(());
            }
        }
        let event = message.event_name();
        match message {
            SignalMessage::Offer { description, .. } => {
                info!(room = %self.session.room_id(), "received offer");
                self.accept_offer(description).await
            }
            SignalMessage::Answer { description, .. } => {
                info!(room = %self.session.room_id(), "received answer");
                self.accept_answer(description).await
            }
            SignalMessage::IceCandidate { candidate, .. } => {
                self.add_remote_candidate(candidate).await
            }
            SignalMessage::UserJoined => {
                info!(room = %self.session.room_id(), "new user joined the room");
                self.begin_offer().await
            }
            SignalMessage::Notice { message } => {
                info!(notice = %message, "relay message");
                Ok(())
            }
            SignalMessage::JoinRoom { .. } | SignalMessage::LeaveRoom { .. } => {
                debug!(event = event, "ignoring client-only event");
                Ok(())
            }
        }
    }

    /// Consumes one engine callback.
    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), NegotiationError> {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                self.candidates
                    .forward_local(self.relay.as_ref(), candidate)
                    .await?;
            }
            EngineEvent::GatheringStateChanged(state) => {
                debug!(state = %state, "ICE gathering state");
            }
            EngineEvent::ConnectionStateChanged(state) => {
                info!(room = %self.session.room_id(), state = %state, "connection state");
            }
            EngineEvent::IceConnectionStateChanged(state) => {
                info!(state = %state, "ICE connection state");
            }
            EngineEvent::Track { kind, id } => {
                info!(kind = %kind, id = %id, "track received");
            }
            EngineEvent::DataChannel(channel) => {
                let label = channel.label();
                if self.session.adopt_data_channel(channel) {
                    info!(label = %label, "data channel received");
                } else {
                    debug!(label = %label, "already holding a data channel, ignoring remote one");
                }
            }
            EngineEvent::DataChannelOpen { label } => info!(label = %label, "data channel opened"),
            EngineEvent::DataChannelClosed { label } => info!(label = %label, "data channel closed"),
            EngineEvent::DataChannelMessage { label, text } => {
                info!(label = %label, message = %text, "received message");
            }
        }
        Ok(())
    }

    pub fn take_data_channel(&mut self) -> Option<Arc<dyn DataChannel>> {
        self.session.take_data_channel()
    }

    pub fn engine(&self) -> &Arc<dyn SessionEngine> {
        &self.engine
    }

    pub fn relay(&self) -> &Arc<dyn RelayChannel> {
        &self.relay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{MockEngine, MockFault};
    use crate::signaling::memory::MemoryRelayHub;
    use crate::signaling::{RelayConnector, RelayLink};

    struct Side {
        negotiator: Negotiator,
        engine: Arc<MockEngine>,
        link: RelayLink,
    }

    async fn side(hub: &MemoryRelayHub) -> Side {
        let engine = Arc::new(MockEngine::new());
        let link = hub.connect("mem").await.unwrap();
        link.channel
            .send(SignalMessage::JoinRoom {
                room_id: "r".into(),
            })
            .await
            .unwrap();
        let negotiator = Negotiator::new(
            "r",
            engine.clone(),
            link.channel.clone(),
            CodecPreference::default(),
            "chat",
        );
        Side {
            negotiator,
            engine,
            link,
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 100 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    fn next_offer(link: &mut RelayLink) -> SessionDescription {
        loop {
            match link.inbound.try_recv().unwrap() {
                SignalMessage::Offer { description, .. } => return description,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn offer_is_tagged_and_prefers_codec() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        let mut b = side(&hub).await;

        a.negotiator.begin_offer().await.unwrap();
        let token = a.negotiator.session().pending_offer_token().unwrap().to_owned();
        assert_eq!(
            a.negotiator.session().signaling_state(),
            SignalingState::HaveLocalOffer
        );

        let offer = next_offer(&mut b.link);
        assert!(sdp::contains_token(&offer.sdp, &token));
        assert!(offer.sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96 97 103"));
        assert_eq!(a.engine.local_description().unwrap(), offer);
    }

    #[tokio::test]
    async fn second_offer_in_have_local_offer_is_a_no_op() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        let _b = side(&hub).await;

        a.negotiator.begin_offer().await.unwrap();
        let token = a.negotiator.session().pending_offer_token().map(str::to_owned);

        let err = a.negotiator.begin_offer().await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { .. }));
        assert_eq!(err.severity(), Severity::Warn);
        assert_eq!(hub.count("offer"), 1);
        assert_eq!(
            a.negotiator.session().pending_offer_token().map(str::to_owned),
            token
        );
    }

    #[tokio::test]
    async fn answer_in_stable_is_rejected() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;

        let err = a
            .negotiator
            .accept_answer(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidState { .. }));
        assert_eq!(a.negotiator.session().signaling_state(), SignalingState::Stable);
        assert!(a.engine.remote_description().is_none());
    }

    #[tokio::test]
    async fn own_offer_echo_is_dropped() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;

        a.negotiator.begin_offer().await.unwrap();
        let echo = a.engine.local_description().unwrap();
        let err = a
            .negotiator
            .handle_signal(SignalMessage::Offer {
                description: echo,
                room_id: "r".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::SelfOriginated));
        assert_eq!(err.severity(), Severity::Info);
        assert!(a.engine.remote_description().is_none());
    }

    #[tokio::test]
    async fn engine_fault_commits_no_token() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;

        a.engine.inject_fault(MockFault::SetLocal);
        let err = a.negotiator.begin_offer().await.unwrap_err();
        assert_eq!(err.severity(), Severity::Error);
        assert_eq!(a.negotiator.session().pending_offer_token(), None);
        assert_eq!(a.negotiator.session().signaling_state(), SignalingState::Stable);
        assert_eq!(hub.count("offer"), 0);

        // The next explicit offer recovers.
        a.negotiator.begin_offer().await.unwrap();
        assert_eq!(hub.count("offer"), 1);
    }

    #[tokio::test]
    async fn failed_answer_rolls_back_the_remote_offer() {
        for fault in [MockFault::CreateAnswer, MockFault::SetLocal] {
            let hub = MemoryRelayHub::new();
            let mut a = side(&hub).await;
            let mut b = side(&hub).await;

            a.negotiator.begin_offer().await.unwrap();
            let offer = next_offer(&mut b.link);
            b.engine.inject_fault(fault);
            let err = b.negotiator.accept_offer(offer).await.unwrap_err();
            assert_eq!(err.severity(), Severity::Error);

            assert_eq!(b.engine.signaling_state(), SignalingState::Stable);
            assert_eq!(b.negotiator.session().signaling_state(), SignalingState::Stable);
            assert!(b.engine.remote_description().is_none());
            assert!(!b.negotiator.session().remote_description_ready());
            assert_eq!(hub.count("answer"), 0);

            // Local renegotiation is possible again.
            b.negotiator.begin_offer().await.unwrap();
            assert_eq!(hub.count("offer"), 2);
        }
    }

    #[tokio::test]
    async fn restart_resends_an_offer_that_never_arrived() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        let mut b = side(&hub).await;

        a.negotiator.begin_offer().await.unwrap();
        let lost = next_offer(&mut b.link);
        let first_token = a.negotiator.session().pending_offer_token().unwrap().to_owned();

        a.negotiator.restart().await.unwrap();
        assert!(a.engine.calls().contains(&"rollback"));
        let token = a.negotiator.session().pending_offer_token().unwrap().to_owned();
        assert_ne!(token, first_token);
        assert_eq!(hub.count("offer"), 2);

        let offer = next_offer(&mut b.link);
        assert_ne!(offer, lost);
        assert!(sdp::contains_token(&offer.sdp, &token));
        b.negotiator.accept_offer(offer).await.unwrap();

        let answer = loop {
            match a.link.inbound.try_recv().unwrap() {
                SignalMessage::Answer { description, .. } => break description,
                _ => continue,
            }
        };
        a.negotiator.accept_answer(answer).await.unwrap();
        assert_eq!(a.negotiator.session().signaling_state(), SignalingState::Stable);
        assert_eq!(a.negotiator.session().pending_offer_token(), None);
        assert_eq!(b.negotiator.session().signaling_state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn early_candidates_flush_in_order_after_offer() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        let mut b = side(&hub).await;

        b.negotiator.add_remote_candidate(candidate(1)).await.unwrap();
        b.negotiator.add_remote_candidate(candidate(2)).await.unwrap();
        assert_eq!(b.negotiator.session().buffered_candidates(), 2);
        assert!(b.engine.applied_candidates().is_empty());

        a.negotiator.begin_offer().await.unwrap();
        let offer = next_offer(&mut b.link);
        b.negotiator.accept_offer(offer).await.unwrap();

        assert_eq!(b.engine.applied_candidates(), vec![candidate(1), candidate(2)]);
        b.negotiator.add_remote_candidate(candidate(3)).await.unwrap();
        assert_eq!(b.engine.applied_candidates().len(), 3);
    }

    #[tokio::test]
    async fn restart_offer_carries_new_credentials() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        let _b = side(&hub).await;

        a.negotiator.begin_offer().await.unwrap();
        let first = a.engine.local_description().unwrap();
        a.negotiator
            .accept_answer(SessionDescription::answer(first.sdp.replace("actpass", "active")))
            .await
            .unwrap();
        assert_eq!(a.negotiator.session().signaling_state(), SignalingState::Stable);

        a.negotiator.restart().await.unwrap();
        let second = a.engine.local_description().unwrap();
        assert_ne!(sdp::ice_credentials(&first.sdp), sdp::ice_credentials(&second.sdp));
        assert_eq!(hub.count("offer"), 2);
    }

    #[tokio::test]
    async fn data_channel_is_created_once_and_renegotiates() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;

        a.negotiator.create_data_channel().await.unwrap();
        a.negotiator.create_data_channel().await.unwrap();
        assert_eq!(a.engine.data_channels().len(), 1);
        assert_eq!(hub.count("offer"), 1);
        assert!(a
            .engine
            .local_description()
            .unwrap()
            .sdp
            .contains("m=application"));
    }

    #[tokio::test]
    async fn send_requires_an_open_channel() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;

        assert!(matches!(
            a.negotiator.send_text("hi".into()).await,
            Err(NegotiationError::NoDataChannel)
        ));
        a.negotiator.create_data_channel().await.unwrap();
        assert!(matches!(
            a.negotiator.send_text("hi".into()).await,
            Err(NegotiationError::DataChannelNotOpen(DataChannelState::Connecting))
        ));

        let channel = a.engine.data_channels()[0].clone();
        channel.open();
        a.negotiator.send_text("hi".into()).await.unwrap();
        assert_eq!(channel.sent(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn status_reports_engine_and_session_fields() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        a.negotiator.add_remote_candidate(candidate(1)).await.unwrap();

        let status = a.negotiator.status();
        assert_eq!(status.signaling, SignalingState::Stable);
        assert_eq!(status.data_channel, None);
        assert_eq!(status.buffered_candidates, 1);
        let text = status.to_string();
        assert!(text.contains("Signaling state: stable"));
        assert!(text.contains("Data channel: None"));
    }

    #[tokio::test]
    async fn local_candidates_are_relayed() {
        let hub = MemoryRelayHub::new();
        let mut a = side(&hub).await;
        let mut b = side(&hub).await;

        a.negotiator
            .handle_engine_event(EngineEvent::LocalCandidate(Some(candidate(7))))
            .await
            .unwrap();
        a.negotiator
            .handle_engine_event(EngineEvent::LocalCandidate(None))
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Ok(message) = b.link.inbound.try_recv() {
            if let SignalMessage::IceCandidate { candidate, .. } = message {
                received.push(candidate);
            }
        }
        assert_eq!(received, vec![candidate(7)]);
    }
}
