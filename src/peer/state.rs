use crate::peer::engine::DataChannel;
use crate::peer::types::{IceCandidate, SessionDescription, SignalingState};
use std::collections::VecDeque;
use std::sync::Arc;

/// Negotiation state of the single active room session.
///
/// Owned by the negotiation task; every mutation goes through `&mut self`.
pub struct NegotiationSession {
    room_id: String,
    /// Mirror of the engine's signaling state.
    signaling_state: SignalingState,
    /// Token of the offer this side originated and is waiting an answer for.
    pending_offer_token: Option<String>,
    /// Candidates received before the current round has a remote description.
    remote_candidate_buffer: VecDeque<IceCandidate>,
    remote_description_ready: bool,
    /// Remote offer that lost to our outstanding offer.
    held_offer: Option<SessionDescription>,
    data_channel: Option<Arc<dyn DataChannel>>,
}

impl NegotiationSession {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            signaling_state: SignalingState::Stable,
            pending_offer_token: None,
            remote_candidate_buffer: VecDeque::new(),
            remote_description_ready: false,
            held_offer: None,
            data_channel: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    pub fn pending_offer_token(&self) -> Option<&str> {
        self.pending_offer_token.as_deref()
    }

    pub fn remote_description_ready(&self) -> bool {
        self.remote_description_ready
    }

    pub fn buffered_candidates(&self) -> usize {
        self.remote_candidate_buffer.len()
    }

    pub fn held_offer(&self) -> Option<&SessionDescription> {
        self.held_offer.as_ref()
    }

    pub fn data_channel(&self) -> Option<&Arc<dyn DataChannel>> {
        self.data_channel.as_ref()
    }

    /// Records the engine's state. Leaving `have-local-offer` supersedes any
    /// pending token and held remote offer.
    pub fn observe_state(&mut self, state: SignalingState) {
        self.signaling_state = state;
        if state != SignalingState::HaveLocalOffer {
            self.pending_offer_token = None;
            self.held_offer = None;
        }
    }

    /// Commits a locally originated offer.
    pub(crate) fn commit_local_offer(&mut self, token: String, state: SignalingState) {
        self.remote_description_ready = false;
        self.observe_state(state);
        if state == SignalingState::HaveLocalOffer {
            self.pending_offer_token = Some(token);
        }
    }

    pub(crate) fn mark_remote_description(&mut self) {
        self.remote_description_ready = true;
    }

    /// Undoes [`mark_remote_description`](Self::mark_remote_description) after a rollback.
    pub(crate) fn restore_remote_description(&mut self, ready: bool) {
        self.remote_description_ready = ready;
    }

    /// Keeps the latest offer dropped for glare. Only meaningful in `have-local-offer`.
    pub(crate) fn hold_offer(&mut self, offer: SessionDescription) {
        if self.signaling_state == SignalingState::HaveLocalOffer {
            self.held_offer = Some(offer);
        }
    }

    pub(crate) fn take_held_offer(&mut self) -> Option<SessionDescription> {
        self.held_offer.take()
    }

    pub(crate) fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.remote_candidate_buffer.push_back(candidate);
    }

    /// Buffered candidates in arrival order.
    pub(crate) fn drain_candidates(&mut self) -> Vec<IceCandidate> {
        self.remote_candidate_buffer.drain(..).collect()
    }

    /// Stores the channel unless one is already held. Returns whether it was kept.
    pub(crate) fn adopt_data_channel(&mut self, channel: Arc<dyn DataChannel>) -> bool {
        if self.data_channel.is_some() {
            return false;
        }
        self.data_channel = Some(channel);
        true
    }

    pub(crate) fn take_data_channel(&mut self) -> Option<Arc<dyn DataChannel>> {
        self.data_channel.take()
    }

    /// Terminal state after teardown.
    pub(crate) fn close(&mut self) {
        self.observe_state(SignalingState::Closed);
        self.remote_candidate_buffer.clear();
        self.remote_description_ready = false;
        self.held_offer = None;
        self.data_channel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn token_only_lives_in_have_local_offer() {
        let mut session = NegotiationSession::new("room");
        session.commit_local_offer("tok".into(), SignalingState::HaveLocalOffer);
        assert_eq!(session.pending_offer_token(), Some("tok"));

        session.observe_state(SignalingState::Stable);
        assert_eq!(session.pending_offer_token(), None);

        // An engine that did not move to have-local-offer never holds a token.
        session.commit_local_offer("tok".into(), SignalingState::Stable);
        assert_eq!(session.pending_offer_token(), None);
    }

    #[test]
    fn held_offer_is_dropped_once_our_offer_resolves() {
        let mut session = NegotiationSession::new("room");
        session.hold_offer(SessionDescription::offer("v=0\r\n"));
        assert!(session.held_offer().is_none(), "nothing to lose to in stable");

        session.commit_local_offer("tok".into(), SignalingState::HaveLocalOffer);
        session.hold_offer(SessionDescription::offer("v=0\r\n"));
        assert!(session.held_offer().is_some());

        session.observe_state(SignalingState::Stable);
        assert!(session.held_offer().is_none());
    }

    #[test]
    fn buffer_drains_in_arrival_order() {
        let mut session = NegotiationSession::new("room");
        for n in 1..=3 {
            session.buffer_candidate(candidate(n));
        }
        let drained = session.drain_candidates();
        assert_eq!(drained, vec![candidate(1), candidate(2), candidate(3)]);
        assert_eq!(session.buffered_candidates(), 0);
    }

    #[test]
    fn close_is_terminal_and_clears_everything() {
        let mut session = NegotiationSession::new("room");
        session.commit_local_offer("tok".into(), SignalingState::HaveLocalOffer);
        session.buffer_candidate(candidate(1));
        session.close();
        assert_eq!(session.signaling_state(), SignalingState::Closed);
        assert_eq!(session.pending_offer_token(), None);
        assert_eq!(session.buffered_candidates(), 0);
        assert!(session.data_channel().is_none());
    }
}
