use crate::peer::state::NegotiationSession;
use crate::peer::types::{SessionDescription, SignalingState};
use crate::sdp;

/// Whether an incoming offer must be ignored.
///
/// True for a loop-back of our own offer (its marker carries our pending
/// token) and for any offer that arrives while our own offer is outstanding:
/// the local offer wins and the remote side retries once it resolves.
pub fn is_self_originated(offer: &SessionDescription, session: Option<&NegotiationSession>) -> bool {
    let Some(session) = session else {
        return false;
    };
    let echoed = session
        .pending_offer_token()
        .is_some_and(|token| sdp::contains_token(&offer.sdp, token));
    echoed || session.signaling_state() == SignalingState::HaveLocalOffer
}
