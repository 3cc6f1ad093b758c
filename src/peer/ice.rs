use crate::peer::engine::SessionEngine;
use crate::peer::state::NegotiationSession;
use crate::peer::types::IceCandidate;
use crate::signaling::{RelayChannel, RelayError, SignalMessage};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Bridges locally gathered candidates onto the relay.
pub struct CandidateRelay {
    room_id: String,
    seen: HashSet<String>,
    local: Vec<IceCandidate>,
}

impl CandidateRelay {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            seen: HashSet::new(),
            local: Vec::new(),
        }
    }

    /// Sends a gathered candidate once. The end-of-candidates marker is not
    /// forwarded; it triggers the gathering summary instead.
    ///
    /// Returns whether a frame was sent.
    pub async fn forward_local(
        &mut self,
        relay: &dyn RelayChannel,
        candidate: Option<IceCandidate>,
    ) -> Result<bool, RelayError> {
        let Some(candidate) = candidate else {
            info!(room = %self.room_id, count = self.local.len(), "local gathering complete");
            analyze_candidates(&self.local);
            return Ok(false);
        };
        if !self.seen.insert(candidate.candidate.clone()) {
            debug!(candidate = %candidate.candidate, "duplicate local candidate");
            return Ok(false);
        }
        self.local.push(candidate.clone());
        relay
            .send(SignalMessage::IceCandidate {
                candidate,
                room_id: self.room_id.clone(),
            })
            .await?;
        Ok(true)
    }

    /// Local candidates forwarded so far, in gathering order.
    pub fn local_candidates(&self) -> &[IceCandidate] {
        &self.local
    }

    /// Starts a new ICE generation.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.local.clear();
    }
}

/// Applies candidates buffered before the remote description, in arrival
/// order. A rejected candidate does not stop the rest.
pub async fn apply_pending_candidates(
    session: &mut NegotiationSession,
    engine: &dyn SessionEngine,
) -> usize {
    let candidates = session.drain_candidates();
    let mut applied = 0;
    for candidate in candidates {
        debug!(candidate = %candidate.candidate, "applying pending candidate");
        match engine.add_remote_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(err) => warn!(error = %err, "failed to apply pending candidate"),
        }
    }
    applied
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => summary.host += 1,
            Some("srflx") => summary.srflx += 1,
            Some("relay") => summary.relay += 1,
            _ => {}
        }
    }

    info!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );
    if summary.relay == 0 {
        warn!("no TURN relay candidates found, connection through NAT may fail");
    }
    summary
}
