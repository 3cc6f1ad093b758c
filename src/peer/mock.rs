//! Scripted engine that follows the JSEP signaling-state rules without doing
//! any networking.

use crate::peer::engine::{
    DataChannel, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineParts, MediaSource,
    SessionEngine,
};
use crate::peer::types::{
    ConnectionState, DataChannelState, IceCandidate, IceConnectionState, IceGatheringState,
    SdpKind, SessionDescription, SignalingState,
};
use crate::utils::random_ice_chars;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations a test can make fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    CreateOffer,
    CreateAnswer,
    SetLocal,
    SetRemote,
    Rollback,
    AddCandidate,
}

struct MockState {
    signaling: SignalingState,
    connection: ConnectionState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    /// Descriptions of the last `stable` state, restored by rollback.
    stable: (Option<SessionDescription>, Option<SessionDescription>),
    applied_candidates: Vec<IceCandidate>,
    faults: Vec<MockFault>,
    calls: Vec<&'static str>,
    data_channels: Vec<Arc<MockDataChannel>>,
}

pub struct MockEngine {
    session_id: u64,
    version: AtomicU64,
    ufrag: String,
    pwd: String,
    events: Option<EngineEvents>,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_events(None)
    }

    fn with_events(events: Option<EngineEvents>) -> Self {
        Self {
            session_id: rand::random::<u32>() as u64,
            version: AtomicU64::new(1),
            ufrag: random_ice_chars(8),
            pwd: random_ice_chars(24),
            events,
            state: Mutex::new(MockState {
                signaling: SignalingState::Stable,
                connection: ConnectionState::New,
                local: None,
                remote: None,
                stable: (None, None),
                applied_candidates: Vec::new(),
                faults: Vec::new(),
                calls: Vec::new(),
                data_channels: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next call of `fault`.
    pub fn inject_fault(&self, fault: MockFault) {
        self.state().faults.push(fault);
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state().applied_candidates.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state().remote.clone()
    }

    pub fn data_channels(&self) -> Vec<Arc<MockDataChannel>> {
        self.state().data_channels.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state().calls.iter().filter(|c| **c == "close").count()
    }

    /// Pretends the transport changed state and reports it like a real engine.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.state().connection = state;
        self.emit(EngineEvent::ConnectionStateChanged(state));
    }

    /// Reports a locally gathered candidate.
    pub fn gather(&self, candidate: Option<IceCandidate>) {
        self.emit(EngineEvent::LocalCandidate(candidate));
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn enter(&self, call: &'static str, fault: MockFault) -> Result<MutexGuard<'_, MockState>, EngineError> {
        let mut state = self.state();
        state.calls.push(call);
        if state.signaling == SignalingState::Closed {
            return Err(EngineError::Closed);
        }
        if let Some(index) = state.faults.iter().position(|f| *f == fault) {
            state.faults.remove(index);
            return Err(EngineError::Other(format!("injected fault in {call}")));
        }
        Ok(state)
    }

    fn leave_stable(state: &mut MockState) {
        if state.signaling == SignalingState::Stable {
            state.stable = (state.local.clone(), state.remote.clone());
        }
    }

    fn render(&self, kind: SdpKind, with_data: bool) -> String {
        let version = self.version.fetch_add(1, Ordering::SeqCst);
        let setup = match kind {
            SdpKind::Offer => "actpass",
            SdpKind::Answer => "active",
        };
        let mut sdp = format!(
            "v=0\r\n\
o=- {id} {version} IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0{bundle}\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102 103\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=ice-ufrag:{ufrag}\r\n\
a=ice-pwd:{pwd}\r\n\
a=setup:{setup}\r\n\
a=sendrecv\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:102 H264/90000\r\n\
a=rtpmap:103 rtx/90000\r\n\
a=fmtp:103 apt=102\r\n",
            id = self.session_id,
            bundle = if with_data { " 1" } else { "" },
            ufrag = self.ufrag,
            pwd = self.pwd,
        );
        if with_data {
            sdp.push_str(&format!(
                "m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=ice-ufrag:{ufrag}\r\n\
a=ice-pwd:{pwd}\r\n\
a=sctp-port:5000\r\n",
                ufrag = self.ufrag,
                pwd = self.pwd,
            ));
        }
        sdp
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let with_data = {
            let state = self.enter("create_offer", MockFault::CreateOffer)?;
            !state.data_channels.is_empty()
        };
        Ok(SessionDescription::offer(self.render(SdpKind::Offer, with_data)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let with_data = {
            let state = self.enter("create_answer", MockFault::CreateAnswer)?;
            if state.signaling != SignalingState::HaveRemoteOffer {
                return Err(EngineError::Description(format!(
                    "cannot create answer in {}",
                    state.signaling
                )));
            }
            state
                .remote
                .as_ref()
                .is_some_and(|r| r.sdp.contains("m=application"))
        };
        Ok(SessionDescription::answer(self.render(SdpKind::Answer, with_data)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let mut state = self.enter("set_local_description", MockFault::SetLocal)?;
        let next = match (desc.kind, state.signaling) {
            (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
            (SdpKind::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (kind, current) => {
                return Err(EngineError::Description(format!(
                    "local {kind} not allowed in {current}"
                )))
            }
        };
        Self::leave_stable(&mut state);
        state.signaling = next;
        state.local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let mut state = self.enter("set_remote_description", MockFault::SetRemote)?;
        if !desc.sdp.starts_with("v=0") {
            return Err(EngineError::Description("malformed description".into()));
        }
        let next = match (desc.kind, state.signaling) {
            (SdpKind::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                SignalingState::HaveRemoteOffer
            }
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (kind, current) => {
                return Err(EngineError::Description(format!(
                    "remote {kind} not allowed in {current}"
                )))
            }
        };
        Self::leave_stable(&mut state);
        state.signaling = next;
        state.remote = Some(desc);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), EngineError> {
        let mut state = self.enter("rollback", MockFault::Rollback)?;
        if state.signaling == SignalingState::Stable {
            return Ok(());
        }
        let (local, remote) = state.stable.clone();
        state.local = local;
        state.remote = remote;
        state.signaling = SignalingState::Stable;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let mut state = self.enter("add_remote_candidate", MockFault::AddCandidate)?;
        if state.remote.is_none() {
            return Err(EngineError::Candidate("no remote description".into()));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(EngineError::Candidate(candidate.candidate));
        }
        state.applied_candidates.push(candidate);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, EngineError> {
        let mut state = self.state();
        state.calls.push("create_data_channel");
        if state.signaling == SignalingState::Closed {
            return Err(EngineError::Closed);
        }
        let channel = Arc::new(MockDataChannel::new(label));
        state.data_channels.push(channel.clone());
        Ok(channel)
    }

    async fn close(&self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push("close");
        if state.signaling == SignalingState::Closed {
            return Err(EngineError::Closed);
        }
        state.signaling = SignalingState::Closed;
        state.connection = ConnectionState::Closed;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state().signaling
    }

    fn connection_state(&self) -> ConnectionState {
        self.state().connection
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        match self.state().connection {
            ConnectionState::New => IceConnectionState::New,
            ConnectionState::Connecting => IceConnectionState::Checking,
            ConnectionState::Connected => IceConnectionState::Connected,
            ConnectionState::Disconnected => IceConnectionState::Disconnected,
            ConnectionState::Failed => IceConnectionState::Failed,
            ConnectionState::Closed => IceConnectionState::Closed,
        }
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        if self.state().local.is_some() {
            IceGatheringState::Complete
        } else {
            IceGatheringState::New
        }
    }
}

pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> DataChannelState {
        if self.closed.load(Ordering::SeqCst) {
            DataChannelState::Closed
        } else if self.open.load(Ordering::SeqCst) {
            DataChannelState::Open
        } else {
            DataChannelState::Connecting
        }
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        if self.ready_state() != DataChannelState::Open {
            return Err(EngineError::DataChannel("channel not open".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockMedia {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl MediaSource for MockMedia {
    fn kind(&self) -> &str {
        "video"
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`MockEngine`]s and keeps them reachable for inspection.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    engines: Arc<Mutex<Vec<Arc<MockEngine>>>>,
    media_stopped: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently created engine.
    pub fn last(&self) -> Option<Arc<MockEngine>> {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn created(&self) -> usize {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn media_stopped(&self) -> bool {
        self.media_stopped.load(Ordering::SeqCst)
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create(&self, events: EngineEvents) -> Result<EngineParts, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Other("engine creation disabled".into()));
        }
        let engine = Arc::new(MockEngine::with_events(Some(events)));
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(engine.clone());
        self.media_stopped.store(false, Ordering::SeqCst);
        Ok(EngineParts {
            engine,
            media: Some(Box::new(MockMedia {
                stopped: self.media_stopped.clone(),
            })),
        })
    }
}
