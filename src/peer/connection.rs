use crate::media::{FrameSender, RemoteFrame};
use crate::peer::data_channel::{attach_dc, RtcDataChannel};
use crate::peer::engine::{
    DataChannel, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineParts, MediaSource,
    SessionEngine,
};
use crate::peer::types::{
    ConnectionState, IceCandidate, IceConnectionState, IceGatheringState, SdpKind,
    ServerConfig, SessionDescription, SignalingState,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Default STUN servers.
pub const DEFAULT_STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

fn engine_err(err: webrtc::Error) -> EngineError {
    EngineError::Other(err.to_string())
}

/// Builds webrtc-rs peer connections.
pub struct WebRtcEngineFactory {
    pub ice_servers: Vec<ServerConfig>,
    pub video: bool,
    pub frames: FrameSender,
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(&self, events: EngineEvents) -> Result<EngineParts, EngineError> {
        let pc = new_peer(rtc_config(&self.ice_servers), events.clone(), self.frames.clone()).await?;
        let media: Option<Box<dyn MediaSource>> = if self.video {
            Some(Box::new(LocalVideo::attach(pc.clone()).await?))
        } else {
            None
        };
        Ok(EngineParts {
            engine: Arc::new(WebRtcEngine { pc, events }),
            media,
        })
    }
}

/// Creates the peer and wires its callbacks into `events`.
async fn new_peer(
    config: RTCConfiguration,
    events: EngineEvents,
    frames: FrameSender,
) -> Result<Arc<RTCPeerConnection>, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(engine_err)?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(engine_err)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(config).await.map_err(engine_err)?);

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let candidate = match cand {
            Some(c) => match c.to_json() {
                Ok(init) => Some(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                }),
                Err(err) => {
                    warn!(error = %err, "unserializable local candidate");
                    return Box::pin(async {});
                }
            },
            None => None,
        };
        let _ = tx.send(EngineEvent::LocalCandidate(candidate));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        let mapped = match state {
            RTCIceGathererState::Gathering => IceGatheringState::Gathering,
            RTCIceGathererState::Complete => IceGatheringState::Complete,
            _ => IceGatheringState::New,
        };
        let _ = tx.send(EngineEvent::GatheringStateChanged(mapped));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let _ = tx.send(EngineEvent::IceConnectionStateChanged(map_ice_connection(state)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = tx.send(EngineEvent::ConnectionStateChanged(map_connection(state)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let kind = track.kind().to_string();
        let id = track.id();
        let _ = tx.send(EngineEvent::Track {
            kind: kind.clone(),
            id: id.clone(),
        });
        let frames = frames.clone();
        tokio::spawn(async move {
            // One notice per RTP packet; the queue drops when the reader lags.
            while let Ok((packet, _)) = track.read_rtp().await {
                frames.offer(RemoteFrame {
                    kind: kind.clone(),
                    sequence_number: packet.header.sequence_number,
                    timestamp: packet.header.timestamp,
                    payload: packet.payload,
                });
            }
            debug!(track = %id, "remote track ended");
        });
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        attach_dc(&dc, tx.clone());
        let _ = tx.send(EngineEvent::DataChannel(Arc::new(RtcDataChannel::new(dc))));
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Peer connection configuration
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = if servers.is_empty() {
        vec![RTCIceServer {
            urls: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }]
    } else {
        get_user_ice_servers(servers)
    };

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn map_connection(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

fn map_ice_connection(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

/// Provisional answers are folded into the offer state they extend.
fn map_signaling(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
            SignalingState::HaveLocalOffer
        }
        RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
            SignalingState::HaveRemoteOffer
        }
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|err| EngineError::Description(err.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
    match desc.sdp_type {
        RTCSdpType::Answer => SessionDescription::answer(desc.sdp),
        _ => SessionDescription::offer(desc.sdp),
    }
}

pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    events: EngineEvents,
}

#[async_trait]
impl SessionEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(engine_err)?;
        Ok(from_rtc(offer))
    }

    async fn create_restart_offer(&self) -> Result<SessionDescription, EngineError> {
        let options = RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(engine_err)?;
        Ok(from_rtc(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(engine_err)?;
        Ok(from_rtc(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|err| EngineError::Description(err.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|err| EngineError::Description(err.to_string()))
    }

    async fn rollback(&self) -> Result<(), EngineError> {
        // The engine parses the rollback body, so the pending description is
        // reused with its type switched.
        let (pending, local) = match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                (self.pc.pending_local_description().await, true)
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                (self.pc.pending_remote_description().await, false)
            }
            _ => return Ok(()),
        };
        let mut rollback = pending
            .ok_or_else(|| EngineError::Description("nothing to roll back".into()))?;
        rollback.sdp_type = RTCSdpType::Rollback;
        let applied = if local {
            self.pc.set_local_description(rollback).await
        } else {
            self.pc.set_remote_description(rollback).await
        };
        applied.map_err(|err| EngineError::Description(err.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| EngineError::Candidate(err.to_string()))
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, EngineError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await
            .map_err(|err| EngineError::DataChannel(err.to_string()))?;
        attach_dc(&dc, self.events.clone());
        Ok(Arc::new(RtcDataChannel::new(dc)))
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.pc.connection_state() == RTCPeerConnectionState::Closed {
            return Ok(());
        }
        self.pc.close().await.map_err(engine_err)
    }

    fn signaling_state(&self) -> SignalingState {
        map_signaling(self.pc.signaling_state())
    }

    fn connection_state(&self) -> ConnectionState {
        map_connection(self.pc.connection_state())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        map_ice_connection(self.pc.ice_connection_state())
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Gathering => IceGatheringState::Gathering,
            RTCIceGatheringState::Complete => IceGatheringState::Complete,
            _ => IceGatheringState::New,
        }
    }
}

/// Placeholder H264 send track. No capture is wired up, so it only reserves
/// the outgoing video m-line; teardown detaches it from the peer.
pub struct LocalVideo {
    pc: Arc<RTCPeerConnection>,
    sender: Option<Arc<RTCRtpSender>>,
}

impl LocalVideo {
    async fn attach(pc: Arc<RTCPeerConnection>) -> Result<Self, EngineError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "room-peer".to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| EngineError::Media(err.to_string()))?;
        info!("local video track attached");
        Ok(Self {
            pc,
            sender: Some(sender),
        })
    }
}

#[async_trait]
impl MediaSource for LocalVideo {
    fn kind(&self) -> &str {
        "video"
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        self.pc
            .remove_track(&sender)
            .await
            .map_err(|err| EngineError::Media(err.to_string()))?;
        info!("local video track detached");
        Ok(())
    }
}
