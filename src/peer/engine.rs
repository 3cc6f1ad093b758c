//! Interface of the media/transport engine the negotiator drives.
//!
//! The engine does ICE, DTLS and codec work; the negotiator only calls the
//! offer/answer primitives below and consumes [`EngineEvent`]s from a channel,
//! in the same task that handles signaling and commands.

use crate::peer::types::{
    ConnectionState, DataChannelState, IceCandidate, IceConnectionState, IceGatheringState,
    SessionDescription, SignalingState,
};
use crate::sdp;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine rejected description: {0}")]
    Description(String),
    #[error("engine rejected candidate: {0}")]
    Candidate(String),
    #[error("data channel error: {0}")]
    DataChannel(String),
    #[error("media error: {0}")]
    Media(String),
    #[error("engine is closed")]
    Closed,
    #[error("engine failure: {0}")]
    Other(String),
}

#[async_trait]
pub trait SessionEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    /// Offer that forces a new ICE generation.
    ///
    /// Engines without a native restart option get fresh credentials written
    /// into an ordinary offer.
    async fn create_restart_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.create_offer().await?;
        Ok(SessionDescription::offer(sdp::regenerate_ice_credentials(
            &offer.sdp,
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Discards the pending local or remote offer and returns to `stable`.
    /// Does nothing when already `stable`.
    async fn rollback(&self) -> Result<(), EngineError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, EngineError>;
    async fn close(&self) -> Result<(), EngineError>;

    fn signaling_state(&self) -> SignalingState;
    fn connection_state(&self) -> ConnectionState;
    fn ice_connection_state(&self) -> IceConnectionState;
    fn ice_gathering_state(&self) -> IceGatheringState;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn ready_state(&self) -> DataChannelState;
    async fn send_text(&self, text: String) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}

/// Local send track attached to the engine; stopped during teardown.
#[async_trait]
pub trait MediaSource: Send {
    fn kind(&self) -> &str;
    async fn stop(&mut self) -> Result<(), EngineError>;
}

/// Callbacks of the engine, delivered in order through one channel.
pub enum EngineEvent {
    /// `None` marks the end of gathering.
    LocalCandidate(Option<IceCandidate>),
    GatheringStateChanged(IceGatheringState),
    ConnectionStateChanged(ConnectionState),
    IceConnectionStateChanged(IceConnectionState),
    Track { kind: String, id: String },
    DataChannel(Arc<dyn DataChannel>),
    DataChannelOpen { label: String },
    DataChannelClosed { label: String },
    DataChannelMessage { label: String, text: String },
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            EngineEvent::GatheringStateChanged(s) => {
                f.debug_tuple("GatheringStateChanged").field(s).finish()
            }
            EngineEvent::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            EngineEvent::IceConnectionStateChanged(s) => {
                f.debug_tuple("IceConnectionStateChanged").field(s).finish()
            }
            EngineEvent::Track { kind, id } => f
                .debug_struct("Track")
                .field("kind", kind)
                .field("id", id)
                .finish(),
            EngineEvent::DataChannel(dc) => f.debug_tuple("DataChannel").field(&dc.label()).finish(),
            EngineEvent::DataChannelOpen { label } => {
                f.debug_struct("DataChannelOpen").field("label", label).finish()
            }
            EngineEvent::DataChannelClosed { label } => {
                f.debug_struct("DataChannelClosed").field("label", label).finish()
            }
            EngineEvent::DataChannelMessage { label, text } => f
                .debug_struct("DataChannelMessage")
                .field("label", label)
                .field("text", text)
                .finish(),
        }
    }
}

pub type EngineEvents = mpsc::UnboundedSender<EngineEvent>;

/// What the lifecycle manager owns once an engine is up.
pub struct EngineParts {
    pub engine: Arc<dyn SessionEngine>,
    pub media: Option<Box<dyn MediaSource>>,
}

/// Builds a fresh engine per session.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, events: EngineEvents) -> Result<EngineParts, EngineError>;
}
