//! Room-scoped relay between the two peers.
//!
//! Frames are JSON objects `{"event": "...", "data": {...}}`.

pub mod memory;
pub mod websocket;

use crate::peer::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    Offer {
        #[serde(flatten)]
        description: SessionDescription,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        #[serde(flatten)]
        description: SessionDescription,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        #[serde(flatten)]
        candidate: IceCandidate,
        room_id: String,
    },
    UserJoined,
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    /// Informational text from the relay ("Room is full", ...).
    #[serde(rename = "message")]
    Notice { message: String },
}

impl SignalMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::JoinRoom { .. } => "join-room",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::UserJoined => "user-joined",
            SignalMessage::LeaveRoom { .. } => "leave-room",
            SignalMessage::Notice { .. } => "message",
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            SignalMessage::JoinRoom { room_id }
            | SignalMessage::Offer { room_id, .. }
            | SignalMessage::Answer { room_id, .. }
            | SignalMessage::IceCandidate { room_id, .. }
            | SignalMessage::LeaveRoom { room_id } => Some(room_id),
            SignalMessage::UserJoined | SignalMessage::Notice { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to connect to relay: {0}")]
    Connect(String),
    #[error("relay connection is closed")]
    Closed,
    #[error("failed to encode relay frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound half of a relay connection.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), RelayError>;
    /// Idempotent.
    async fn disconnect(&self) -> Result<(), RelayError>;
    fn is_connected(&self) -> bool;
}

pub struct RelayLink {
    pub channel: std::sync::Arc<dyn RelayChannel>,
    pub inbound: mpsc::UnboundedReceiver<SignalMessage>,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<RelayLink, RelayError>;
}
