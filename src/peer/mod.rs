pub mod connection;
pub mod data_channel;
pub mod engine;
pub mod ice;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod state;
pub mod types;

pub use engine::{DataChannel, EngineError, EngineEvent, SessionEngine};
pub use state::NegotiationSession;
pub use types::{IceCandidate, ServerConfig, SessionDescription, SignalingState};
