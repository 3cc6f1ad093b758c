use crate::peer::engine::{DataChannel, EngineError, EngineEvent, EngineEvents};
use crate::peer::types::DataChannelState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// webrtc-rs data channel behind the engine's [`DataChannel`] trait.
pub struct RtcDataChannel(Arc<RTCDataChannel>);

impl RtcDataChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self(dc)
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.0.label().to_owned()
    }

    fn ready_state(&self) -> DataChannelState {
        match self.0.ready_state() {
            RTCDataChannelState::Open => DataChannelState::Open,
            RTCDataChannelState::Closing => DataChannelState::Closing,
            RTCDataChannelState::Closed => DataChannelState::Closed,
            _ => DataChannelState::Connecting,
        }
    }

    async fn send_text(&self, text: String) -> Result<(), EngineError> {
        self.0
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|err| EngineError::DataChannel(err.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.0
            .close()
            .await
            .map_err(|err| EngineError::DataChannel(err.to_string()))
    }
}

/// Forwards open, text and close into `events`.
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: EngineEvents) {
    let label = dc.label().to_owned();
    debug!(label = %label, "attaching data channel handlers");

    dc.on_open(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            info!(label = %label, "data channel open");
            let _ = events.send(EngineEvent::DataChannelOpen { label });
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        let label = label.clone();
        move |msg| {
            if msg.is_string {
                let text = String::from_utf8_lossy(&msg.data).into_owned();
                let _ = events.send(EngineEvent::DataChannelMessage {
                    label: label.clone(),
                    text,
                });
            } else {
                warn!(label = %label, len = msg.data.len(), "ignoring binary data channel message");
            }
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!(label = %label, "data channel closed");
        let _ = events.send(EngineEvent::DataChannelClosed {
            label: label.clone(),
        });
        Box::pin(async {})
    }));
}
