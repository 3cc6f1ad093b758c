//! Owns the engine, local media, data channel and relay link of the one
//! active room session, and tears them down in a fixed order.

use crate::negotiation::{CodecPreference, NegotiationError, Negotiator};
use crate::peer::engine::{EngineError, EngineEvent, EngineFactory, MediaSource};
use crate::peer::types::ConnectionState;
use crate::signaling::{RelayConnector, RelayError, SignalMessage};
use std::future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default wait before a lost connection is torn down.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub codec: CodecPreference,
    pub data_channel_label: String,
    pub grace_period: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            codec: CodecPreference::default(),
            data_channel_label: "room-peer".into(),
            grace_period: GRACE_PERIOD,
        }
    }
}

/// Something that happened to the active session while no command ran.
#[derive(Debug)]
pub enum SessionEvent {
    Signal(SignalMessage),
    Engine(EngineEvent),
    RelayClosed,
    GraceExpired,
}

struct ActiveSession {
    negotiator: Negotiator,
    media: Option<Box<dyn MediaSource>>,
    inbound: mpsc::UnboundedReceiver<SignalMessage>,
    relay_open: bool,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    // Held so `events` stays open for the session's lifetime.
    _events_tx: mpsc::UnboundedSender<EngineEvent>,
    grace_tx: mpsc::UnboundedSender<()>,
    grace_rx: mpsc::UnboundedReceiver<()>,
    grace_task: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    options: SessionOptions,
    factory: Arc<dyn EngineFactory>,
    connector: Arc<dyn RelayConnector>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(
        options: SessionOptions,
        factory: Arc<dyn EngineFactory>,
        connector: Arc<dyn RelayConnector>,
    ) -> Self {
        Self {
            options,
            factory,
            connector,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn negotiator(&mut self) -> Result<&mut Negotiator, NegotiationError> {
        self.active
            .as_mut()
            .map(|active| &mut active.negotiator)
            .ok_or(NegotiationError::NoActiveSession)
    }

    /// Connects to the relay, joins `room_id` and creates a fresh engine.
    ///
    /// A session that is still active is torn down first.
    pub async fn join(&mut self, relay_address: &str, room_id: &str) -> Result<(), SessionError> {
        if self.active.is_some() {
            info!("leaving previous session before joining");
            self.leave().await;
        }

        let link = self.connector.connect(relay_address).await?;
        info!(server = %relay_address, "connected to server");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let parts = match self.factory.create(events_tx.clone()).await {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(err) = link.channel.disconnect().await {
                    warn!(error = %err, "relay disconnect failed");
                }
                return Err(err.into());
            }
        };

        let negotiator = Negotiator::new(
            room_id,
            parts.engine,
            link.channel.clone(),
            self.options.codec.clone(),
            self.options.data_channel_label.clone(),
        );
        let (grace_tx, grace_rx) = mpsc::unbounded_channel();
        self.active = Some(ActiveSession {
            negotiator,
            media: parts.media,
            inbound: link.inbound,
            relay_open: true,
            events: events_rx,
            _events_tx: events_tx,
            grace_tx,
            grace_rx,
            grace_task: None,
        });

        let join = SignalMessage::JoinRoom {
            room_id: room_id.to_owned(),
        };
        if let Err(err) = link.channel.send(join).await {
            self.leave().await;
            return Err(err.into());
        }
        info!(room = %room_id, "joined room");
        Ok(())
    }

    /// Tears the session down. Safe to call with no session; every step is
    /// attempted even when an earlier one fails.
    ///
    /// Returns whether there was a session to tear down.
    pub async fn leave(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            debug!("leave: no active session");
            return false;
        };
        if let Some(task) = active.grace_task.take() {
            task.abort();
        }

        let room_id = active.negotiator.room_id().to_owned();
        let relay = active.negotiator.relay().clone();

        if relay.is_connected() {
            let leave = SignalMessage::LeaveRoom {
                room_id: room_id.clone(),
            };
            match relay.send(leave).await {
                Ok(()) => info!(room = %room_id, "left room"),
                Err(err) => warn!(error = %err, "error leaving room"),
            }
        }

        if let Some(mut media) = active.media.take() {
            match media.stop().await {
                Ok(()) => debug!(kind = media.kind(), "local media stopped"),
                Err(err) => warn!(error = %err, "failed to stop local media"),
            }
        }

        if let Some(channel) = active.negotiator.take_data_channel() {
            if let Err(err) = channel.close().await {
                warn!(error = %err, "failed to close data channel");
            }
        }

        if let Err(err) = active.negotiator.engine().close().await {
            warn!(error = %err, "failed to close peer connection");
        }

        match relay.disconnect().await {
            Ok(()) => info!("disconnected from signaling server"),
            Err(err) => warn!(error = %err, "error disconnecting"),
        }

        active.negotiator.close();
        true
    }

    /// Waits for the next relay message, engine callback or timer of the
    /// active session. Never resolves while there is no session.
    pub async fn next_event(&mut self) -> SessionEvent {
        let Some(active) = self.active.as_mut() else {
            return future::pending().await;
        };
        let relay_open = active.relay_open;
        tokio::select! {
            message = active.inbound.recv(), if relay_open => match message {
                Some(message) => SessionEvent::Signal(message),
                None => {
                    active.relay_open = false;
                    SessionEvent::RelayClosed
                }
            },
            Some(event) = active.events.recv() => SessionEvent::Engine(event),
            Some(()) = active.grace_rx.recv() => SessionEvent::GraceExpired,
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Signal(message) => {
                let event = message.event_name();
                if let Ok(negotiator) = self.negotiator() {
                    if let Err(err) = negotiator.handle_signal(message).await {
                        err.log(&format!("{event} not applied"));
                    }
                }
            }
            SessionEvent::Engine(event) => {
                if let EngineEvent::ConnectionStateChanged(state) = &event {
                    self.track_connection(*state);
                }
                if let Ok(negotiator) = self.negotiator() {
                    if let Err(err) = negotiator.handle_engine_event(event).await {
                        err.log("engine event not handled");
                    }
                }
            }
            SessionEvent::RelayClosed => warn!("disconnected from signaling server"),
            SessionEvent::GraceExpired => {
                let connected = match self.active.as_mut() {
                    Some(active) => {
                        active.grace_task = None;
                        active.negotiator.engine().connection_state() == ConnectionState::Connected
                    }
                    None => return,
                };
                if connected {
                    debug!("grace period elapsed after recovery");
                } else {
                    warn!("connection not recovered within grace period, closing session");
                    self.leave().await;
                }
            }
        }
    }

    fn track_connection(&mut self, state: ConnectionState) {
        let grace_period = self.options.grace_period;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match state {
            ConnectionState::Connected => {
                if let Some(task) = active.grace_task.take() {
                    task.abort();
                    info!("connection recovered");
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                if active.grace_task.is_none() {
                    warn!(state = %state, grace_secs = grace_period.as_secs(), "connection problem, waiting for recovery");
                    let tx = active.grace_tx.clone();
                    active.grace_task = Some(tokio::spawn(async move {
                        sleep(grace_period).await;
                        let _ = tx.send(());
                    }));
                }
            }
            _ => {}
        }
    }
}
