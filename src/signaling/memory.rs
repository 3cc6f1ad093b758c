//! In-process relay with the room rules of the signaling server: at most two
//! participants per room, `user-joined` goes to the peer already waiting, and
//! room traffic is broadcast to everyone but the sender.

use super::{RelayChannel, RelayConnector, RelayError, RelayLink, SignalMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

const ROOM_CAPACITY: usize = 2;

#[derive(Default)]
struct HubState {
    next_peer: u64,
    peers: HashMap<u64, mpsc::UnboundedSender<SignalMessage>>,
    rooms: Vec<Room>,
    sent: Vec<(u64, SignalMessage)>,
    unreachable: bool,
}

struct Room {
    id: String,
    participants: Vec<u64>,
}

#[derive(Clone, Default)]
pub struct MemoryRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes subsequent `connect` calls fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Every frame received from peers, in order.
    pub fn sent_messages(&self) -> Vec<SignalMessage> {
        self.state().sent.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.state()
            .sent
            .iter()
            .filter(|(_, m)| m.event_name() == event)
            .count()
    }

    pub fn participants(&self, room_id: &str) -> usize {
        self.state()
            .rooms
            .iter()
            .find(|room| room.id == room_id)
            .map_or(0, |room| room.participants.len())
    }

    fn deliver(state: &HubState, peer: u64, message: SignalMessage) {
        if let Some(tx) = state.peers.get(&peer) {
            let _ = tx.send(message);
        }
    }

    fn broadcast(state: &HubState, room_id: &str, from: u64, message: SignalMessage) {
        match state.rooms.iter().find(|room| room.id == room_id) {
            Some(room) => {
                for peer in room.participants.iter().filter(|p| **p != from) {
                    Self::deliver(state, *peer, message.clone());
                }
            }
            None => Self::deliver(
                state,
                from,
                SignalMessage::Notice {
                    message: "Room not found".into(),
                },
            ),
        }
    }

    fn handle(&self, from: u64, message: SignalMessage) {
        let mut state = self.state();
        state.sent.push((from, message.clone()));
        debug!(peer = from, event = message.event_name(), "hub frame");

        match message {
            SignalMessage::JoinRoom { room_id } => {
                match state.rooms.iter().position(|room| room.id == room_id) {
                    Some(index) => {
                        let room = &state.rooms[index];
                        if room.participants.contains(&from) {
                            Self::deliver(
                                &state,
                                from,
                                SignalMessage::Notice {
                                    message: "User is already in this room".into(),
                                },
                            );
                        } else if room.participants.len() >= ROOM_CAPACITY {
                            Self::deliver(
                                &state,
                                from,
                                SignalMessage::Notice {
                                    message: "Room is full".into(),
                                },
                            );
                        } else {
                            state.rooms[index].participants.push(from);
                            Self::broadcast(&state, &room_id, from, SignalMessage::UserJoined);
                        }
                    }
                    None => state.rooms.push(Room {
                        id: room_id,
                        participants: vec![from],
                    }),
                }
            }
            SignalMessage::LeaveRoom { room_id } => {
                if state.rooms.iter().any(|room| room.id == room_id) {
                    Self::remove_peer(&mut state, from);
                } else {
                    Self::deliver(
                        &state,
                        from,
                        SignalMessage::Notice {
                            message: "Room not found".into(),
                        },
                    );
                }
            }
            SignalMessage::Offer { ref room_id, .. }
            | SignalMessage::Answer { ref room_id, .. }
            | SignalMessage::IceCandidate { ref room_id, .. } => {
                let room_id = room_id.clone();
                Self::broadcast(&state, &room_id, from, message);
            }
            SignalMessage::UserJoined | SignalMessage::Notice { .. } => {}
        }
    }

    fn remove_peer(state: &mut HubState, peer: u64) {
        for room in &mut state.rooms {
            room.participants.retain(|p| *p != peer);
        }
        state.rooms.retain(|room| !room.participants.is_empty());
    }

    fn disconnect_peer(&self, peer: u64) {
        let mut state = self.state();
        state.peers.remove(&peer);
        Self::remove_peer(&mut state, peer);
    }
}

pub struct MemoryRelay {
    peer: u64,
    hub: MemoryRelayHub,
    connected: AtomicBool,
}

#[async_trait]
impl RelayConnector for MemoryRelayHub {
    async fn connect(&self, _address: &str) -> Result<RelayLink, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = {
            let mut state = self.state();
            if state.unreachable {
                return Err(RelayError::Connect("relay unreachable".into()));
            }
            state.next_peer += 1;
            let peer = state.next_peer;
            state.peers.insert(peer, tx);
            peer
        };
        Ok(RelayLink {
            channel: Arc::new(MemoryRelay {
                peer,
                hub: self.clone(),
                connected: AtomicBool::new(true),
            }),
            inbound: rx,
        })
    }
}

#[async_trait]
impl RelayChannel for MemoryRelay {
    async fn send(&self, message: SignalMessage) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Closed);
        }
        self.hub.handle(self.peer, message);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.hub.disconnect_peer(self.peer);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(room: &str) -> SignalMessage {
        SignalMessage::JoinRoom {
            room_id: room.into(),
        }
    }

    #[tokio::test]
    async fn second_participant_triggers_user_joined_for_first() {
        let hub = MemoryRelayHub::new();
        let mut a = hub.connect("mem").await.unwrap();
        let mut b = hub.connect("mem").await.unwrap();

        a.channel.send(join("r")).await.unwrap();
        b.channel.send(join("r")).await.unwrap();

        assert_eq!(a.inbound.try_recv().unwrap(), SignalMessage::UserJoined);
        assert!(b.inbound.try_recv().is_err());
        assert_eq!(hub.participants("r"), 2);
    }

    #[tokio::test]
    async fn third_participant_is_turned_away() {
        let hub = MemoryRelayHub::new();
        let a = hub.connect("mem").await.unwrap();
        let b = hub.connect("mem").await.unwrap();
        let mut c = hub.connect("mem").await.unwrap();
        for link in [&a, &b, &c] {
            link.channel.send(join("r")).await.unwrap();
        }
        assert_eq!(
            c.inbound.try_recv().unwrap(),
            SignalMessage::Notice {
                message: "Room is full".into()
            }
        );
        assert_eq!(hub.participants("r"), 2);
    }

    #[tokio::test]
    async fn traffic_skips_sender_and_unknown_rooms_get_a_notice() {
        let hub = MemoryRelayHub::new();
        let mut a = hub.connect("mem").await.unwrap();
        let mut b = hub.connect("mem").await.unwrap();
        a.channel.send(join("r")).await.unwrap();
        b.channel.send(join("r")).await.unwrap();
        let _ = a.inbound.try_recv();

        let offer = SignalMessage::Offer {
            description: crate::peer::types::SessionDescription::offer("v=0\r\n"),
            room_id: "r".into(),
        };
        a.channel.send(offer.clone()).await.unwrap();
        assert_eq!(b.inbound.try_recv().unwrap(), offer);
        assert!(a.inbound.try_recv().is_err());

        a.channel
            .send(SignalMessage::LeaveRoom {
                room_id: "other".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            a.inbound.try_recv().unwrap(),
            SignalMessage::Notice { .. }
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_frees_the_slot() {
        let hub = MemoryRelayHub::new();
        let a = hub.connect("mem").await.unwrap();
        a.channel.send(join("r")).await.unwrap();
        a.channel.disconnect().await.unwrap();
        a.channel.disconnect().await.unwrap();
        assert_eq!(hub.participants("r"), 0);
        assert!(matches!(
            a.channel.send(join("r")).await,
            Err(RelayError::Closed)
        ));
    }

    #[tokio::test]
    async fn unreachable_hub_refuses_connections() {
        let hub = MemoryRelayHub::new();
        hub.set_unreachable(true);
        assert!(hub.connect("mem").await.is_err());
    }
}
