use futures_util::FutureExt;
use room_peer_lib::commands::{CommandOutcome, CommandSequencer};
use room_peer_lib::peer::mock::{MockEngine, MockEngineFactory};
use room_peer_lib::peer::types::{IceCandidate, SdpKind, SignalingState};
use room_peer_lib::sdp;
use room_peer_lib::session::{SessionManager, SessionOptions};
use room_peer_lib::signaling::memory::MemoryRelayHub;
use std::sync::Arc;
use std::time::Duration;

struct Peer {
    manager: SessionManager,
    factory: MockEngineFactory,
}

impl Peer {
    async fn join(hub: &MemoryRelayHub, room: &str) -> Self {
        let factory = MockEngineFactory::new();
        let mut manager = SessionManager::new(
            SessionOptions::default(),
            Arc::new(factory.clone()),
            Arc::new(hub.clone()),
        );
        manager.join("mem", room).await.unwrap();
        Peer { manager, factory }
    }

    fn engine(&self) -> Arc<MockEngine> {
        self.factory.last().unwrap()
    }

    fn state(&mut self) -> SignalingState {
        self.manager.negotiator().unwrap().session().signaling_state()
    }

    fn token(&mut self) -> Option<String> {
        self.manager
            .negotiator()
            .unwrap()
            .session()
            .pending_offer_token()
            .map(str::to_owned)
    }
}

/// Handles every event that is already queued, on all peers, until none is left.
async fn settle(peers: &mut [&mut Peer]) {
    loop {
        let mut progressed = false;
        for peer in peers.iter_mut() {
            while let Some(event) = peer.manager.next_event().now_or_never() {
                peer.manager.handle_event(event).await;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

#[tokio::test]
async fn second_participant_triggers_a_full_offer_answer_exchange() {
    let hub = MemoryRelayHub::new();
    let mut a = Peer::join(&hub, "42").await;
    let mut b = Peer::join(&hub, "42").await;

    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(a.state(), SignalingState::Stable);
    assert_eq!(b.state(), SignalingState::Stable);
    assert_eq!(a.token(), None);
    assert_eq!(hub.count("offer"), 1);
    assert_eq!(hub.count("answer"), 1);

    let offer = b.engine().remote_description().unwrap();
    assert_eq!(offer.kind, SdpKind::Offer);
    assert!(sdp::extract_token(&offer.sdp).is_some());
    let answer = a.engine().remote_description().unwrap();
    assert_eq!(answer.kind, SdpKind::Answer);
    assert!(answer.sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 "));
}

#[tokio::test]
async fn candidates_cross_the_relay_and_apply_in_order() {
    let hub = MemoryRelayHub::new();
    let mut a = Peer::join(&hub, "42").await;
    let mut b = Peer::join(&hub, "42").await;

    let engine = a.engine();
    engine.gather(Some(candidate(1)));
    engine.gather(Some(candidate(2)));
    engine.gather(Some(candidate(2)));
    engine.gather(None);

    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(hub.count("ice-candidate"), 2);
    assert_eq!(b.engine().applied_candidates(), vec![candidate(1), candidate(2)]);
    assert_eq!(
        b.manager.negotiator().unwrap().session().buffered_candidates(),
        0
    );
}

#[tokio::test]
async fn restart_resolves_simultaneous_offers() {
    let hub = MemoryRelayHub::new();
    let mut a = Peer::join(&hub, "42").await;
    let mut b = Peer::join(&hub, "42").await;
    // Discard A's user-joined so neither side offers on its own.
    while a.manager.next_event().now_or_never().is_some() {}

    a.manager.negotiator().unwrap().begin_offer().await.unwrap();
    b.manager.negotiator().unwrap().begin_offer().await.unwrap();
    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(hub.count("answer"), 0);
    assert_eq!(a.state(), SignalingState::HaveLocalOffer);
    assert_eq!(b.state(), SignalingState::HaveLocalOffer);
    assert!(a.engine().remote_description().is_none());
    assert!(b.engine().remote_description().is_none());
    assert!(a.token().is_some());
    assert!(a
        .manager
        .negotiator()
        .unwrap()
        .session()
        .held_offer()
        .is_some());

    // A withdraws its offer, answers B's and offers again.
    a.manager.negotiator().unwrap().restart().await.unwrap();
    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(hub.count("answer"), 2);
    assert_eq!(a.state(), SignalingState::Stable);
    assert_eq!(b.state(), SignalingState::Stable);
    assert_eq!(a.token(), None);
    assert_eq!(b.token(), None);
    let restarted = b.engine().remote_description().unwrap();
    assert_eq!(restarted.kind, SdpKind::Offer);
    assert_eq!(
        a.engine().remote_description().unwrap().kind,
        SdpKind::Answer
    );

    assert!(a.manager.leave().await);
    assert!(b.manager.leave().await);
}

#[tokio::test]
async fn restart_renegotiates_with_fresh_credentials() {
    let hub = MemoryRelayHub::new();
    let mut a = Peer::join(&hub, "42").await;
    let mut b = Peer::join(&hub, "42").await;
    settle(&mut [&mut a, &mut b]).await;
    let before = b.engine().remote_description().unwrap();

    a.manager.negotiator().unwrap().restart().await.unwrap();
    settle(&mut [&mut a, &mut b]).await;

    let after = b.engine().remote_description().unwrap();
    assert_ne!(sdp::ice_credentials(&before.sdp), sdp::ice_credentials(&after.sdp));
    assert_eq!(hub.count("answer"), 2);
    assert_eq!(a.state(), SignalingState::Stable);
    assert_eq!(b.state(), SignalingState::Stable);
}

#[tokio::test]
async fn leaving_twice_notifies_and_closes_once() {
    let hub = MemoryRelayHub::new();
    let mut a = Peer::join(&hub, "42").await;
    let engine = a.engine();

    assert!(a.manager.leave().await);
    assert!(!a.manager.leave().await);

    assert_eq!(hub.count("leave-room"), 1);
    assert_eq!(engine.close_count(), 1);
    assert!(a.factory.media_stopped());
}

#[tokio::test]
async fn sequencers_negotiate_and_report_status() {
    let hub = MemoryRelayHub::new();
    let a = Peer::join(&hub, "42").await;
    let b = Peer::join(&hub, "42").await;

    let (handle_a, sequencer_a) = CommandSequencer::new(a.manager, 8);
    let (handle_b, sequencer_b) = CommandSequencer::new(b.manager, 8);
    let task_a = tokio::spawn(sequencer_a.run());
    let task_b = tokio::spawn(sequencer_b.run());

    let mut settled = false;
    for _ in 0..100 {
        let status_a = handle_a.submit("status").await.unwrap();
        let status_b = handle_b.submit("status").await.unwrap();
        if let (CommandOutcome::Status(sa), CommandOutcome::Status(sb)) = (status_a, status_b) {
            if hub.count("answer") == 1
                && sa.signaling == SignalingState::Stable
                && sb.signaling == SignalingState::Stable
                && !sa.offer_pending
            {
                settled = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(settled, "peers never reached stable");

    assert!(matches!(
        handle_a.submit("send hi").await.unwrap(),
        CommandOutcome::Rejected(_)
    ));
    assert!(matches!(
        handle_a.submit("wave").await.unwrap(),
        CommandOutcome::Rejected(_)
    ));

    assert_eq!(handle_a.submit("leave").await.unwrap(), CommandOutcome::Left);
    assert_eq!(handle_b.submit("leave").await.unwrap(), CommandOutcome::Left);
    task_a.await.unwrap();
    task_b.await.unwrap();
    assert_eq!(hub.count("leave-room"), 2);
    assert_eq!(a.factory.last().unwrap().close_count(), 1);
}
