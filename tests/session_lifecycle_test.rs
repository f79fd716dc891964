use scope_rtc::config::SignalingConfig;
use scope_rtc::peer::{ConnectionState, IceCandidate, TransportEvent};
use scope_rtc::session::{SessionDeps, SessionEvent, SessionManager, StreamKind};
use scope_rtc::signaling::CandidateMessage;
use scope_rtc::testing::{PeerScript, ScriptedPeerFactory, ScriptedSignaling};
use scope_rtc::SessionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Fixture {
    manager: SessionManager,
    signaling: Arc<ScriptedSignaling>,
    peers: Arc<ScriptedPeerFactory>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

fn fixture(script: PeerScript) -> Fixture {
    let signaling = Arc::new(ScriptedSignaling::new());
    let peers = Arc::new(ScriptedPeerFactory::with_script(script));
    let (tx, events) = mpsc::unbounded_channel();
    let manager = SessionManager::new(
        SessionDeps::from_signaling(signaling.clone(), peers.clone()),
        &SignalingConfig::default(),
        tx,
    );
    Fixture {
        manager,
        signaling,
        peers,
        events,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn candidate(foundation: &str, ip: &str) -> IceCandidate {
    IceCandidate::new(format!("candidate:{foundation} 1 udp 2122260223 {ip} 50000 typ host"))
}

#[tokio::test]
async fn test_seestar_end_to_end() {
    let mut f = fixture(PeerScript::default());
    f.signaling.script(|s| {
        s.inbound = vec![
            CandidateMessage::Keepalive,
            CandidateMessage::Candidate(candidate("b", "10.0.0.2")),
            CandidateMessage::Keepalive,
            CandidateMessage::Candidate(candidate("a", "10.0.0.1")),
        ]
    });

    let stream = f
        .manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();
    assert_eq!(stream.session_id(), "abc123");
    assert!(stream.video_track().is_some());

    let requests = f.signaling.create_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_name, "Seestar-S50");
    assert_eq!(requests[0].stream_kind, StreamKind::Live);

    let peer = f.peers.last_peer().unwrap();
    eventually(|| peer.applied_candidates().len() == 2).await;
    let applied = peer.applied_candidates();
    assert!(applied[0].candidate.starts_with("candidate:b"));
    assert!(applied[1].candidate.starts_with("candidate:a"));

    // local host candidate from the scripted offer
    eventually(|| f.signaling.sent_candidates().len() == 1).await;
    assert_eq!(f.signaling.sent_candidates()[0].0, "abc123");

    f.manager.disconnect().await;
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
    assert!(peer.is_closed());
    assert!(!stream.is_active());
    assert!(f.manager.active_session().await.is_none());

    let mut closed = false;
    while let Ok(event) = f.events.try_recv() {
        if let SessionEvent::Closed { session_id } = event {
            assert_eq!(session_id, "abc123");
            closed = true;
        }
    }
    assert!(closed);
}

#[tokio::test]
async fn test_candidates_pushed_after_setup_are_applied() {
    let f = fixture(PeerScript::default());
    f.manager
        .create_session("Seestar-S50", StreamKind::Stacked)
        .await
        .unwrap();
    eventually(|| f.signaling.open_streams("abc123") == 1).await;

    f.signaling
        .push("abc123", CandidateMessage::Candidate(candidate("2", "10.0.0.2")));
    f.signaling.push("abc123", CandidateMessage::Keepalive);
    f.signaling
        .push("abc123", CandidateMessage::Candidate(candidate("1", "10.0.0.1")));

    let peer = f.peers.last_peer().unwrap();
    eventually(|| peer.applied_candidates().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(peer.applied_candidates().len(), 2);
}

#[tokio::test]
async fn test_replacement_closes_previous_session_first() {
    let mut f = fixture(PeerScript::default());

    f.manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();
    eventually(|| f.signaling.open_streams("abc123") == 1).await;

    let second = f
        .manager
        .create_session("Seestar-S50", StreamKind::Stacked)
        .await
        .unwrap();
    assert_eq!(second.session_id(), "session-2");

    let peers = f.peers.peers();
    assert_eq!(peers.len(), 2);
    assert!(peers[0].is_closed());
    assert!(!peers[1].is_closed());
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
    assert_eq!(f.signaling.open_streams("abc123"), 0);
    assert_eq!(
        f.manager.active_session().await.map(|s| s.session_id),
        Some("session-2".to_string())
    );

    let mut order = Vec::new();
    while let Ok(event) = f.events.try_recv() {
        match event {
            SessionEvent::Closed { session_id } => order.push(format!("closed:{session_id}")),
            SessionEvent::Negotiating { session_id } => order.push(format!("negotiating:{session_id}")),
            _ => {}
        }
    }
    assert_eq!(
        order,
        vec!["negotiating:abc123", "closed:abc123", "negotiating:session-2"]
    );
}

#[tokio::test]
async fn test_repeated_disconnect_deletes_once() {
    let f = fixture(PeerScript::default());

    f.manager.disconnect().await;
    f.manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();

    f.manager.disconnect().await;
    f.manager.disconnect().await;
    f.manager.disconnect().await;

    assert_eq!(f.signaling.deleted().len(), 1);
    assert_eq!(f.peers.last_peer().unwrap().close_count(), 1);
    assert!(!f.manager.is_active().await);
}

#[tokio::test]
async fn test_failed_delete_is_swallowed() {
    let f = fixture(PeerScript::default());
    f.signaling.script(|s| s.delete_error = Some("HTTP 502 Bad Gateway".into()));

    f.manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();
    f.manager.disconnect().await;

    assert_eq!(f.signaling.deleted().len(), 1);
    assert!(f.peers.last_peer().unwrap().is_closed());
    assert!(!f.manager.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn test_audio_only_times_out_and_releases_everything() {
    let mut f = fixture(PeerScript::audio_only());
    let started = Instant::now();

    let err = f
        .manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NegotiationTimeout(d) if d == Duration::from_secs(30)));
    assert!(started.elapsed() >= Duration::from_secs(30));

    let peer = f.peers.last_peer().unwrap();
    assert!(peer.is_closed());
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
    assert_eq!(f.signaling.open_streams("abc123"), 0);
    assert!(!f.manager.is_active().await);

    let mut saw_audio = false;
    while let Ok(event) = f.events.try_recv() {
        assert!(!matches!(event, SessionEvent::MediaReady { .. }));
        if let SessionEvent::Track { track, .. } = event {
            saw_audio |= !track.is_video();
        }
    }
    assert!(saw_audio);

    // rollback already deleted; nothing left to do
    f.manager.disconnect().await;
    assert_eq!(f.signaling.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_negotiation_timeout() {
    let signaling = Arc::new(ScriptedSignaling::new());
    let peers = Arc::new(ScriptedPeerFactory::with_script(PeerScript::audio_only()));
    let (tx, _events) = mpsc::unbounded_channel();
    let manager = SessionManager::new(
        SessionDeps::from_signaling(signaling, peers),
        &SignalingConfig::default().with_negotiation_timeout(Duration::from_secs(5)),
        tx,
    );

    let started = Instant::now();
    let err = manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NegotiationTimeout(d) if d == Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test]
async fn test_registry_error_then_safe_disconnect() {
    let f = fixture(PeerScript::default());
    f.signaling
        .script(|s| s.create_error = Some("HTTP 500 Internal Server Error".into()));

    let err = f
        .manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionCreate(_)));
    assert!(err.is_fatal());

    assert!(f.peers.last_peer().unwrap().is_closed());
    assert!(f.signaling.subscriptions().is_empty());
    assert!(f.signaling.deleted().is_empty());

    f.manager.disconnect().await;
    assert!(f.signaling.deleted().is_empty());
    assert!(!f.manager.is_active().await);
}

#[tokio::test]
async fn test_mid_stream_failure_is_reported_not_renegotiated() {
    let mut f = fixture(PeerScript::default());
    f.manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();

    let peer = f.peers.last_peer().unwrap();
    peer.emit(TransportEvent::StateChange(ConnectionState::Failed));

    loop {
        match f.events.recv().await {
            Some(SessionEvent::Failed { session_id, error }) => {
                assert_eq!(session_id, "abc123");
                assert!(matches!(
                    error,
                    SessionError::ConnectionFailure(ConnectionState::Failed)
                ));
                break;
            }
            Some(_) => continue,
            None => panic!("event channel closed"),
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.signaling.create_requests().len(), 1);
    assert_eq!(f.peers.peers().len(), 1);
    assert_eq!(f.signaling.config_fetches(), 1);

    f.manager.disconnect().await;
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_registry_call() {
    let f = fixture(PeerScript::default());
    f.signaling
        .script(|s| s.create_delay = Some(Duration::from_secs(5)));

    let (result, ()) = tokio::join!(
        f.manager.create_session("Seestar-S50", StreamKind::Live),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            f.manager.disconnect().await;
        }
    );

    assert!(matches!(result, Err(SessionError::Cancelled)));
    // the registry answered after cancellation, so its session is removed
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
    assert!(f.peers.last_peer().unwrap().is_closed());
    assert!(f.signaling.subscriptions().is_empty());
    assert!(!f.manager.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_media_wait() {
    let f = fixture(PeerScript::audio_only());
    let started = Instant::now();

    let (result, ()) = tokio::join!(
        f.manager.create_session("Seestar-S50", StreamKind::Live),
        async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            f.manager.disconnect().await;
        }
    );

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(f.peers.last_peer().unwrap().is_closed());
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_create_supersedes_pending_one() {
    let f = fixture(PeerScript::default());
    f.signaling
        .script(|s| s.create_delay = Some(Duration::from_secs(5)));

    let (first, second) = tokio::join!(
        f.manager.create_session("Seestar-S50", StreamKind::Live),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            f.manager.create_session("Seestar-S50", StreamKind::Stacked).await
        }
    );

    assert!(matches!(first, Err(SessionError::Cancelled)));
    assert_eq!(second.unwrap().session_id(), "session-2");
    assert_eq!(f.signaling.deleted(), vec!["abc123".to_string()]);
    let active = f.manager.active_session().await.unwrap();
    assert_eq!(active.stream_kind, StreamKind::Stacked);
}

#[tokio::test(start_paused = true)]
async fn test_lost_candidate_stream_keeps_session() {
    let mut f = fixture(PeerScript::default());
    f.signaling.script(|s| s.subscribe_failures = u32::MAX);

    f.manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();

    loop {
        match f.events.recv().await {
            Some(SessionEvent::CandidateStreamLost { session_id, error }) => {
                assert_eq!(session_id, "abc123");
                assert!(!error.is_fatal());
                break;
            }
            Some(_) => continue,
            None => panic!("event channel closed"),
        }
    }
    assert!(f.manager.is_active().await);
    assert!(!f.peers.last_peer().unwrap().is_closed());
}
