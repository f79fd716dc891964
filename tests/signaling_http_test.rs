use futures::StreamExt;
use scope_rtc::config::SignalingConfig;
use scope_rtc::peer::{IceCandidate, SessionDescription};
use scope_rtc::session::{SessionDeps, SessionManager, StreamKind};
use scope_rtc::signaling::{
    CandidateMessage, CandidateTransport, ConfigProvider, CreateSessionRequest, SessionRegistry, SignalingClient,
};
use scope_rtc::testing::ScriptedPeerFactory;
use scope_rtc::SessionError;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PREFIX: &str = "/api/webrtc";

fn client(server: &MockServer) -> SignalingClient {
    SignalingClient::new(&SignalingConfig::new(format!("{}{}", server.uri(), PREFIX))).unwrap()
}

fn route(suffix: &str) -> String {
    format!("{PREFIX}{suffix}")
}

#[tokio::test]
async fn test_get_config_parses_ice_servers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route("/config")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "iceServers": [
                {"urls": "stun:stun.l.google.com:19302"},
                {"urls": ["turn:relay.scope.local:3478"], "username": "scope", "credential": "secret"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = client(&server).get_config().await.unwrap();
    assert_eq!(config.ice_servers.len(), 2);
    assert!(config.ice_servers[1].has_credentials());
}

#[tokio::test]
async fn test_get_config_failure_is_config_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route("/config")))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server).get_config().await.unwrap_err();
    match err {
        SessionError::ConfigFetch(msg) => {
            assert!(msg.contains("503"));
            assert!(msg.contains("maintenance"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_config_fetch_error() {
    let client = SignalingClient::new(&SignalingConfig::new("http://127.0.0.1:1/api/webrtc")).unwrap();
    assert!(matches!(client.get_config().await, Err(SessionError::ConfigFetch(_))));
}

#[tokio::test]
async fn test_create_session_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(route("/sessions")))
        .and(body_json(json!({
            "target_name": "Seestar-S50",
            "offer": {"sdp": "v=0", "type": "offer"},
            "stream_kind": "live"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "abc123",
            "answer": {"sdp": "v=0 answer", "type": "answer"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .create_session(&CreateSessionRequest {
            target_name: "Seestar-S50".into(),
            offer: SessionDescription::offer("v=0"),
            stream_kind: StreamKind::Live,
        })
        .await
        .unwrap();
    assert_eq!(response.session_id, "abc123");
    assert_eq!(response.answer, SessionDescription::answer("v=0 answer"));
}

#[tokio::test]
async fn test_create_session_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(route("/sessions")))
        .respond_with(ResponseTemplate::new(500).set_body_string("telescope offline"))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_session(&CreateSessionRequest {
            target_name: "Seestar-S50".into(),
            offer: SessionDescription::offer("v=0"),
            stream_kind: StreamKind::Stacked,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionCreate(ref msg) if msg.contains("500")));
}

#[tokio::test]
async fn test_send_candidate_body_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(route("/sessions/abc123/ice-candidates")))
        .and(body_json(json!({
            "candidate": "candidate:1 1 udp 2122260223 192.168.1.20 50000 typ host",
            "sdpMLineIndex": 0,
            "sdpMid": "0",
            "usernameFragment": null
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .send_candidate(
            "abc123",
            &IceCandidate::new("candidate:1 1 udp 2122260223 192.168.1.20 50000 typ host"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_candidate_failure_is_non_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(route("/sessions/abc123/ice-candidates")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server)
        .send_candidate("abc123", &IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CandidateSend(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_candidate_stream_parses_events() {
    let server = MockServer::start().await;
    let body = concat!(
        ": connected\n\n",
        "data: {\"type\":\"keepalive\"}\n\n",
        "data: {\"candidate\":\"candidate:1 1 udp 1 10.0.0.1 9 typ host\",\"sdpMLineIndex\":0,\"sdpMid\":\"0\"}\r\n\r\n",
        "data: not json\n\n",
        "event: candidate\n",
        "data: {\"candidate\":\"candidate:2 1 udp 1 10.0.0.2 9 typ host\",\"sdpMLineIndex\":0,\"sdpMid\":\"0\",\"usernameFragment\":\"ab\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path(route("/sessions/abc123/ice-candidates/stream")))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let stream = client(&server).subscribe("abc123").await.unwrap();
    let messages: Vec<CandidateMessage> = stream.map(|m| m.unwrap()).collect().await;

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], CandidateMessage::Keepalive);
    let second = messages[2].clone().into_candidate().unwrap();
    assert!(second.candidate.starts_with("candidate:2"));
    assert_eq!(second.username_fragment.as_deref(), Some("ab"));
}

#[tokio::test]
async fn test_subscribe_rejected_is_stream_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route("/sessions/gone/ice-candidates/stream")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server).subscribe("gone").await.err().unwrap();
    assert!(matches!(err, SessionError::CandidateStream(_)));
}

#[tokio::test]
async fn test_registry_diagnostics() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route("/sessions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"session_id": "abc123", "target_name": "Seestar-S50", "stream_kind": "live", "state": "active"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(route("/sessions/abc123")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(
            {"session_id": "abc123", "target_name": "Seestar-S50", "stream_kind": "live"}
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(route("/sessions/missing")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server);
    let sessions = client.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state.as_deref(), Some("active"));
    assert_eq!(client.get_session("abc123").await.unwrap().target_name, "Seestar-S50");
    assert!(matches!(client.get_session("missing").await, Err(SessionError::Registry(_))));
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(route("/sessions/abc123")))
        .and(header("authorization", "Bearer scope-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = SignalingConfig::new(format!("{}{}", server.uri(), PREFIX)).with_auth_token("scope-token");
    SignalingClient::new(&config)
        .unwrap()
        .delete_session("abc123")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_manager_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route("/config")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "iceServers": [{"urls": "stun:stun.l.google.com:19302"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(route("/sessions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "abc123",
            "answer": {"sdp": "v=0", "type": "answer"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(route("/sessions/abc123/ice-candidates")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(route("/sessions/abc123/ice-candidates/stream")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"candidate\":\"candidate:7 1 udp 1 10.0.0.7 9 typ host\",\"sdpMLineIndex\":0,\"sdpMid\":\"0\"}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(route("/sessions/abc123")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let peers = Arc::new(ScriptedPeerFactory::new());
    let (tx, _events) = mpsc::unbounded_channel();
    let manager = SessionManager::new(
        SessionDeps::from_signaling(Arc::new(client(&server)), peers.clone()),
        &SignalingConfig::default(),
        tx,
    );

    let stream = manager
        .create_session("Seestar-S50", StreamKind::Live)
        .await
        .unwrap();
    assert_eq!(stream.session_id(), "abc123");

    let peer = peers.last_peer().unwrap();
    for _ in 0..200 {
        if !peer.applied_candidates().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(peer.applied_candidates()[0].candidate.starts_with("candidate:7"));

    manager.disconnect().await;
    manager.disconnect().await;
    assert!(peer.is_closed());

    let deletes = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .count();
    assert_eq!(deletes, 1);
}
