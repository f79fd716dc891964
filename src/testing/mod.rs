//! Scripted in-memory collaborators.
//!
//! [`ScriptedSignaling`] stands in for the signaling server and
//! [`ScriptedPeerFactory`] for the peer-connection primitive. Both record
//! every call so tests can assert on what the manager did.

use crate::error::{Result, SessionError};
use crate::peer::transport::{PeerTransport, PeerTransportFactory, TransportEvent};
use crate::peer::types::{
    ConnectionState, IceCandidate, MediaTrack, RelayConfig, RelayServer, SdpKind, SessionDescription,
};
use crate::session::Session;
use crate::signaling::{
    CandidateMessage, CandidateStream, CandidateTransport, ConfigProvider, CreateSessionRequest,
    CreateSessionResponse, SessionRegistry,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

const OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:0\r\na=recvonly\r\n";
const ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:0\r\na=sendonly\r\n";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Events a [`ScriptedPeer`] emits on its own.
#[derive(Debug, Clone)]
pub struct PeerScript {
    /// Emitted right after the offer is created.
    pub on_offer: Vec<TransportEvent>,
    /// Emitted right after the remote answer is set.
    pub on_answer: Vec<TransportEvent>,
    /// Makes the factory refuse to build the peer.
    pub create_error: Option<String>,
}

impl Default for PeerScript {
    /// One host candidate, then `connecting`, a video track and `connected`.
    fn default() -> Self {
        Self {
            on_offer: vec![
                TransportEvent::LocalCandidate(IceCandidate::new(
                    "candidate:1 1 udp 2122260223 192.168.1.20 50000 typ host",
                )),
                TransportEvent::GatheringComplete,
            ],
            on_answer: vec![
                TransportEvent::StateChange(ConnectionState::Connecting),
                TransportEvent::Track(MediaTrack::video("telescope-video")),
                TransportEvent::StateChange(ConnectionState::Connected),
            ],
            create_error: None,
        }
    }
}

impl PeerScript {
    /// Emits nothing; the test drives every event through [`ScriptedPeer::emit`].
    pub fn silent() -> Self {
        Self {
            on_offer: Vec::new(),
            on_answer: Vec::new(),
            create_error: None,
        }
    }

    /// Connects but only ever delivers an audio track.
    pub fn audio_only() -> Self {
        Self {
            on_answer: vec![
                TransportEvent::StateChange(ConnectionState::Connecting),
                TransportEvent::Track(MediaTrack::audio("telescope-audio")),
                TransportEvent::StateChange(ConnectionState::Connected),
            ],
            ..Self::default()
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            create_error: Some(reason.into()),
            ..Self::silent()
        }
    }
}

#[derive(Default)]
struct PeerRecord {
    offers: usize,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    closes: usize,
    state: Option<ConnectionState>,
}

/// In-memory peer connection that follows a [`PeerScript`].
pub struct ScriptedPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    script: PeerScript,
    record: Mutex<PeerRecord>,
}

impl ScriptedPeer {
    fn new(script: PeerScript, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            script,
            record: Mutex::new(PeerRecord::default()),
        }
    }

    /// Pushes an event as if the primitive raised it.
    pub fn emit(&self, event: TransportEvent) {
        if let TransportEvent::StateChange(state) = &event {
            lock(&self.record).state = Some(*state);
        }
        let _ = self.events.send(event);
    }

    pub fn offer_count(&self) -> usize {
        lock(&self.record).offers
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.record).remote.clone()
    }

    /// Candidates accepted by `add_ice_candidate`, in call order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.record).applied.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.record).closes
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

#[async_trait]
impl PeerTransport for ScriptedPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        lock(&self.record).offers += 1;
        for event in &self.script.on_offer {
            self.emit(event.clone());
        }
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            return Err(SessionError::Transport("expected an answer".to_string()));
        }
        lock(&self.record).remote = Some(answer);
        for event in &self.script.on_answer {
            self.emit(event.clone());
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut record = lock(&self.record);
        if record.remote.is_none() {
            return Err(SessionError::Transport("remote description not set".to_string()));
        }
        if candidate.candidate.contains("malformed") {
            return Err(SessionError::Transport(format!(
                "unparseable candidate {:?}",
                candidate.candidate
            )));
        }
        record.applied.push(candidate);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        lock(&self.record).state.unwrap_or(ConnectionState::New)
    }

    async fn close(&self) -> Result<()> {
        lock(&self.record).closes += 1;
        self.emit(TransportEvent::StateChange(ConnectionState::Closed));
        Ok(())
    }
}

/// Hands out [`ScriptedPeer`]s and keeps every one it built.
pub struct ScriptedPeerFactory {
    script: Mutex<PeerScript>,
    peers: Mutex<Vec<Arc<ScriptedPeer>>>,
}

impl Default for ScriptedPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPeerFactory {
    pub fn new() -> Self {
        Self::with_script(PeerScript::default())
    }

    pub fn with_script(script: PeerScript) -> Self {
        Self {
            script: Mutex::new(script),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Script for peers built from now on.
    pub fn set_script(&self, script: PeerScript) {
        *lock(&self.script) = script;
    }

    pub fn peers(&self) -> Vec<Arc<ScriptedPeer>> {
        lock(&self.peers).clone()
    }

    pub fn last_peer(&self) -> Option<Arc<ScriptedPeer>> {
        lock(&self.peers).last().cloned()
    }
}

#[async_trait]
impl PeerTransportFactory for ScriptedPeerFactory {
    async fn create(
        &self,
        _relay: &RelayConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let script = lock(&self.script).clone();
        if let Some(reason) = &script.create_error {
            return Err(SessionError::Transport(reason.clone()));
        }
        let peer = Arc::new(ScriptedPeer::new(script, events));
        lock(&self.peers).push(peer.clone());
        Ok(peer)
    }
}

/// Behaviour of a [`ScriptedSignaling`] server.
#[derive(Debug, Clone)]
pub struct SignalingScript {
    pub relay: RelayConfig,
    pub config_error: Option<String>,
    pub create_error: Option<String>,
    /// Held before `create_session` answers.
    pub create_delay: Option<Duration>,
    /// Ids handed out in order; afterwards `session-N`.
    pub session_ids: VecDeque<String>,
    pub answer: SessionDescription,
    /// Replayed at the start of every subscription.
    pub inbound: Vec<CandidateMessage>,
    /// Number of upcoming subscribe calls that fail.
    pub subscribe_failures: u32,
    /// Number of upcoming candidate posts that fail.
    pub send_failures: u32,
    pub delete_error: Option<String>,
}

impl Default for SignalingScript {
    fn default() -> Self {
        Self {
            relay: RelayConfig::new(vec![RelayServer::stun("stun:stun.l.google.com:19302")]),
            config_error: None,
            create_error: None,
            create_delay: None,
            session_ids: VecDeque::from(vec!["abc123".to_string()]),
            answer: SessionDescription::answer(ANSWER_SDP),
            inbound: Vec::new(),
            subscribe_failures: 0,
            send_failures: 0,
            delete_error: None,
        }
    }
}

#[derive(Default)]
struct SignalingRecord {
    created: Vec<CreateSessionRequest>,
    deleted: Vec<String>,
    sent: Vec<(String, IceCandidate)>,
    send_attempts: usize,
    subscriptions: Vec<String>,
    sessions: Vec<Session>,
    streams: Vec<(String, mpsc::UnboundedSender<Result<CandidateMessage>>)>,
    issued: usize,
}

/// In-memory signaling server implementing every signaling trait.
#[derive(Default)]
pub struct ScriptedSignaling {
    script: Mutex<SignalingScript>,
    record: Mutex<SignalingRecord>,
    config_fetches: AtomicUsize,
}

impl ScriptedSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the script in place.
    pub fn script(&self, edit: impl FnOnce(&mut SignalingScript)) {
        edit(&mut lock(&self.script));
    }

    /// Pushes a message to every open subscription for `session_id`.
    pub fn push(&self, session_id: &str, message: CandidateMessage) {
        let record = lock(&self.record);
        for (id, tx) in record.streams.iter() {
            if id == session_id {
                let _ = tx.send(Ok(message.clone()));
            }
        }
    }

    /// Ends every open subscription as if the server hung up.
    pub fn drop_streams(&self) {
        lock(&self.record).streams.clear();
    }

    /// Number of open subscriptions whose consumer is still attached.
    pub fn open_streams(&self, session_id: &str) -> usize {
        lock(&self.record)
            .streams
            .iter()
            .filter(|(id, tx)| id == session_id && !tx.is_closed())
            .count()
    }

    pub fn config_fetches(&self) -> usize {
        self.config_fetches.load(Ordering::SeqCst)
    }

    pub fn create_requests(&self) -> Vec<CreateSessionRequest> {
        lock(&self.record).created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.record).deleted.clone()
    }

    pub fn sent_candidates(&self) -> Vec<(String, IceCandidate)> {
        lock(&self.record).sent.clone()
    }

    pub fn send_attempts(&self) -> usize {
        lock(&self.record).send_attempts
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.record).subscriptions.clone()
    }
}

#[async_trait]
impl ConfigProvider for ScriptedSignaling {
    async fn get_config(&self) -> Result<RelayConfig> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);
        let script = lock(&self.script);
        match &script.config_error {
            Some(reason) => Err(SessionError::ConfigFetch(reason.clone())),
            None => Ok(script.relay.clone()),
        }
    }
}

#[async_trait]
impl SessionRegistry for ScriptedSignaling {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        lock(&self.record).created.push(request.clone());

        let delay = lock(&self.script).create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (error, next_id, answer) = {
            let mut script = lock(&self.script);
            (script.create_error.clone(), script.session_ids.pop_front(), script.answer.clone())
        };
        if let Some(reason) = error {
            return Err(SessionError::SessionCreate(reason));
        }

        let mut record = lock(&self.record);
        record.issued += 1;
        let session_id = next_id.unwrap_or_else(|| format!("session-{}", record.issued));
        let mut session = Session::new(session_id.clone(), request.target_name.clone(), request.stream_kind);
        session.state = Some("active".to_string());
        record.sessions.push(session);

        Ok(CreateSessionResponse { session_id, answer })
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        lock(&self.record)
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| SessionError::Registry(format!("HTTP 404 Not Found: {}", session_id)))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(lock(&self.record).sessions.clone())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let error = lock(&self.script).delete_error.clone();
        let mut record = lock(&self.record);
        record.deleted.push(session_id.to_string());
        if let Some(reason) = error {
            return Err(SessionError::Registry(reason));
        }
        record.sessions.retain(|s| s.session_id != session_id);
        record.streams.retain(|(id, _)| id != session_id);
        Ok(())
    }
}

#[async_trait]
impl CandidateTransport for ScriptedSignaling {
    async fn send_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        let failing = {
            let mut script = lock(&self.script);
            if script.send_failures > 0 {
                script.send_failures -= 1;
                true
            } else {
                false
            }
        };

        let mut record = lock(&self.record);
        record.send_attempts += 1;
        if failing {
            return Err(SessionError::CandidateSend("HTTP 502 Bad Gateway".to_string()));
        }
        record.sent.push((session_id.to_string(), candidate.clone()));
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<CandidateStream> {
        let (failing, inbound) = {
            let mut script = lock(&self.script);
            if script.subscribe_failures > 0 {
                script.subscribe_failures -= 1;
                (true, Vec::new())
            } else {
                (false, script.inbound.clone())
            }
        };

        let mut record = lock(&self.record);
        record.subscriptions.push(session_id.to_string());
        if failing {
            return Err(SessionError::CandidateStream("HTTP 503 Service Unavailable".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for message in inbound {
            let _ = tx.send(Ok(message));
        }
        record.streams.push((session_id.to_string(), tx));

        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
    }
}
