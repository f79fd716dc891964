use crate::candidate::{CandidateChannel, CandidateSender, ChannelEvent};
use crate::config::{RetryPolicy, SignalingConfig};
use crate::error::{Result, SessionError};
use crate::peer::connection::RtcTransportFactory;
use crate::peer::controller::{PeerConnectionController, PeerEvent};
use crate::peer::transport::PeerTransportFactory;
use crate::peer::types::{ConnectionState, IceCandidate, MediaStreamHandle};
use crate::session::events::{EventEmitter, SessionEvent};
use crate::session::{Session, StreamKind};
use crate::signaling::{
    CandidateTransport, ConfigProvider, CreateSessionRequest, SessionRegistry, SignalingClient,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The collaborators a [`SessionManager`] drives.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<dyn ConfigProvider>,
    pub registry: Arc<dyn SessionRegistry>,
    pub candidates: Arc<dyn CandidateTransport>,
    pub peers: Arc<dyn PeerTransportFactory>,
}

impl SessionDeps {
    /// One signaling backend for all three signaling roles.
    pub fn from_signaling<S>(signaling: Arc<S>, peers: Arc<dyn PeerTransportFactory>) -> Self
    where
        S: ConfigProvider + SessionRegistry + CandidateTransport + 'static,
    {
        Self {
            config: signaling.clone(),
            registry: signaling.clone(),
            candidates: signaling,
            peers,
        }
    }

    /// HTTP signaling plus webrtc-rs peer connections.
    pub fn http(client: SignalingClient) -> Self {
        Self::from_signaling(Arc::new(client), Arc::new(RtcTransportFactory::new()))
    }
}

/// Everything one negotiation attempt acquired, released by [`SessionManager::teardown`].
#[derive(Default)]
struct SessionParts {
    session_id: Option<String>,
    controller: Option<Arc<PeerConnectionController>>,
    channel: Option<CandidateChannel>,
    tasks: Vec<JoinHandle<()>>,
    live: Arc<AtomicBool>,
}

struct ActiveSession {
    session: Session,
    stream: MediaStreamHandle,
    parts: SessionParts,
}

/// Owns at most one telescope video session at a time.
///
/// `create_session` runs the whole negotiation; `disconnect` cancels a
/// pending one or tears down the active one. Progress after setup
/// arrives as [`SessionEvent`]s on the channel passed at construction.
pub struct SessionManager {
    deps: SessionDeps,
    negotiation_timeout: Duration,
    retry: RetryPolicy,
    events: EventEmitter,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    negotiation: tokio::sync::Mutex<()>,
    attempt: Mutex<CancellationToken>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, config: &SignalingConfig, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            deps,
            negotiation_timeout: config.negotiation_timeout,
            retry: config.retry.clone(),
            events: EventEmitter::new(events),
            active: tokio::sync::Mutex::new(None),
            negotiation: tokio::sync::Mutex::new(()),
            attempt: Mutex::new(CancellationToken::new()),
        }
    }

    /// Manager backed by the HTTP signaling server at `config.base_url`.
    pub fn connect_http(config: &SignalingConfig, events: mpsc::UnboundedSender<SessionEvent>) -> Result<Self> {
        let client = SignalingClient::new(config)?;
        Ok(Self::new(SessionDeps::http(client), config, events))
    }

    /// Negotiates a new session for `target_name`, replacing any current one.
    ///
    /// Resolves once the first inbound video track arrives. On failure
    /// everything acquired so far is released before the error returns.
    /// A concurrent `disconnect` or a newer `create_session` makes this
    /// one fail with [`SessionError::Cancelled`].
    pub async fn create_session(&self, target_name: &str, stream_kind: StreamKind) -> Result<MediaStreamHandle> {
        let token = self.begin_attempt();
        let started = Instant::now();

        let _negotiating = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SessionError::Cancelled),
            guard = self.negotiation.lock() => guard,
        };

        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            info!(session_id = %previous.session.session_id, "Replacing active session");
            self.teardown(previous.parts).await;
        }

        info!(target = %target_name, kind = %stream_kind, "Creating session");
        let mut parts = SessionParts::default();
        let deadline = started + self.negotiation_timeout;

        match self
            .negotiate(target_name, stream_kind, &token, deadline, &mut parts)
            .await
        {
            Ok((session, stream)) => {
                parts.live.store(true, Ordering::SeqCst);
                info!(session_id = %session.session_id, "Session established");
                *self.active.lock().await = Some(ActiveSession {
                    session,
                    stream: stream.clone(),
                    parts,
                });
                Ok(stream)
            }
            Err(e) => {
                match &e {
                    SessionError::Cancelled => info!(target = %target_name, "Session negotiation cancelled"),
                    other => error!(target = %target_name, "Session negotiation failed: {}", other),
                }
                self.teardown(parts).await;
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        target_name: &str,
        stream_kind: StreamKind,
        token: &CancellationToken,
        deadline: Instant,
        parts: &mut SessionParts,
    ) -> Result<(Session, MediaStreamHandle)> {
        let relay = cancellable(token, self.deps.config.get_config()).await?;
        debug!(servers = relay.ice_servers.len(), "Fetched relay configuration");

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(
            cancellable(
                token,
                PeerConnectionController::new(self.deps.peers.as_ref(), &relay, peer_tx),
            )
            .await?,
        );
        parts.controller = Some(controller.clone());
        let offer = cancellable(token, controller.create_offer()).await?;

        // Not raced against cancellation: once the registry may have
        // created the session, its id is needed to delete it again.
        let request = CreateSessionRequest {
            target_name: target_name.to_string(),
            offer,
            stream_kind,
        };
        let created = self.deps.registry.create_session(&request).await?;
        let session_id = created.session_id.clone();
        parts.session_id = Some(session_id.clone());
        if token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.events.emit(SessionEvent::Negotiating {
            session_id: session_id.clone(),
        });

        let mut channel = CandidateChannel::new(session_id.clone(), self.deps.candidates.clone(), self.retry.clone());
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        parts.tasks = SessionPump {
            session_id: session_id.clone(),
            controller: controller.clone(),
            events: self.events.clone(),
            live: parts.live.clone(),
            interrupted: false,
            failed: false,
        }
        .spawn(peer_rx, channel_rx, channel.sender());

        cancellable(token, controller.apply_remote_answer(created.answer)).await?;

        channel.start(channel_tx);
        parts.channel = Some(channel);

        debug!(session_id = %session_id, "Waiting for inbound video");
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SessionError::Cancelled),
            waited = tokio::time::timeout_at(deadline, controller.wait_media_ready()) => match waited {
                Ok(result) => result?,
                Err(_) => {
                    warn!(session_id = %session_id, "No inbound video within {:?}", self.negotiation_timeout);
                    return Err(SessionError::NegotiationTimeout(self.negotiation_timeout));
                }
            },
        }

        let session = Session::new(session_id.clone(), target_name, stream_kind);
        Ok((session, controller.media_stream(&session_id)))
    }

    /// Tears down the active session and cancels a pending negotiation.
    ///
    /// Idempotent and infallible; registry deletion is best effort.
    pub async fn disconnect(&self) {
        lock(&self.attempt).cancel();

        let _negotiating = self.negotiation.lock().await;
        let active = self.active.lock().await.take();
        match active {
            Some(active) => {
                info!(session_id = %active.session.session_id, "Disconnecting session");
                self.teardown(active.parts).await;
            }
            None => debug!("Disconnect with no active session"),
        }
    }

    /// Shared release path for `disconnect`, replacement and failed setup.
    async fn teardown(&self, mut parts: SessionParts) {
        if let Some(mut channel) = parts.channel.take() {
            channel.stop();
        }
        for task in parts.tasks.drain(..) {
            task.abort();
        }
        if let Some(controller) = parts.controller.take() {
            controller.close().await;
        }
        if let Some(session_id) = parts.session_id.take() {
            if let Err(e) = self.deps.registry.delete_session(&session_id).await {
                warn!(session_id = %session_id, "Failed to delete session: {}", e);
            }
            self.events.emit(SessionEvent::Closed { session_id });
        }
    }

    fn begin_attempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *lock(&self.attempt), token.clone());
        previous.cancel();
        token
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.deps.registry.get_session(session_id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.deps.registry.list_sessions().await
    }

    /// The locally held session, if one is established.
    pub async fn active_session(&self) -> Option<Session> {
        self.active.lock().await.as_ref().map(|a| a.session.clone())
    }

    pub async fn media_stream(&self) -> Option<MediaStreamHandle> {
        self.active.lock().await.as_ref().map(|a| a.stream.clone())
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        lock(&self.attempt).cancel();
        if let Some(active) = self.active.get_mut().take() {
            for task in active.parts.tasks.iter() {
                task.abort();
            }
            active.stream.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn cancellable<T>(token: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SessionError::Cancelled),
        result = fut => result,
    }
}

/// Routes one session's peer and candidate traffic.
struct SessionPump {
    session_id: String,
    controller: Arc<PeerConnectionController>,
    events: EventEmitter,
    live: Arc<AtomicBool>,
    interrupted: bool,
    failed: bool,
}

impl SessionPump {
    fn spawn(
        self,
        peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        sender: CandidateSender,
    ) -> Vec<JoinHandle<()>> {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<IceCandidate>();
        // sequential so the server sees candidates in gathering order
        let outbound = tokio::spawn(async move {
            while let Some(candidate) = outbound_rx.recv().await {
                let _ = sender.send(&candidate).await;
            }
        });
        let pump = tokio::spawn(self.run(peer_rx, channel_rx, outbound_tx));
        vec![pump, outbound]
    }

    async fn run(
        mut self,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        outbound: mpsc::UnboundedSender<IceCandidate>,
    ) {
        let mut channel_open = true;
        loop {
            tokio::select! {
                event = peer_rx.recv() => match event {
                    Some(event) => self.on_peer_event(event, &outbound),
                    None => break,
                },
                event = channel_rx.recv(), if channel_open => match event {
                    Some(event) => self.on_channel_event(event).await,
                    None => channel_open = false,
                },
            }
        }
        debug!(session_id = %self.session_id, "Session pump finished");
    }

    fn on_peer_event(&mut self, event: PeerEvent, outbound: &mpsc::UnboundedSender<IceCandidate>) {
        let session_id = self.session_id.clone();
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let _ = outbound.send(candidate);
            }
            PeerEvent::Track(track) => self.events.emit(SessionEvent::Track { session_id, track }),
            PeerEvent::MediaReady(_) => self.events.emit(SessionEvent::MediaReady { session_id }),
            PeerEvent::StateChange(state) => {
                info!(session_id = %session_id, %state, "Connection state changed");
                self.events.emit(SessionEvent::StateChanged {
                    session_id: session_id.clone(),
                    state,
                });
                match state {
                    ConnectionState::Disconnected if !self.interrupted => {
                        self.interrupted = true;
                        warn!(session_id = %session_id, "Connection interrupted");
                        self.events.emit(SessionEvent::Interrupted { session_id });
                    }
                    ConnectionState::Connected if self.interrupted => {
                        self.interrupted = false;
                        info!(session_id = %session_id, "Connection recovered");
                        self.events.emit(SessionEvent::Recovered { session_id });
                    }
                    _ => {}
                }
            }
            PeerEvent::Error(e) => {
                if !self.live.load(Ordering::SeqCst) {
                    // create_session reports it
                    debug!(session_id = %session_id, "Peer error during negotiation: {}", e);
                } else if !self.failed {
                    self.failed = true;
                    error!(session_id = %session_id, "Session failed: {}", e);
                    self.events.emit(SessionEvent::Failed { session_id, error: e });
                }
            }
        }
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Remote(candidate) => {
                self.controller.add_remote_candidate(candidate).await;
            }
            ChannelEvent::StreamLost(error) => {
                self.events.emit(SessionEvent::CandidateStreamLost {
                    session_id: self.session_id.clone(),
                    error,
                });
            }
        }
    }
}
