use crate::error::{Result, SessionError};
use crate::peer::ice::{analyze_candidates, PendingCandidates};
use crate::peer::state::{NegotiationPhase, Readiness};
use crate::peer::transport::{PeerTransport, PeerTransportFactory, TransportEvent};
use crate::peer::types::{
    ConnectionState, IceCandidate, MediaStreamHandle, MediaTrack, RelayConfig, SdpKind, SessionDescription,
};
use crate::utils::random_id;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notifications from one peer connection, in the order they happened.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    Track(MediaTrack),
    StateChange(ConnectionState),
    /// The first inbound video track; fires at most once.
    MediaReady(MediaTrack),
    /// Terminal failure of this peer connection.
    Error(SessionError),
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct ControllerStats {
    pub id: String,
    pub phase: NegotiationPhase,
    pub state: ConnectionState,
    pub tracks: usize,
    pub video_tracks: usize,
    pub local_candidates: usize,
    pub pending_remote_candidates: usize,
}

struct Negotiation {
    phase: NegotiationPhase,
    pending: PendingCandidates,
}

#[derive(Default)]
struct Observed {
    state: Option<ConnectionState>,
    tracks: Vec<MediaTrack>,
    local_candidates: Vec<IceCandidate>,
}

struct Shared {
    id: String,
    observed: Mutex<Observed>,
    readiness: watch::Sender<Readiness>,
    closed: AtomicBool,
}

/// Owns one peer connection and drives its offer/answer exchange.
pub struct PeerConnectionController {
    transport: Arc<dyn PeerTransport>,
    negotiation: tokio::sync::Mutex<Negotiation>,
    shared: Arc<Shared>,
    readiness: watch::Receiver<Readiness>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnectionController {
    /// Builds the peer connection for `relay`; its events go to `events`.
    pub async fn new(
        factory: &dyn PeerTransportFactory,
        relay: &RelayConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = factory.create(relay, transport_tx).await?;

        let (readiness_tx, readiness_rx) = watch::channel(Readiness::Pending);
        let shared = Arc::new(Shared {
            id: random_id(),
            observed: Mutex::new(Observed::default()),
            readiness: readiness_tx,
            closed: AtomicBool::new(false),
        });
        debug!(peer = %shared.id, relays = relay.ice_servers.len(), "Peer connection created");

        let pump = tokio::spawn(pump_events(transport_rx, shared.clone(), events));

        Ok(Self {
            transport,
            negotiation: tokio::sync::Mutex::new(Negotiation {
                phase: NegotiationPhase::Idle,
                pending: PendingCandidates::default(),
            }),
            shared,
            readiness: readiness_rx,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Creates the receive-only video offer and sets it locally.
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let mut negotiation = self.negotiation.lock().await;
        let next = negotiation.phase.begin_offer()?;

        info!(peer = %self.shared.id, "Creating SDP offer");
        let offer = self.transport.create_offer().await?;
        negotiation.phase = next;
        Ok(offer)
    }

    /// Sets the registry's answer, then flushes candidates that arrived early.
    pub async fn apply_remote_answer(&self, answer: SessionDescription) -> Result<()> {
        if answer.kind != SdpKind::Answer {
            return Err(SessionError::NegotiationOrder(
                "remote description must be an answer".to_string(),
            ));
        }

        let mut negotiation = self.negotiation.lock().await;
        let next = negotiation.phase.accept_answer()?;

        info!(peer = %self.shared.id, "Setting remote description");
        self.transport.set_remote_description(answer).await?;
        negotiation.phase = next;

        let pending = negotiation.pending.drain();
        if !pending.is_empty() {
            debug!(peer = %self.shared.id, count = pending.len(), "Applying queued remote candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
        Ok(())
    }

    /// Applies a trickled candidate, or queues it until the answer is set.
    ///
    /// A rejected candidate is logged and reported as `false`; the
    /// connection carries on with the others.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> bool {
        let mut negotiation = self.negotiation.lock().await;
        if negotiation.phase.accepts_candidates() {
            return self.apply_candidate(candidate).await;
        }
        if negotiation.phase == NegotiationPhase::Closed {
            debug!(peer = %self.shared.id, "Dropping remote candidate for closed peer connection");
            return false;
        }
        debug!(peer = %self.shared.id, "Remote description not set yet, queuing candidate");
        negotiation.pending.push(candidate);
        true
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> bool {
        match self.transport.add_ice_candidate(candidate.clone()).await {
            Ok(()) => {
                debug!(peer = %self.shared.id, "Successfully added ICE candidate");
                true
            }
            Err(e) => {
                warn!(peer = %self.shared.id, candidate = %candidate.candidate, "Failed to add ICE candidate: {}", e);
                false
            }
        }
    }

    /// Resolves once the first inbound video track arrived.
    ///
    /// Fails with `ConnectionFailure` if the connection terminates first.
    /// Carries no timeout of its own.
    pub async fn wait_media_ready(&self) -> Result<()> {
        let mut readiness = self.readiness.clone();
        loop {
            let current = *readiness.borrow_and_update();
            match current {
                Readiness::MediaReady => return Ok(()),
                Readiness::Terminated(state) => return Err(SessionError::ConnectionFailure(state)),
                Readiness::Pending => {}
            }
            if readiness.changed().await.is_err() {
                return Err(SessionError::ConnectionFailure(ConnectionState::Closed));
            }
        }
    }

    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        let observed = lock(&self.shared.observed);
        observed.state.unwrap_or_else(|| self.transport.connection_state())
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        lock(&self.shared.observed).tracks.clone()
    }

    pub fn media_stream(&self, session_id: &str) -> MediaStreamHandle {
        MediaStreamHandle::new(session_id, self.tracks())
    }

    pub fn local_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.shared.observed).local_candidates.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> ControllerStats {
        let negotiation = self.negotiation.lock().await;
        let observed = lock(&self.shared.observed);
        ControllerStats {
            id: self.shared.id.clone(),
            phase: negotiation.phase,
            state: observed.state.unwrap_or(ConnectionState::New),
            tracks: observed.tracks.len(),
            video_tracks: observed.tracks.iter().filter(|t| t.is_video()).count(),
            local_candidates: observed.local_candidates.len(),
            pending_remote_candidates: negotiation.pending.len(),
        }
    }

    /// Closes the peer connection and stops every track. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(peer = %self.shared.id, "Closing peer connection");

        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }

        {
            let mut negotiation = self.negotiation.lock().await;
            negotiation.phase = NegotiationPhase::Closed;
            negotiation.pending.clear();
        }

        for track in lock(&self.shared.observed).tracks.iter() {
            track.stop();
        }

        if let Err(e) = self.transport.close().await {
            warn!(peer = %self.shared.id, "Failed to close peer connection: {}", e);
        }
        lock(&self.shared.observed).state = Some(ConnectionState::Closed);
        self.shared
            .readiness
            .send_replace(Readiness::Terminated(ConnectionState::Closed));
    }
}

impl Drop for PeerConnectionController {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turns raw transport notifications into [`PeerEvent`]s and readiness updates.
async fn pump_events(
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    while let Some(event) = rx.recv().await {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                lock(&shared.observed).local_candidates.push(candidate.clone());
                let _ = events.send(PeerEvent::LocalCandidate(candidate));
            }
            TransportEvent::GatheringComplete => {
                let gathered = lock(&shared.observed).local_candidates.clone();
                debug!(peer = %shared.id, count = gathered.len(), "Local candidate gathering complete");
                analyze_candidates(&gathered);
            }
            TransportEvent::Track(track) => {
                lock(&shared.observed).tracks.push(track.clone());
                let _ = events.send(PeerEvent::Track(track.clone()));

                if track.is_video() && *shared.readiness.borrow() == Readiness::Pending {
                    info!(peer = %shared.id, track = %track.id(), "First inbound video track, media ready");
                    shared.readiness.send_replace(Readiness::MediaReady);
                    let _ = events.send(PeerEvent::MediaReady(track));
                } else if !track.is_video() {
                    debug!(peer = %shared.id, kind = ?track.kind(), "Non-video track accumulated");
                }
            }
            TransportEvent::StateChange(state) => {
                lock(&shared.observed).state = Some(state);
                let _ = events.send(PeerEvent::StateChange(state));

                if state.is_terminal() {
                    warn!(peer = %shared.id, %state, "Peer connection reached a terminal state");
                    shared.readiness.send_replace(Readiness::Terminated(state));
                    let _ = events.send(PeerEvent::Error(SessionError::ConnectionFailure(state)));
                }
            }
        }
    }
}
