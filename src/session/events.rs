use crate::error::SessionError;
use crate::peer::types::{ConnectionState, MediaTrack};
use tokio::sync::mpsc;
use tracing::debug;

/// What the lifecycle manager reports to its owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Registry accepted the offer; negotiation continues under this id.
    Negotiating { session_id: String },
    StateChanged { session_id: String, state: ConnectionState },
    Track { session_id: String, track: MediaTrack },
    MediaReady { session_id: String },
    /// Connection dropped to `disconnected`; the primitive may still recover.
    Interrupted { session_id: String },
    /// Back to `connected` after an interruption.
    Recovered { session_id: String },
    /// Inbound candidate subscription given up. The session is kept.
    CandidateStreamLost { session_id: String, error: SessionError },
    /// Terminal failure after setup. The manager does not renegotiate.
    Failed { session_id: String, error: SessionError },
    /// Session torn down locally.
    Closed { session_id: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Negotiating { session_id }
            | SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::Track { session_id, .. }
            | SessionEvent::MediaReady { session_id }
            | SessionEvent::Interrupted { session_id }
            | SessionEvent::Recovered { session_id }
            | SessionEvent::CandidateStreamLost { session_id, .. }
            | SessionEvent::Failed { session_id, .. }
            | SessionEvent::Closed { session_id } => session_id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SessionEvent::Negotiating { .. } => "negotiating",
            SessionEvent::StateChanged { .. } => "state-changed",
            SessionEvent::Track { .. } => "track",
            SessionEvent::MediaReady { .. } => "media-ready",
            SessionEvent::Interrupted { .. } => "interrupted",
            SessionEvent::Recovered { .. } => "recovered",
            SessionEvent::CandidateStreamLost { .. } => "candidate-stream-lost",
            SessionEvent::Failed { .. } => "failed",
            SessionEvent::Closed { .. } => "closed",
        }
    }
}

/// Delivers [`SessionEvent`]s; a dropped receiver is not an error.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!(session_id = %event.session_id(), "emit {}", event.name());
        if self.tx.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}
