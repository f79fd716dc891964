use crate::peer::types::ConnectionState;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Everything that can go wrong while negotiating or holding a video session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Relay configuration endpoint unreachable or non-2xx.
    #[error("failed to fetch relay configuration: {0}")]
    ConfigFetch(String),

    /// Registry rejected the offer.
    #[error("session registry rejected the offer: {0}")]
    SessionCreate(String),

    /// Description exchange driven out of order (answer before offer, duplicate offer).
    #[error("negotiation order violated: {0}")]
    NegotiationOrder(String),

    /// One outbound candidate was lost. Never fatal.
    #[error("failed to send ICE candidate: {0}")]
    CandidateSend(String),

    /// The inbound candidate subscription was lost. Never fatal on its own.
    #[error("ICE candidate stream lost: {0}")]
    CandidateStream(String),

    /// The peer connection reached a terminal state.
    #[error("peer connection {0}")]
    ConnectionFailure(ConnectionState),

    #[error("no inbound video track within {0:?}")]
    NegotiationTimeout(Duration),

    /// Negotiation abandoned by `disconnect` or superseded by a newer attempt.
    #[error("negotiation cancelled")]
    Cancelled,

    /// The peer-connection primitive refused an operation.
    #[error("peer transport error: {0}")]
    Transport(String),

    /// Diagnostic registry query or deletion failed.
    #[error("session registry error: {0}")]
    Registry(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Non-fatal errors are logged and the session carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::CandidateSend(_) | SessionError::CandidateStream(_)
        )
    }
}

impl From<webrtc::Error> for SessionError {
    fn from(e: webrtc::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_errors_are_not_fatal() {
        assert!(!SessionError::CandidateSend("dropped".into()).is_fatal());
        assert!(!SessionError::CandidateStream("eof".into()).is_fatal());
        assert!(SessionError::ConnectionFailure(ConnectionState::Failed).is_fatal());
        assert!(SessionError::NegotiationTimeout(Duration::from_secs(30)).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = SessionError::ConnectionFailure(ConnectionState::Failed);
        assert_eq!(err.to_string(), "peer connection failed");
        let err = SessionError::NegotiationTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "no inbound video track within 30s");
    }
}
