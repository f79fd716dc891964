//! Signaling collaborators: relay configuration, the session registry and
//! the trickle-ICE candidate exchange.
//!
//! Each concern is a trait so the lifecycle manager can be driven by the
//! HTTP client in [`http`] or by any other carrier (long-polling, a
//! native streaming client, a duplex socket).

pub mod cache;
pub mod http;
pub mod sse;

use crate::error::Result;
use crate::peer::types::{IceCandidate, RelayConfig, SessionDescription};
use crate::session::{Session, StreamKind};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use cache::CachingConfigProvider;
pub use http::SignalingClient;

/// Fetches relay/traversal servers for one negotiation attempt.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_config(&self) -> Result<RelayConfig>;
}

/// Remote registry that pairs an offer with a telescope camera session.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse>;

    async fn get_session(&self, session_id: &str) -> Result<Session>;

    async fn list_sessions(&self) -> Result<Vec<Session>>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

/// Server-pushed candidate messages for one session.
pub type CandidateStream = BoxStream<'static, Result<CandidateMessage>>;

/// Outbound candidate posts plus the inbound server-push subscription.
#[async_trait]
pub trait CandidateTransport: Send + Sync {
    async fn send_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()>;

    /// Opens the inbound stream. The stream ending means the subscription was lost.
    async fn subscribe(&self, session_id: &str) -> Result<CandidateStream>;
}

#[async_trait]
impl<T: ConfigProvider + ?Sized> ConfigProvider for Arc<T> {
    async fn get_config(&self) -> Result<RelayConfig> {
        (**self).get_config().await
    }
}

#[async_trait]
impl<T: SessionRegistry + ?Sized> SessionRegistry for Arc<T> {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        (**self).create_session(request).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        (**self).get_session(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        (**self).list_sessions().await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        (**self).delete_session(session_id).await
    }
}

#[async_trait]
impl<T: CandidateTransport + ?Sized> CandidateTransport for Arc<T> {
    async fn send_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        (**self).send_candidate(session_id, candidate).await
    }

    async fn subscribe(&self, session_id: &str) -> Result<CandidateStream> {
        (**self).subscribe(session_id).await
    }
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub target_name: String,
    pub offer: SessionDescription,
    pub stream_kind: StreamKind,
}

/// Reply to `POST /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub answer: SessionDescription,
}

/// One event on the inbound candidate stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateMessage {
    Candidate(IceCandidate),
    /// Connection-liveness marker, carries no candidate.
    Keepalive,
}

impl CandidateMessage {
    pub fn parse(data: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data)?;
        if value.get("type").and_then(|t| t.as_str()) == Some("keepalive") {
            return Ok(CandidateMessage::Keepalive);
        }
        serde_json::from_value(value).map(CandidateMessage::Candidate)
    }

    pub fn into_candidate(self) -> Option<IceCandidate> {
        match self {
            CandidateMessage::Candidate(candidate) => Some(candidate),
            CandidateMessage::Keepalive => None,
        }
    }
}
