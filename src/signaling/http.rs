//! HTTP signaling client
//!
//! Talks to the telescope's WebRTC signaling API:
//!
//! - `GET /config` relay servers
//! - `POST /sessions` offer in, session id + answer out
//! - `POST /sessions/{id}/ice-candidates` one outbound candidate
//! - `GET /sessions/{id}/ice-candidates/stream` server-sent events with remote candidates
//! - `GET /sessions`, `GET /sessions/{id}`, `DELETE /sessions/{id}`

use crate::config::SignalingConfig;
use crate::error::{Result, SessionError};
use crate::peer::types::{IceCandidate, RelayConfig};
use crate::session::Session;
use crate::signaling::sse::SseDecoder;
use crate::signaling::{
    CandidateMessage, CandidateStream, CandidateTransport, ConfigProvider, CreateSessionRequest,
    CreateSessionResponse, SessionRegistry,
};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// reqwest-backed implementation of every signaling trait.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl SignalingClient {
    pub fn new(config: &SignalingConfig) -> Result<Self> {
        config.validate()?;

        // No client-wide timeout: it would also cut the candidate stream.
        // Unary calls get `request_timeout` per request instead.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SessionError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.endpoint().to_string(),
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn unary(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        self.authorize(request).timeout(self.request_timeout)
    }
}

/// Turns a non-2xx response into a readable message.
async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    format!(
        "HTTP {} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        body
    )
}

#[async_trait]
impl ConfigProvider for SignalingClient {
    async fn get_config(&self) -> Result<RelayConfig> {
        let url = self.url("/config");
        debug!("Fetching relay configuration from {}", url);

        let response = self
            .unary(self.client.get(&url))
            .send()
            .await
            .map_err(|e| SessionError::ConfigFetch(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::ConfigFetch(describe_failure(response).await));
        }

        response
            .json::<RelayConfig>()
            .await
            .map_err(|e| SessionError::ConfigFetch(format!("failed to parse response: {}", e)))
    }
}

#[async_trait]
impl SessionRegistry for SignalingClient {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<CreateSessionResponse> {
        let url = self.url("/sessions");
        debug!(target_name = %request.target_name, "Submitting offer to {}", url);

        let response = self
            .unary(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(|e| SessionError::SessionCreate(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::SessionCreate(describe_failure(response).await));
        }

        response
            .json::<CreateSessionResponse>()
            .await
            .map_err(|e| SessionError::SessionCreate(format!("failed to parse response: {}", e)))
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        let url = self.url(&format!("/sessions/{}", session_id));
        let response = self
            .unary(self.client.get(&url))
            .send()
            .await
            .map_err(|e| SessionError::Registry(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::Registry(describe_failure(response).await));
        }
        response
            .json::<Session>()
            .await
            .map_err(|e| SessionError::Registry(format!("failed to parse response: {}", e)))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let url = self.url("/sessions");
        let response = self
            .unary(self.client.get(&url))
            .send()
            .await
            .map_err(|e| SessionError::Registry(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::Registry(describe_failure(response).await));
        }
        response
            .json::<Vec<Session>>()
            .await
            .map_err(|e| SessionError::Registry(format!("failed to parse response: {}", e)))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = self.url(&format!("/sessions/{}", session_id));
        let response = self
            .unary(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| SessionError::Registry(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::Registry(describe_failure(response).await));
        }
        Ok(())
    }
}

#[async_trait]
impl CandidateTransport for SignalingClient {
    async fn send_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        let url = self.url(&format!("/sessions/{}/ice-candidates", session_id));
        let response = self
            .unary(self.client.post(&url).json(candidate))
            .send()
            .await
            .map_err(|e| SessionError::CandidateSend(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::CandidateSend(describe_failure(response).await));
        }
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<CandidateStream> {
        let url = self.url(&format!("/sessions/{}/ice-candidates/stream", session_id));
        debug!(session_id, "Opening candidate stream {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| SessionError::CandidateStream(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SessionError::CandidateStream(describe_failure(response).await));
        }

        let body = response.bytes_stream().boxed();
        let state = (body, SseDecoder::new(), VecDeque::<CandidateMessage>::new());

        let messages = stream::unfold(state, |(mut body, mut decoder, mut ready)| async move {
            loop {
                if let Some(message) = ready.pop_front() {
                    return Some((Ok(message), (body, decoder, ready)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => {
                        for data in decoder.feed(&chunk) {
                            match CandidateMessage::parse(&data) {
                                Ok(message) => ready.push_back(message),
                                Err(e) => warn!("Skipping malformed candidate event {:?}: {}", data, e),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let err = SessionError::CandidateStream(format!("stream read failed: {}", e));
                        return Some((Err(err), (body, decoder, ready)));
                    }
                    None => return None,
                }
            }
        });

        Ok(messages.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        let err = SignalingClient::new(&SignalingConfig::new("scope.local")).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn test_urls_join_without_double_slash() {
        let client = SignalingClient::new(&SignalingConfig::new("http://scope.local/api/webrtc/")).unwrap();
        assert_eq!(client.base_url(), "http://scope.local/api/webrtc");
        assert_eq!(
            client.url("/sessions/abc/ice-candidates"),
            "http://scope.local/api/webrtc/sessions/abc/ice-candidates"
        );
    }
}
