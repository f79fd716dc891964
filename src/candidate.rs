use crate::config::RetryPolicy;
use crate::error::{Result, SessionError};
use crate::logger::dump_candidate;
use crate::peer::types::IceCandidate;
use crate::signaling::{CandidateMessage, CandidateTransport};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// What the inbound subscription delivers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A remote candidate, keepalives already filtered out.
    Remote(IceCandidate),
    /// Reconnect attempts exhausted; no more remote candidates will arrive.
    StreamLost(SessionError),
}

/// Stops the inbound subscription it was returned for.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Posts local candidates for one session, retrying within the policy.
#[derive(Clone)]
pub struct CandidateSender {
    session_id: String,
    transport: Arc<dyn CandidateTransport>,
    retry: RetryPolicy,
}

impl CandidateSender {
    /// Best effort: after the last attempt the candidate is dropped and
    /// `CandidateSend` returned for the caller to log.
    pub async fn send(&self, candidate: &IceCandidate) -> Result<()> {
        dump_candidate("LOCAL->REMOTE", candidate);
        let attempts = self.retry.candidate_send_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.transport.send_candidate(&self.session_id, candidate).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    debug!(
                        session_id = %self.session_id,
                        attempt,
                        "Candidate send failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        candidate = %candidate.candidate,
                        "Dropping local candidate after {} attempts: {}",
                        attempts,
                        e
                    );
                    return Err(match e {
                        SessionError::CandidateSend(_) => e,
                        other => SessionError::CandidateSend(other.to_string()),
                    });
                }
            }
        }
    }
}

/// Trickle ICE for one session: outbound posts plus the inbound
/// server-push subscription.
pub struct CandidateChannel {
    sender: CandidateSender,
    subscription: Option<(SubscriptionHandle, JoinHandle<()>)>,
}

impl CandidateChannel {
    pub fn new(session_id: impl Into<String>, transport: Arc<dyn CandidateTransport>, retry: RetryPolicy) -> Self {
        Self {
            sender: CandidateSender {
                session_id: session_id.into(),
                transport,
                retry,
            },
            subscription: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.sender.session_id
    }

    /// Opens the inbound subscription; remote candidates go to `events`
    /// in arrival order. Restarting replaces the previous subscription.
    pub fn start(&mut self, events: mpsc::UnboundedSender<ChannelEvent>) -> SubscriptionHandle {
        self.stop();

        let handle = SubscriptionHandle {
            token: CancellationToken::new(),
        };
        let task = tokio::spawn(run_subscription(
            self.sender.session_id.clone(),
            self.sender.transport.clone(),
            self.sender.retry.clone(),
            events,
            handle.token.clone(),
        ));
        info!(session_id = %self.sender.session_id, "Candidate channel started");

        self.subscription = Some((handle.clone(), task));
        handle
    }

    pub async fn send_local(&self, candidate: &IceCandidate) -> Result<()> {
        self.sender.send(candidate).await
    }

    /// Cloneable sender for posting candidates from other tasks.
    pub fn sender(&self) -> CandidateSender {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        self.subscription
            .as_ref()
            .map(|(handle, task)| !handle.is_stopped() && !task.is_finished())
            .unwrap_or(false)
    }

    /// Closes the inbound subscription. Idempotent.
    pub fn stop(&mut self) {
        if let Some((handle, task)) = self.subscription.take() {
            debug!(session_id = %self.sender.session_id, "Stopping candidate channel");
            handle.stop();
            task.abort();
        }
    }
}

impl Drop for CandidateChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_subscription(
    session_id: String,
    transport: Arc<dyn CandidateTransport>,
    retry: RetryPolicy,
    events: mpsc::UnboundedSender<ChannelEvent>,
    token: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let subscribed = tokio::select! {
            _ = token.cancelled() => return,
            result = transport.subscribe(&session_id) => result,
        };

        let reason = match subscribed {
            Ok(mut stream) => {
                debug!(session_id = %session_id, "Candidate stream open");
                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => return,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(CandidateMessage::Keepalive)) => {
                            trace!(session_id = %session_id, "keepalive");
                            failures = 0;
                        }
                        Some(Ok(CandidateMessage::Candidate(candidate))) => {
                            failures = 0;
                            dump_candidate("REMOTE", &candidate);
                            if events.send(ChannelEvent::Remote(candidate)).is_err() {
                                debug!(session_id = %session_id, "Candidate receiver dropped, stopping stream");
                                return;
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream closed by server".to_string(),
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        failures += 1;
        if failures > retry.stream_reconnect_attempts {
            warn!(
                session_id = %session_id,
                "Candidate stream lost after {} reconnect attempts: {}",
                retry.stream_reconnect_attempts,
                reason
            );
            let _ = events.send(ChannelEvent::StreamLost(SessionError::CandidateStream(reason)));
            return;
        }

        warn!(session_id = %session_id, attempt = failures, "Candidate stream interrupted, resubscribing: {}", reason);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(retry.delay(failures)) => {}
        }
    }
}
