// Configuration of the negotiation client.
// Logging can only be switched off in development builds.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // debug builds log by default

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // release builds stay quiet

// Extra switches for development builds
#[cfg(debug_assertions)]
pub mod dev {
    // Set to false to silence logging entirely while developing.
    // Only honoured in debug builds.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Environment variable holding the signaling server base URL.
pub const ENV_SIGNALING_URL: &str = "SCOPE_RTC_SIGNALING_URL";
/// Environment variable holding an optional bearer token.
pub const ENV_AUTH_TOKEN: &str = "SCOPE_RTC_AUTH_TOKEN";
/// Environment variable overriding the media wait, in whole seconds.
pub const ENV_NEGOTIATION_TIMEOUT: &str = "SCOPE_RTC_NEGOTIATION_TIMEOUT_SECS";

/// How long `create_session` waits for the first inbound video track.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout for unary signaling calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded retry policy for trickle ICE signaling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts for one outbound candidate, first try included.
    pub candidate_send_attempts: u32,
    /// Re-subscriptions allowed before the inbound stream is declared lost.
    pub stream_reconnect_attempts: u32,
    /// Base delay; the n-th retry waits `backoff * n`.
    #[serde(with = "millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            candidate_send_attempts: 3,
            stream_reconnect_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.max(1))
    }
}

/// Signaling endpoint and negotiation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    #[serde(with = "millis")]
    pub negotiation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/webrtc".to_string(),
            auth_token: None,
            request_timeout: REQUEST_TIMEOUT,
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl SignalingConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `SCOPE_RTC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(ENV_SIGNALING_URL) {
            config.base_url = url;
        }
        if let Ok(token) = std::env::var(ENV_AUTH_TOKEN) {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }
        if let Ok(secs) = std::env::var(ENV_NEGOTIATION_TIMEOUT) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                SessionError::InvalidConfig(format!(
                    "{ENV_NEGOTIATION_TIMEOUT} must be a whole number of seconds, got {secs:?}"
                ))
            })?;
            config.negotiation_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(SessionError::InvalidConfig(
                "signaling base_url cannot be empty".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SessionError::InvalidConfig(format!(
                "signaling base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.negotiation_timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "negotiation_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn endpoint(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SignalingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.negotiation_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.candidate_send_attempts, 3);
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(SignalingConfig::new("").validate().is_err());
        let err = SignalingConfig::new("ftp://scope.local").validate().unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = SignalingConfig::new("http://scope.local/api/");
        assert_eq!(config.endpoint(), "http://scope.local/api");
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay(1), Duration::from_millis(500));
        assert_eq!(retry.delay(3), Duration::from_millis(1500));
        assert_eq!(retry.delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SignalingConfig = serde_json::from_str(
            r#"{"base_url":"https://scope.local","negotiation_timeout":5000,"retry":{"backoff":10}}"#,
        )
        .unwrap();
        assert_eq!(config.negotiation_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.backoff, Duration::from_millis(10));
        assert_eq!(config.retry.stream_reconnect_attempts, 3);
        assert_eq!(config.request_timeout, REQUEST_TIMEOUT);
    }
}
