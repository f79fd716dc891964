use crate::error::Result;
use crate::peer::types::RelayConfig;
use crate::signaling::ConfigProvider;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Opt-in TTL cache in front of another [`ConfigProvider`].
///
/// The lifecycle manager never wraps its provider implicitly; callers that
/// accept stale relay credentials for `ttl` can hand it one of these.
pub struct CachingConfigProvider<P> {
    inner: P,
    ttl: Duration,
    cached: Mutex<Option<(Instant, RelayConfig)>>,
}

impl<P: ConfigProvider> CachingConfigProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Drops the cached entry so the next call refetches.
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn fresh(&self) -> Option<RelayConfig> {
        let cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        match cached.as_ref() {
            Some((fetched_at, config)) if fetched_at.elapsed() < self.ttl => Some(config.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl<P: ConfigProvider> ConfigProvider for CachingConfigProvider<P> {
    async fn get_config(&self) -> Result<RelayConfig> {
        if let Some(config) = self.fresh() {
            debug!("Using cached relay configuration");
            return Ok(config);
        }

        // failures are not cached
        let config = self.inner.get_config().await?;
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = Some((Instant::now(), config.clone()));
        Ok(config)
    }
}
