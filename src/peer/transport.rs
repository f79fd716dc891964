//! The peer-connection capability the controller drives.
//!
//! Codec, ICE and DTLS internals stay inside the implementation; the
//! controller only asks for descriptions, feeds candidates and listens
//! to [`TransportEvent`]s.

use crate::error::Result;
use crate::peer::types::{ConnectionState, IceCandidate, MediaTrack, RelayConfig, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Raw notifications from the primitive.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    /// Local candidate gathering finished.
    GatheringComplete,
    Track(MediaTrack),
    StateChange(ConnectionState),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates a receive-only video offer and sets it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn connection_state(&self) -> ConnectionState;

    async fn close(&self) -> Result<()>;
}

/// Builds one peer connection per negotiation attempt.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        relay: &RelayConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
