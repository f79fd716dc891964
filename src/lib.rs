//! Real-time video session negotiation for a networked telescope camera.
//!
//! [`SessionManager`] drives one receive-only WebRTC session at a time:
//! relay config, offer, registry answer, trickle ICE and the wait for the
//! first inbound video track.

pub mod candidate;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod testing;
pub mod utils;

pub use config::{RetryPolicy, SignalingConfig};
pub use error::{Result, SessionError};
pub use logger::{init_logging, init_logging_forced};
pub use peer::types::{ConnectionState, IceCandidate, MediaStreamHandle, MediaTrack, RelayConfig, SessionDescription};
pub use session::{Session, SessionDeps, SessionEvent, SessionManager, StreamKind};
pub use signaling::{CachingConfigProvider, SignalingClient};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
