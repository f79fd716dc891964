pub mod connection;
pub mod controller;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{RtcPeerTransport, RtcTransportFactory};
pub use controller::{ControllerStats, PeerConnectionController, PeerEvent};
pub use state::{NegotiationPhase, Readiness};
pub use transport::{PeerTransport, PeerTransportFactory, TransportEvent};
pub use types::{
    ConnectionState, IceCandidate, MediaStreamHandle, MediaTrack, RelayConfig, RelayServer, SdpKind,
    SessionDescription, TrackKind,
};
