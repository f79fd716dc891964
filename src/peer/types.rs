use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Which half of the offer/answer exchange a description is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP with its role; serialised as `{sdp, type}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Answer,
        }
    }
}

/// ICE candidate in the browser's JSON shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mline_index: Some(0),
            sdp_mid: Some("0".to_string()),
            username_fragment: None,
        }
    }

    /// `host`, `srflx`, `prflx` or `relay`, read from the `typ` attribute.
    pub fn candidate_type(&self) -> Option<&str> {
        let mut parts = self.candidate.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return parts.next();
            }
        }
        None
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mline_index: init.sdp_mline_index,
            sdp_mid: init.sdp_mid,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// One STUN/TURN server entry from `GET /config`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl RelayServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.credential.is_some()
    }
}

impl From<&RelayServer> for RTCIceServer {
    fn from(server: &RelayServer) -> Self {
        RTCIceServer {
            urls: server
                .urls
                .iter()
                .map(|url| add_ice_url_scheme(url, server.has_credentials()))
                .collect(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        }
    }
}

/// Relay/traversal servers, fetched fresh for every negotiation attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<RelayServer>,
}

impl RelayConfig {
    pub fn new(ice_servers: Vec<RelayServer>) -> Self {
        Self { ice_servers }
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().map(RTCIceServer::from).collect()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Peer connection state as reported by the primitive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// `failed` and `closed` end the peer connection instance.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Video => TrackKind::Video,
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Other,
        }
    }
}

/// An inbound media track.
///
/// Clones share the same ended flag, so stopping any clone stops them all.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    stream_id: String,
    kind: TrackKind,
    remote: Option<Arc<TrackRemote>>,
    ended: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            remote: None,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, "telescope", TrackKind::Video)
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, "telescope", TrackKind::Audio)
    }

    pub fn from_remote(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().into(),
            remote: Some(track),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }

    /// RTP source for consumers that decode or forward the media.
    pub fn remote(&self) -> Option<&Arc<TrackRemote>> {
        self.remote.as_ref()
    }

    pub fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// What `create_session` hands to the consumer: the tracks received so far.
#[derive(Debug, Clone)]
pub struct MediaStreamHandle {
    session_id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStreamHandle {
    pub fn new(session_id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            session_id: session_id.into(),
            tracks,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.is_video())
    }

    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_ended())
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
