use crate::error::Result;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::transport::{PeerTransport, PeerTransportFactory, TransportEvent};
use crate::peer::types::{ConnectionState, IceCandidate, MediaTrack, RelayConfig, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

/// Builds [`RtcPeerTransport`]s backed by webrtc-rs.
#[derive(Debug, Clone, Default)]
pub struct RtcTransportFactory;

impl RtcTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        relay: &RelayConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = RtcPeerTransport::new(relay, events).await?;
        Ok(Arc::new(transport))
    }
}

/// Receive-only peer connection for one telescope video session.
pub struct RtcPeerTransport {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeerTransport {
    pub async fn new(relay: &RelayConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(relay)).await?);

        // video only, nothing captured locally
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        dump_candidate("LOCAL", &candidate);
                        let _ = candidate_events.send(TransportEvent::LocalCandidate(candidate));
                    }
                    Err(e) => warn!("Failed to serialise local candidate: {}", e),
                },
                None => {
                    // None marks the end of gathering
                    debug!("ICE candidate gathering completed (null candidate received)");
                    let _ = candidate_events.send(TransportEvent::GatheringComplete);
                }
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        // weak so the handler does not keep the connection alive
        let pc_stats = Arc::downgrade(&pc);
        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {:?}", st);

            if st == RTCPeerConnectionState::Failed {
                if let Some(pc) = pc_stats.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }

            let _ = state_events.send(TransportEvent::StateChange(ConnectionState::from(st)));
            Box::pin(async {})
        }));

        let track_events = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let track = MediaTrack::from_remote(track);
                info!("Inbound {:?} track {} (stream {})", track.kind(), track.id(), track.stream_id());
                let _ = track_events.send(TransportEvent::Track(track));
                Box::pin(async {})
            },
        ));

        Ok(Self { pc })
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let rtc_desc = match desc.kind {
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        };
        self.pc.set_remote_description(rtc_desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.pc.connection_state().into()
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Peer connection configuration for the relay servers of this attempt.
fn rtc_config(relay: &RelayConfig) -> RTCConfiguration {
    let ice_servers = if relay.ice_servers.is_empty() {
        // registry handed out nothing, fall back to public STUN
        vec![RTCIceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            ..Default::default()
        }]
    } else {
        relay.rtc_ice_servers()
    };

    RTCConfiguration {
        ice_servers,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}
