use crate::peer::types::IceCandidate;
use std::sync::Once;
use tracing::{debug, info};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;

const DEFAULT_FILTER: &str = "scope_rtc=info";

static INIT: Once = Once::new();

/// Local wall-clock timestamps, millisecond precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber when logging is enabled for this build.
pub fn init_logging() {
    if !crate::config::LOGGING_ENABLED {
        return;
    }
    #[cfg(debug_assertions)]
    {
        if !crate::config::dev::ENABLE_LOGGING {
            return;
        }
    }
    init_logging_forced();
}

/// Installs the subscriber regardless of build profile. Later calls are no-ops.
pub fn init_logging_forced() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTime)
            .with_target(true)
            .try_init();
    });
}

/// Traces a trickled candidate as it passes through.
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

/// Quick getStats snapshot of the nominated candidate pair.
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
