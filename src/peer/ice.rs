use crate::peer::types::IceCandidate;
use tracing::{info, warn};

/// Remote candidates received before the remote description was set.
/// Drained in arrival order once the answer is applied.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push(candidate);
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.queue)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Counts of gathered candidates by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => summary.host += 1,
            Some("srflx") | Some("prflx") => summary.srflx += 1,
            Some("relay") => summary.relay += 1,
            _ => {}
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if !candidates.is_empty() && summary.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    summary
}
