use crate::error::{Result, SessionError};
use crate::peer::types::ConnectionState;

/// Where one controller is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Nothing exchanged yet.
    Idle,
    /// Local offer created and set as local description.
    OfferCreated,
    /// Remote answer applied.
    Answered,
    /// Controller closed; no further exchange possible.
    Closed,
}

impl NegotiationPhase {
    pub fn begin_offer(self) -> Result<NegotiationPhase> {
        match self {
            NegotiationPhase::Idle => Ok(NegotiationPhase::OfferCreated),
            NegotiationPhase::Closed => Err(SessionError::NegotiationOrder(
                "cannot create an offer on a closed peer connection".to_string(),
            )),
            _ => Err(SessionError::NegotiationOrder(
                "an offer was already created for this peer connection".to_string(),
            )),
        }
    }

    pub fn accept_answer(self) -> Result<NegotiationPhase> {
        match self {
            NegotiationPhase::OfferCreated => Ok(NegotiationPhase::Answered),
            NegotiationPhase::Idle => Err(SessionError::NegotiationOrder(
                "remote answer applied before a local offer".to_string(),
            )),
            NegotiationPhase::Answered => Err(SessionError::NegotiationOrder(
                "remote answer already applied".to_string(),
            )),
            NegotiationPhase::Closed => Err(SessionError::NegotiationOrder(
                "cannot apply an answer on a closed peer connection".to_string(),
            )),
        }
    }

    /// Remote candidates can be applied directly only once the answer is in.
    pub fn accepts_candidates(self) -> bool {
        self == NegotiationPhase::Answered
    }
}

/// Progress towards a playable stream, published to whoever waits on media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    /// The first inbound video track arrived.
    MediaReady,
    /// The connection ended before (or after) media arrived.
    Terminated(ConnectionState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_then_answer() {
        let phase = NegotiationPhase::Idle.begin_offer().unwrap();
        assert_eq!(phase, NegotiationPhase::OfferCreated);
        assert!(!phase.accepts_candidates());
        let phase = phase.accept_answer().unwrap();
        assert!(phase.accepts_candidates());
    }

    #[test]
    fn test_answer_before_offer_is_rejected() {
        let err = NegotiationPhase::Idle.accept_answer().unwrap_err();
        assert!(matches!(err, SessionError::NegotiationOrder(_)));
    }

    #[test]
    fn test_duplicate_offer_is_rejected() {
        assert!(NegotiationPhase::OfferCreated.begin_offer().is_err());
        assert!(NegotiationPhase::Answered.begin_offer().is_err());
        assert!(NegotiationPhase::Closed.begin_offer().is_err());
    }
}
