//! Signaling Protocol
//!
//! Offer/answer/candidate payloads exchanged between exactly two peers of a
//! room through the backend mailbox.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection setup payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// SDP offer from the offering peer.
    Offer { sdp: String },
    /// SDP answer from the answering peer.
    Answer { sdp: String },
    /// Trickled ICE candidate, JSON-encoded `RTCIceCandidateInit`.
    Candidate { candidate: String },
}

impl SignalPayload {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }
}

/// A payload addressed from one room participant to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Sending user.
    pub from: Uuid,
    /// Receiving user.
    pub to: Uuid,
    /// Room the connection belongs to.
    pub room_id: Uuid,
    /// Payload.
    pub payload: SignalPayload,
}

/// Whether `local` makes the offer on the connection to `remote`.
///
/// The smaller user ID always offers, so both sides agree without a
/// negotiation round.
#[must_use]
pub fn is_offerer(local: Uuid, remote: Uuid) -> bool {
    local < remote
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_side_offers() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(is_offerer(a, b), is_offerer(b, a));
    }

    #[test]
    fn test_envelope_serialization() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let envelope = SignalEnvelope {
            from: id,
            to: id,
            room_id: id,
            payload: SignalPayload::Answer { sdp: "v=0".into() },
        };

        let json = serde_json::to_string(&envelope).expect("Should serialize");
        assert!(json.contains("\"type\":\"answer\""));
        assert!(json.contains("\"sdp\":\"v=0\""));

        let back: SignalEnvelope = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(back, envelope);
    }
}
