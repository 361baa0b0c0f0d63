use serde::{Deserialize, Serialize};

/// Application-level message exchanged between two peers through the relay.
///
/// Exactly one variant is populated per message. The wire shape matches what
/// browsers exchange during perfect negotiation: `{"description": ...}` for
/// SDP payloads and `{"candidate": ...}` for trickle ICE, with a `null`
/// candidate marking end-of-gathering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalMessage {
    Description { description: SessionDescription },
    Candidate { candidate: Option<CandidateInit> },
}

impl SignalMessage {
    pub fn reset() -> Self {
        SignalMessage::Description {
            description: SessionDescription {
                kind: DescriptionKind::Reset,
                sdp: None,
            },
        }
    }
}

/// An SDP-bearing offer/answer payload, or the `_reset` control signal.
///
/// `_reset` is not real SDP: it asks the receiver to discard its transport
/// session and restart negotiation from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: Some(sdp.into()),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: Some(sdp.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
    /// Control signal requesting a full negotiation restart.
    #[serde(rename = "_reset")]
    Reset,
}

/// A trickle ICE candidate in `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Mirror of the transport session's signaling phase.
///
/// The state machine never tracks this independently: it only records what
/// the transport last reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingPhase {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
}
