//! Participant side of a parlor session: the signaling client, the
//! perfect-negotiation state machine and the transport session contract that
//! binds it to a real WebRTC stack.
//!
//! The negotiation core is deliberately transport-agnostic: everything it
//! needs from WebRTC is behind [`transport::TransportSession`], with
//! [`webrtc::WebRtcSession`] as the production backend and
//! [`mock::MockSession`] for tests.

pub mod media;
pub mod mock;
pub mod negotiation;
pub mod session;
pub mod signal;
pub mod signaling;
pub mod transport;
pub mod webrtc;

pub use media::{MediaAttachment, MediaSessionManager};
pub use negotiation::{NegotiationAction, NegotiationEvent, NegotiationState, ResetOrigin, Role};
pub use session::{PeerSession, SessionError};
pub use signal::{
    CandidateInit, DescriptionKind, SessionDescription, SignalMessage, SignalingPhase,
};
pub use signaling::{
    in_memory_link, is_valid_session_id, prepare_session_id, PeerEvent, SignalingClient,
    SignalingError, SignalingHandle,
};
pub use transport::{SessionFactory, TransportError, TransportEvent, TransportSession};
pub use webrtc::{WebRtcConfig, WebRtcSession, WebRtcSessionFactory};
