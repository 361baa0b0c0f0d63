//! Contract the negotiation driver consumes.
//!
//! The core depends only on this trait, never on a concrete WebRTC stack:
//! [`crate::webrtc::WebRtcSession`] binds it to webrtc-rs and
//! [`crate::mock::MockSession`] provides the in-memory backend used by tests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::MediaAttachment;
use crate::signal::{CandidateInit, SessionDescription, SignalingPhase};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("description rejected: {0}")]
    DescriptionRejected(String),
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),
    #[error("transport channel closed")]
    ChannelClosed,
}

/// Events the transport pushes at the driver. Each suspension point in the
/// negotiation sequence corresponds to one of these arriving later.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Local media/data configuration changed; an offer is wanted.
    NegotiationNeeded,
    /// A locally gathered candidate (`None` = end-of-gathering). Forwarded
    /// to the peer immediately, never batched.
    LocalCandidate(Option<CandidateInit>),
    PhaseChanged(SignalingPhase),
    Connected,
    Disconnected,
    /// The remote side opened a data channel towards us.
    DataChannelOpened(String),
    /// The remote side attached a media track.
    TrackAdded(String),
}

/// One peer-to-peer transport session (one RTCPeerConnection's worth of
/// state). Recreated wholesale by the reset protocol.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Whether the backend can apply a local description without an explicit
    /// create step (the browser-style parameterless `setLocalDescription`).
    /// This is a static capability of the backend, not a per-call probe.
    fn supports_implicit_local_description(&self) -> bool;

    /// Whether applying a remote offer implicitly rolls back a pending local
    /// offer. Backends without rollback surface the collision as a
    /// description failure, which the driver resolves via reset.
    fn supports_rollback(&self) -> bool;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    /// Create-and-apply in one step. Only valid when
    /// [`supports_implicit_local_description`](Self::supports_implicit_local_description)
    /// is true.
    async fn apply_implicit_local_description(&self) -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    /// The current local description, whatever the last create/apply left
    /// behind. This is what gets sent to the peer.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply a remote candidate. `None` is the end-of-candidates marker and
    /// is never an error.
    async fn add_remote_candidate(
        &self,
        candidate: Option<CandidateInit>,
    ) -> Result<(), TransportError>;

    async fn attach_media(&self, attachment: &MediaAttachment) -> Result<(), TransportError>;

    fn signaling_phase(&self) -> SignalingPhase;

    /// Take the event stream. Yields `None` once taken before.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    async fn close(&self);
}

/// Builds fresh transport sessions. The reset protocol discards the current
/// session and asks this for a new one.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<std::sync::Arc<dyn TransportSession>, TransportError>;
}
