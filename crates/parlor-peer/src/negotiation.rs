//! Perfect-negotiation state machine.
//!
//! The collision logic lives here as a plain event dispatch with no transport
//! handle in sight: callers feed [`NegotiationEvent`]s in and execute the
//! returned [`NegotiationAction`]s against whatever transport they own. That
//! keeps the glare rules unit-testable and keeps every flag owned by exactly
//! one participant's task.

use tracing::{debug, trace};

use crate::signal::{CandidateInit, DescriptionKind, SessionDescription, SignalingPhase};

/// Who yields when both sides offer at once. The first participant into a
/// channel is impolite; the second is polite. Immutable for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Polite,
    Impolite,
}

impl Role {
    pub fn is_polite(self) -> bool {
        matches!(self, Role::Polite)
    }
}

/// Where a reset was initiated, which decides whether we echo `_reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOrigin {
    /// A local failure (remote description rejected by the transport).
    Local,
    /// A `_reset` control signal from the peer.
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// The transport wants a (re)offer: media changed, channel added, etc.
    NegotiationNeeded,
    /// The local offer produced by [`NegotiationAction::ProduceLocalOffer`]
    /// has been handed to the relay.
    LocalOfferSent,
    /// Same, for the answer produced in response to a remote offer.
    LocalAnswerSent,
    /// The transport reported a signaling phase change.
    PhaseChanged(SignalingPhase),
    /// A description arrived from the peer.
    RemoteDescription(SessionDescription),
    /// The remote description was applied successfully.
    RemoteDescriptionApplied(DescriptionKind),
    /// The transport rejected the remote description.
    RemoteDescriptionFailed(DescriptionKind),
    /// A candidate arrived from the peer (`None` = end-of-candidates).
    RemoteCandidate(Option<CandidateInit>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationAction {
    /// Create and apply a local offer, send whatever local description
    /// results, then feed back [`NegotiationEvent::LocalOfferSent`].
    ProduceLocalOffer,
    /// Create and apply a local answer, send it, then feed back
    /// [`NegotiationEvent::LocalAnswerSent`].
    ProduceLocalAnswer,
    /// Apply the description to the transport and report the outcome as
    /// `RemoteDescriptionApplied` / `RemoteDescriptionFailed`.
    ApplyRemoteDescription(SessionDescription),
    /// Apply the candidate. When `suppress_failure` is set the message
    /// belongs to an offer we are actively ignoring and an apply error must
    /// be swallowed without so much as a log line at warning level.
    ApplyCandidate {
        candidate: Option<CandidateInit>,
        suppress_failure: bool,
    },
    /// Tear down the transport session and rebuild it from scratch.
    BeginReset(ResetOrigin),
}

/// Per-participant negotiation flags. Owned exclusively by that participant's
/// task; never shared, never locked.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    role: Role,
    phase: SignalingPhase,
    making_offer: bool,
    ignoring_offer: bool,
    setting_remote_answer_pending: bool,
    suppressing_initial_offer: bool,
}

impl NegotiationState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: SignalingPhase::Stable,
            making_offer: false,
            ignoring_offer: false,
            setting_remote_answer_pending: false,
            suppressing_initial_offer: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> SignalingPhase {
        self.phase
    }

    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    pub fn is_ignoring_offer(&self) -> bool {
        self.ignoring_offer
    }

    pub fn is_suppressing_initial_offer(&self) -> bool {
        self.suppressing_initial_offer
    }

    /// Record the transport's signaling phase. Also used by drivers that poll
    /// the transport after an apply instead of waiting for the event.
    pub fn observe_phase(&mut self, phase: SignalingPhase) {
        if self.phase != phase {
            trace!(?phase, "signaling phase observed");
            self.phase = phase;
        }
    }

    /// Clear every flag for a fresh transport session. A polite peer comes
    /// out of a reset suppressing its own re-offer so the impolite peer's
    /// offer wins the post-reset race. Returns whether a `_reset` signal must
    /// be sent to the peer: only the polite side announces, and only for
    /// resets it originated itself.
    pub fn reset(&mut self, origin: ResetOrigin) -> bool {
        self.phase = SignalingPhase::Stable;
        self.making_offer = false;
        self.ignoring_offer = false;
        self.setting_remote_answer_pending = false;
        self.suppressing_initial_offer = self.role.is_polite();
        debug!(role = ?self.role, ?origin, "negotiation state reset");
        self.role.is_polite() && origin == ResetOrigin::Local
    }

    /// Dispatch one event, mutating the flags and returning the effects the
    /// driver must carry out, in order.
    pub fn handle(&mut self, event: NegotiationEvent) -> Vec<NegotiationAction> {
        match event {
            NegotiationEvent::NegotiationNeeded => {
                if self.suppressing_initial_offer {
                    debug!("negotiation needed while suppressing post-reset offer, dropped");
                    return Vec::new();
                }
                self.making_offer = true;
                vec![NegotiationAction::ProduceLocalOffer]
            }
            NegotiationEvent::LocalOfferSent => {
                self.making_offer = false;
                Vec::new()
            }
            NegotiationEvent::LocalAnswerSent => {
                self.suppressing_initial_offer = false;
                Vec::new()
            }
            NegotiationEvent::PhaseChanged(phase) => {
                self.observe_phase(phase);
                Vec::new()
            }
            NegotiationEvent::RemoteDescription(description) => self.on_description(description),
            NegotiationEvent::RemoteDescriptionApplied(kind) => {
                self.setting_remote_answer_pending = false;
                if kind == DescriptionKind::Offer {
                    vec![NegotiationAction::ProduceLocalAnswer]
                } else {
                    Vec::new()
                }
            }
            NegotiationEvent::RemoteDescriptionFailed(kind) => {
                self.setting_remote_answer_pending = false;
                debug!(?kind, "remote description rejected by transport, resetting");
                vec![NegotiationAction::BeginReset(ResetOrigin::Local)]
            }
            NegotiationEvent::RemoteCandidate(candidate) => {
                vec![NegotiationAction::ApplyCandidate {
                    candidate,
                    suppress_failure: self.ignoring_offer,
                }]
            }
        }
    }

    fn on_description(&mut self, description: SessionDescription) -> Vec<NegotiationAction> {
        if description.kind == DescriptionKind::Reset {
            return vec![NegotiationAction::BeginReset(ResetOrigin::Remote)];
        }

        let ready_for_offer = !self.making_offer
            && (self.phase == SignalingPhase::Stable || self.setting_remote_answer_pending);
        let offer_collision = description.kind == DescriptionKind::Offer && !ready_for_offer;

        self.ignoring_offer = self.role == Role::Impolite && offer_collision;
        if self.ignoring_offer {
            debug!("glare: impolite peer ignoring colliding offer");
            return Vec::new();
        }

        self.setting_remote_answer_pending = description.kind == DescriptionKind::Answer;
        vec![NegotiationAction::ApplyRemoteDescription(description)]
    }
}
