//! In-memory transport session for driving the negotiation machinery in
//! tests without a network or a media stack. Mimics browser signaling-state
//! semantics, including implicit rollback on a colliding remote offer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::media::MediaAttachment;
use crate::signal::{CandidateInit, DescriptionKind, SessionDescription, SignalingPhase};
use crate::transport::{SessionFactory, TransportError, TransportEvent, TransportSession};

#[derive(Default)]
struct Inner {
    phase: SignalingPhase,
    local: Option<SessionDescription>,
    applied_remote: Vec<SessionDescription>,
    applied_candidates: Vec<Option<CandidateInit>>,
    attachments: Vec<MediaAttachment>,
    remote_failures_remaining: u32,
    candidate_failures_remaining: u32,
    description_seq: u32,
    closed: bool,
}

pub struct MockSession {
    label: String,
    inner: Mutex<Inner>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl MockSession {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            label: label.into(),
            inner: Mutex::new(Inner::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Simulate the transport asking for a (re)offer, as a real peer
    /// connection does when tracks or channels are added.
    pub fn trigger_negotiation_needed(&self) {
        let _ = self.events_tx.send(TransportEvent::NegotiationNeeded);
    }

    /// Simulate local candidate discovery (`None` = end-of-gathering).
    pub fn emit_local_candidate(&self, candidate: Option<CandidateInit>) {
        let _ = self.events_tx.send(TransportEvent::LocalCandidate(candidate));
    }

    /// Make the next `n` remote description applications fail.
    pub fn fail_remote_descriptions(&self, n: u32) {
        self.inner.lock().unwrap().remote_failures_remaining = n;
    }

    /// Make the next `n` candidate applications fail.
    pub fn fail_candidates(&self, n: u32) {
        self.inner.lock().unwrap().candidate_failures_remaining = n;
    }

    pub fn applied_remote_descriptions(&self) -> Vec<SessionDescription> {
        self.inner.lock().unwrap().applied_remote.clone()
    }

    pub fn applied_candidates(&self) -> Vec<Option<CandidateInit>> {
        self.inner.lock().unwrap().applied_candidates.clone()
    }

    pub fn attachments(&self) -> Vec<MediaAttachment> {
        self.inner.lock().unwrap().attachments.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    fn set_phase(&self, inner: &mut Inner, phase: SignalingPhase) {
        if inner.phase != phase {
            inner.phase = phase;
            let _ = self.events_tx.send(TransportEvent::PhaseChanged(phase));
        }
    }

    fn mint_description(&self, inner: &mut Inner, kind: DescriptionKind) -> SessionDescription {
        inner.description_seq += 1;
        SessionDescription {
            kind,
            sdp: Some(format!(
                "v=0 mock sdp {} {} #{}",
                self.label,
                match kind {
                    DescriptionKind::Offer => "offer",
                    DescriptionKind::Answer => "answer",
                    _ => "other",
                },
                inner.description_seq
            )),
        }
    }
}

#[async_trait]
impl TransportSession for MockSession {
    fn supports_implicit_local_description(&self) -> bool {
        true
    }

    fn supports_rollback(&self) -> bool {
        true
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(self.mint_description(&mut inner, DescriptionKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != SignalingPhase::HaveRemoteOffer {
            return Err(TransportError::InvalidState(format!(
                "create_answer in phase {:?}",
                inner.phase
            )));
        }
        Ok(self.mint_description(&mut inner, DescriptionKind::Answer))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let next = match description.kind {
            DescriptionKind::Offer => SignalingPhase::HaveLocalOffer,
            DescriptionKind::Answer if inner.phase == SignalingPhase::HaveRemoteOffer => {
                SignalingPhase::Stable
            }
            DescriptionKind::Pranswer if inner.phase == SignalingPhase::HaveRemoteOffer => {
                SignalingPhase::HaveLocalPranswer
            }
            DescriptionKind::Rollback => SignalingPhase::Stable,
            other => {
                return Err(TransportError::InvalidState(format!(
                    "local {:?} in phase {:?}",
                    other, inner.phase
                )))
            }
        };
        inner.local = Some(description);
        self.set_phase(&mut inner, next);
        Ok(())
    }

    async fn apply_implicit_local_description(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let (description, next) = if inner.phase == SignalingPhase::HaveRemoteOffer {
            (
                self.mint_description(&mut inner, DescriptionKind::Answer),
                SignalingPhase::Stable,
            )
        } else {
            (
                self.mint_description(&mut inner, DescriptionKind::Offer),
                SignalingPhase::HaveLocalOffer,
            )
        };
        inner.local = Some(description);
        self.set_phase(&mut inner, next);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.remote_failures_remaining > 0 {
            inner.remote_failures_remaining -= 1;
            return Err(TransportError::DescriptionRejected(
                "injected failure".into(),
            ));
        }
        let next = match description.kind {
            // Implicit rollback of a pending local offer, as browsers do.
            DescriptionKind::Offer
                if matches!(
                    inner.phase,
                    SignalingPhase::Stable
                        | SignalingPhase::HaveLocalOffer
                        | SignalingPhase::HaveRemoteOffer
                ) =>
            {
                SignalingPhase::HaveRemoteOffer
            }
            DescriptionKind::Answer if inner.phase == SignalingPhase::HaveLocalOffer => {
                SignalingPhase::Stable
            }
            DescriptionKind::Pranswer if inner.phase == SignalingPhase::HaveLocalOffer => {
                SignalingPhase::HaveRemotePranswer
            }
            DescriptionKind::Rollback => SignalingPhase::Stable,
            other => {
                return Err(TransportError::InvalidState(format!(
                    "remote {:?} in phase {:?}",
                    other, inner.phase
                )))
            }
        };
        inner.applied_remote.push(description);
        self.set_phase(&mut inner, next);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().unwrap().local.clone()
    }

    async fn add_remote_candidate(
        &self,
        candidate: Option<CandidateInit>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.candidate_failures_remaining > 0 {
            inner.candidate_failures_remaining -= 1;
            return Err(TransportError::CandidateRejected("injected failure".into()));
        }
        inner.applied_candidates.push(candidate);
        Ok(())
    }

    async fn attach_media(&self, attachment: &MediaAttachment) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(TransportError::InvalidState("session closed".into()));
            }
            inner.attachments.push(attachment.clone());
        }
        // A real peer connection raises negotiation-needed when local
        // configuration changes.
        let _ = self.events_tx.send(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    fn signaling_phase(&self) -> SignalingPhase {
        self.inner.lock().unwrap().phase
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

/// Factory handing out [`MockSession`]s and keeping every created session
/// reachable so tests can inspect pre- and post-reset instances.
#[derive(Default)]
pub struct MockSessionFactory {
    label: String,
    created: Mutex<Vec<Arc<MockSession>>>,
}

impl MockSessionFactory {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Option<Arc<MockSession>> {
        self.created.lock().unwrap().get(index).cloned()
    }

    pub fn latest(&self) -> Option<Arc<MockSession>> {
        self.created.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create(&self) -> Result<Arc<dyn TransportSession>, TransportError> {
        let mut created = self.created.lock().unwrap();
        let session = MockSession::new(format!("{}-{}", self.label, created.len()));
        created.push(session.clone());
        Ok(session)
    }
}
