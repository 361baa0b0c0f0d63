//! The per-participant session driver.
//!
//! One logical task owns everything here: the negotiation flags, the live
//! transport session and the signaling handle. All negotiation steps run on
//! this task, so the flags need no locking; the suspension points (create,
//! apply, candidate) interleave only with events this same loop processes.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::media::MediaSessionManager;
use crate::negotiation::{
    NegotiationAction, NegotiationEvent, NegotiationState, ResetOrigin, Role,
};
use crate::signal::{DescriptionKind, SignalMessage};
use crate::signaling::{PeerEvent, SignalingHandle};
use crate::transport::{
    SessionFactory, TransportError, TransportEvent, TransportSession,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("transport event stream already taken")]
    EventsTaken,
}

enum LocalDescriptionKind {
    Offer,
    Answer,
}

/// Drives perfect negotiation for one participant: joins transport events,
/// relay events and the state machine, and owns the reset/retry path.
pub struct PeerSession {
    state: NegotiationState,
    factory: Arc<dyn SessionFactory>,
    transport: Arc<dyn TransportSession>,
    transport_events: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
    signaling: SignalingHandle,
    media: MediaSessionManager,
}

impl PeerSession {
    /// Build the initial transport session and attach the local media/data
    /// configuration. Attachment raises negotiation-needed, which the run
    /// loop will pick up.
    pub async fn start(
        factory: Arc<dyn SessionFactory>,
        signaling: SignalingHandle,
        media: MediaSessionManager,
    ) -> Result<Self, SessionError> {
        let role = signaling.role();
        let transport = factory.create().await?;
        let transport_events = transport.take_events().ok_or(SessionError::EventsTaken)?;
        media.attach_all(&transport).await;
        info!(?role, "peer session started");
        Ok(Self {
            state: NegotiationState::new(role),
            factory,
            transport,
            transport_events,
            signaling,
            media,
        })
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    /// Run until the signaling channel closes (the participant leaves or the
    /// relay goes away). Errors inside negotiation never escape as fatal;
    /// the worst case is a designed session reset.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                event = self.signaling.recv() => {
                    match event {
                        Some(PeerEvent::Signal(message)) => self.on_signal(message).await?,
                        Some(PeerEvent::Joined { peer_id }) => {
                            info!(%peer_id, "peer joined the session");
                        }
                        Some(PeerEvent::Left { peer_id }) => {
                            // In-flight steps on our side now fail naturally;
                            // no special cancellation path.
                            info!(%peer_id, "peer left the session");
                        }
                        None => {
                            debug!("signaling channel closed, leaving session");
                            break;
                        }
                    }
                }
                event = self.transport_events.recv() => {
                    match event {
                        Some(event) => self.on_transport_event(event).await?,
                        None => {
                            warn!("transport event stream ended, leaving session");
                            break;
                        }
                    }
                }
            }
        }
        self.signaling.close();
        self.media.clear();
        self.transport.close().await;
        Ok(())
    }

    async fn on_signal(&mut self, message: SignalMessage) -> Result<(), SessionError> {
        match message {
            SignalMessage::Description { description } => {
                trace!(kind = ?description.kind, "incoming description");
                self.drive(NegotiationEvent::RemoteDescription(description))
                    .await
            }
            SignalMessage::Candidate { candidate } => {
                trace!(end_of_candidates = candidate.is_none(), "incoming candidate");
                self.drive(NegotiationEvent::RemoteCandidate(candidate)).await
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::NegotiationNeeded => {
                self.drive(NegotiationEvent::NegotiationNeeded).await
            }
            TransportEvent::LocalCandidate(candidate) => {
                // Trickle conduit: forward immediately, unbatched. Delivery
                // is best-effort; an absent peer just misses it.
                self.signaling.send(SignalMessage::Candidate { candidate });
                Ok(())
            }
            TransportEvent::PhaseChanged(phase) => {
                self.drive(NegotiationEvent::PhaseChanged(phase)).await
            }
            TransportEvent::Connected => {
                info!("transport session connected");
                Ok(())
            }
            TransportEvent::Disconnected => {
                info!("transport session disconnected");
                Ok(())
            }
            TransportEvent::DataChannelOpened(label) => {
                info!(%label, "remote data channel opened");
                Ok(())
            }
            TransportEvent::TrackAdded(id) => {
                info!(%id, "remote track added");
                Ok(())
            }
        }
    }

    /// Dispatch an event and execute the resulting actions, feeding
    /// follow-up events back through the machine until it settles.
    async fn drive(&mut self, event: NegotiationEvent) -> Result<(), SessionError> {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for action in self.state.handle(event) {
                match action {
                    NegotiationAction::ProduceLocalOffer => {
                        self.produce_local_description(LocalDescriptionKind::Offer)
                            .await;
                        pending.push_back(NegotiationEvent::LocalOfferSent);
                    }
                    NegotiationAction::ProduceLocalAnswer => {
                        self.produce_local_description(LocalDescriptionKind::Answer)
                            .await;
                        pending.push_back(NegotiationEvent::LocalAnswerSent);
                    }
                    NegotiationAction::ApplyRemoteDescription(description) => {
                        let kind = description.kind;
                        match self.transport.set_remote_description(description).await {
                            Ok(()) => {
                                self.state.observe_phase(self.transport.signaling_phase());
                                pending.push_back(NegotiationEvent::RemoteDescriptionApplied(kind));
                            }
                            Err(err) => {
                                warn!(%err, ?kind, "remote description failed to apply");
                                pending.push_back(NegotiationEvent::RemoteDescriptionFailed(kind));
                            }
                        }
                    }
                    NegotiationAction::ApplyCandidate {
                        candidate,
                        suppress_failure,
                    } => {
                        if let Err(err) = self.transport.add_remote_candidate(candidate).await {
                            if suppress_failure {
                                // Expected while a colliding offer is being
                                // ignored; swallow entirely.
                                trace!(%err, "candidate failure during ignored offer");
                            } else {
                                warn!(%err, "candidate failed to apply");
                            }
                        }
                    }
                    NegotiationAction::BeginReset(origin) => {
                        pending.clear();
                        self.reset(origin).await?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Create+apply+send sequence. Neither create nor apply failure is
    /// fatal: whatever local description resulted (possibly none) is what
    /// gets sent.
    async fn produce_local_description(&mut self, kind: LocalDescriptionKind) {
        let applied = if self.transport.supports_implicit_local_description() {
            self.transport.apply_implicit_local_description().await
        } else {
            let created = match kind {
                LocalDescriptionKind::Offer => self.transport.create_offer().await,
                LocalDescriptionKind::Answer => self.transport.create_answer().await,
            };
            match created {
                Ok(description) => self.transport.set_local_description(description).await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = applied {
            warn!(%err, "local description refinement failed, sending what we have");
        }
        self.state.observe_phase(self.transport.signaling_phase());

        if let Some(description) = self.transport.local_description().await {
            self.signaling.send(SignalMessage::Description { description });
        }
    }

    /// Reset/retry: discard the transport session wholesale, rebuild from
    /// the factory, replay media attachments and, on the polite side of a
    /// locally detected failure, tell the peer to do the same.
    async fn reset(&mut self, origin: ResetOrigin) -> Result<(), SessionError> {
        info!(?origin, "resetting transport session");
        self.transport.close().await;

        let transport = self.factory.create().await?;
        self.transport_events = transport.take_events().ok_or(SessionError::EventsTaken)?;
        self.transport = transport;

        let announce = self.state.reset(origin);

        // Re-attachment raises negotiation-needed on the fresh session; the
        // suppression flag set above decides whether it turns into an offer.
        self.media.attach_all(&self.transport).await;

        if announce {
            self.signaling.send(SignalMessage::reset());
        }
        Ok(())
    }
}
