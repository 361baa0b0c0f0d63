//! webrtc-rs backend for the transport session contract.
//!
//! Callback registrations are bridged into the event stream the driver
//! consumes; nothing in here makes negotiation decisions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use ::webrtc::api::APIBuilder;
use ::webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::signaling_state::RTCSignalingState;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_local::TrackLocal;

use crate::media::MediaAttachment;
use crate::signal::{CandidateInit, DescriptionKind, SessionDescription, SignalingPhase};
use crate::transport::{SessionFactory, TransportError, TransportEvent, TransportSession};

#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// STUN/TURN urls handed to the ICE agent.
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

pub struct WebRtcSession {
    peer_connection: Arc<RTCPeerConnection>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WebRtcSession {
    pub async fn connect(config: &WebRtcConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(setup_err)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(setup_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(setup_err)?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(TransportEvent::NegotiationNeeded);
            })
        }));

        let tx = events_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let init = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(json) => Some(candidate_from_json(json)),
                        Err(err) => {
                            warn!(%err, "local candidate failed to serialize, dropped");
                            return;
                        }
                    },
                    None => None,
                };
                let _ = tx.send(TransportEvent::LocalCandidate(init));
            })
        }));

        let tx = events_tx.clone();
        peer_connection.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(phase) = phase_from_state(state) {
                    let _ = tx.send(TransportEvent::PhaseChanged(phase));
                }
            })
        }));

        let tx = events_tx.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let tx = tx.clone();
                Box::pin(async move {
                    debug!(?state, "peer connection state changed");
                    match state {
                        RTCPeerConnectionState::Connected => {
                            let _ = tx.send(TransportEvent::Connected);
                        }
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed => {
                            let _ = tx.send(TransportEvent::Disconnected);
                        }
                        _ => {}
                    }
                })
            },
        ));

        let tx = events_tx.clone();
        peer_connection.on_data_channel(Box::new(move |channel| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(TransportEvent::DataChannelOpened(channel.label().to_string()));
            })
        }));

        let tx = events_tx;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(TransportEvent::TrackAdded(track.id()));
            })
        }));

        Ok(Self {
            peer_connection,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }
}

#[async_trait]
impl TransportSession for WebRtcSession {
    fn supports_implicit_local_description(&self) -> bool {
        // webrtc-rs has no parameterless set_local_description; the driver
        // takes the explicit create-then-apply path.
        false
    }

    fn supports_rollback(&self) -> bool {
        false
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(description_err)?;
        description_from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(description_err)?;
        description_from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let rtc = rtc_from_description(&description)?;
        self.peer_connection
            .set_local_description(rtc)
            .await
            .map_err(description_err)
    }

    async fn apply_implicit_local_description(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "implicit local description (use create-then-apply)",
        ))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let rtc = rtc_from_description(&description)?;
        self.peer_connection
            .set_remote_description(rtc)
            .await
            .map_err(description_err)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let local = self.peer_connection.local_description().await?;
        description_from_rtc(&local).ok()
    }

    async fn add_remote_candidate(
        &self,
        candidate: Option<CandidateInit>,
    ) -> Result<(), TransportError> {
        let Some(candidate) = candidate else {
            // End-of-candidates: meaningful to browsers, a no-op here.
            debug!("peer finished candidate gathering");
            return Ok(());
        };
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|err| TransportError::CandidateRejected(err.to_string()))
    }

    async fn attach_media(&self, attachment: &MediaAttachment) -> Result<(), TransportError> {
        match attachment {
            MediaAttachment::DataChannel { label } => {
                self.peer_connection
                    .create_data_channel(label, None)
                    .await
                    .map_err(setup_err)?;
            }
            MediaAttachment::AudioTrack { id } => {
                self.add_sample_track(id, MIME_TYPE_OPUS).await?;
            }
            MediaAttachment::VideoTrack { id } => {
                self.add_sample_track(id, MIME_TYPE_VP8).await?;
            }
        }
        Ok(())
    }

    fn signaling_phase(&self) -> SignalingPhase {
        phase_from_state(self.peer_connection.signaling_state())
            .unwrap_or(SignalingPhase::Stable)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) {
        if let Err(err) = self.peer_connection.close().await {
            debug!(%err, "peer connection close reported an error");
        }
    }
}

impl WebRtcSession {
    async fn add_sample_track(&self, id: &str, mime_type: &str) -> Result<(), TransportError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                ..Default::default()
            },
            id.to_string(),
            "parlor".to_string(),
        ));
        self.peer_connection
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(setup_err)?;
        Ok(())
    }
}

/// Factory the reset protocol uses to mint fresh webrtc-rs sessions.
pub struct WebRtcSessionFactory {
    config: WebRtcConfig,
}

impl WebRtcSessionFactory {
    pub fn new(config: WebRtcConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

#[async_trait]
impl SessionFactory for WebRtcSessionFactory {
    async fn create(&self) -> Result<Arc<dyn TransportSession>, TransportError> {
        Ok(Arc::new(WebRtcSession::connect(&self.config).await?))
    }
}

fn setup_err(err: ::webrtc::Error) -> TransportError {
    TransportError::Setup(err.to_string())
}

fn description_err(err: ::webrtc::Error) -> TransportError {
    TransportError::DescriptionRejected(err.to_string())
}

fn candidate_from_json(init: RTCIceCandidateInit) -> CandidateInit {
    CandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn phase_from_state(state: RTCSignalingState) -> Option<SignalingPhase> {
    match state {
        RTCSignalingState::Stable => Some(SignalingPhase::Stable),
        RTCSignalingState::HaveLocalOffer => Some(SignalingPhase::HaveLocalOffer),
        RTCSignalingState::HaveRemoteOffer => Some(SignalingPhase::HaveRemoteOffer),
        RTCSignalingState::HaveLocalPranswer => Some(SignalingPhase::HaveLocalPranswer),
        RTCSignalingState::HaveRemotePranswer => Some(SignalingPhase::HaveRemotePranswer),
        RTCSignalingState::Closed | RTCSignalingState::Unspecified => None,
    }
}

fn description_from_rtc(
    rtc: &RTCSessionDescription,
) -> Result<SessionDescription, TransportError> {
    let kind = match rtc.sdp_type {
        RTCSdpType::Offer => DescriptionKind::Offer,
        RTCSdpType::Answer => DescriptionKind::Answer,
        RTCSdpType::Pranswer => DescriptionKind::Pranswer,
        RTCSdpType::Rollback => DescriptionKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::InvalidState(
                "unspecified sdp type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: Some(rtc.sdp.clone()),
    })
}

fn rtc_from_description(
    description: &SessionDescription,
) -> Result<RTCSessionDescription, TransportError> {
    let sdp = description.sdp.clone().unwrap_or_default();
    let rtc = match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(sdp),
        DescriptionKind::Answer => RTCSessionDescription::answer(sdp),
        DescriptionKind::Pranswer => RTCSessionDescription::pranswer(sdp),
        DescriptionKind::Rollback => {
            return Err(TransportError::Unsupported("sdp rollback"));
        }
        DescriptionKind::Reset => {
            return Err(TransportError::InvalidState(
                "_reset is a control signal, not sdp".to_string(),
            ));
        }
    };
    rtc.map_err(|err| TransportError::DescriptionRejected(err.to_string()))
}
