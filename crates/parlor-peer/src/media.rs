//! Local media/data attachments and their lifecycle across resets.
//!
//! Not a negotiation concern itself: attaching raises negotiation-needed on
//! the transport, which the state machine then handles (or suppresses, right
//! after a reset).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::transport::{TransportError, TransportSession};

/// A local track or data channel to offer into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAttachment {
    DataChannel { label: String },
    AudioTrack { id: String },
    VideoTrack { id: String },
}

impl MediaAttachment {
    pub fn data_channel(label: impl Into<String>) -> Self {
        MediaAttachment::DataChannel {
            label: label.into(),
        }
    }

    pub fn video(id: impl Into<String>) -> Self {
        MediaAttachment::VideoTrack { id: id.into() }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        MediaAttachment::AudioTrack { id: id.into() }
    }
}

/// Holds the participant's desired attachments so they can be replayed onto
/// every fresh transport session the reset protocol creates.
#[derive(Default)]
pub struct MediaSessionManager {
    attachments: Vec<MediaAttachment>,
}

impl MediaSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attachments(attachments: Vec<MediaAttachment>) -> Self {
        Self { attachments }
    }

    pub fn attachments(&self) -> &[MediaAttachment] {
        &self.attachments
    }

    /// Add an attachment and apply it to the live session.
    pub async fn attach(
        &mut self,
        session: &Arc<dyn TransportSession>,
        attachment: MediaAttachment,
    ) -> Result<(), TransportError> {
        session.attach_media(&attachment).await?;
        self.attachments.push(attachment);
        Ok(())
    }

    /// Replay every attachment onto a session (initial join or post-reset).
    /// Individual failures are logged and skipped so a broken track cannot
    /// take the whole session down.
    pub async fn attach_all(&self, session: &Arc<dyn TransportSession>) {
        for attachment in &self.attachments {
            match session.attach_media(attachment).await {
                Ok(()) => debug!(?attachment, "media attached"),
                Err(err) => warn!(?attachment, %err, "media attachment failed"),
            }
        }
    }

    /// Drop all attachments; used when the participant leaves.
    pub fn clear(&mut self) {
        self.attachments.clear();
    }
}
