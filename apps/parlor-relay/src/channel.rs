//! In-memory channel registry: one channel per live session id, capped at
//! two members. A channel exists only while at least one member is in it;
//! the last leave releases the id for reuse.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{PeerRole, ServerFrame};

const CHANNEL_CAPACITY: usize = 2;

struct Member {
    peer_id: String,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Default)]
struct Channel {
    members: Vec<Member>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Admitted { role: PeerRole },
    Full,
}

/// Shared map of session id -> channel. Clones share the same registry.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<DashMap<String, Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a peer to the channel for `session_id`, creating the channel on
    /// first join. Roles follow arrival order; a third arrival is turned
    /// away without touching the channel.
    pub fn join(
        &self,
        session_id: &str,
        peer_id: &str,
        tx: mpsc::UnboundedSender<ServerFrame>,
    ) -> JoinOutcome {
        let mut channel = self.channels.entry(session_id.to_string()).or_default();
        if channel.members.len() >= CHANNEL_CAPACITY {
            return JoinOutcome::Full;
        }
        let role = if channel.members.is_empty() {
            PeerRole::Impolite
        } else {
            PeerRole::Polite
        };
        channel.members.push(Member {
            peer_id: peer_id.to_string(),
            tx,
        });
        debug!(%session_id, %peer_id, ?role, members = channel.members.len(), "peer admitted");
        JoinOutcome::Admitted { role }
    }

    /// Remove a peer, dropping the channel once it empties. Returns whether
    /// the peer was actually a member.
    pub fn leave(&self, session_id: &str, peer_id: &str) -> bool {
        let mut present = false;
        let mut empty = false;
        // Decide on removal after the guard drops; remove_if under a held
        // guard on the same key would deadlock.
        if let Some(mut channel) = self.channels.get_mut(session_id) {
            let before = channel.members.len();
            channel.members.retain(|member| member.peer_id != peer_id);
            present = channel.members.len() != before;
            empty = channel.members.is_empty();
        }
        if empty {
            self.channels.remove_if(session_id, |_, channel| channel.members.is_empty());
            debug!(%session_id, "channel released");
        }
        present
    }

    /// Fan a frame out to every member except the sender. No members to
    /// reach is a silent no-op.
    pub fn broadcast_except(&self, session_id: &str, sender_id: &str, frame: ServerFrame) {
        if let Some(channel) = self.channels.get(session_id) {
            for member in channel
                .members
                .iter()
                .filter(|member| member.peer_id != sender_id)
            {
                let _ = member.tx.send(frame.clone());
            }
        }
    }

    pub fn member_count(&self, session_id: &str) -> usize {
        self.channels
            .get(session_id)
            .map(|channel| channel.members.len())
            .unwrap_or(0)
    }
}
