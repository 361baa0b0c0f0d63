//! Client side of the relay protocol: the websocket signaling channel, an
//! in-memory link for tests, and session identifier helpers.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use url::Url;
use uuid::Uuid;

use crate::negotiation::Role;
use crate::signal::SignalMessage;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid session identifier: {0:?}")]
    InvalidSessionId(String),
    #[error("signaling setup failed: {0}")]
    Setup(String),
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("signaling channel closed")]
    ChannelClosed,
}

/// Frames sent to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { peer_id: String },
    Signal { payload: Value },
    Ping,
}

/// Frames received from the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    JoinAck {
        session_id: String,
        peer_id: String,
        role: PeerRole,
    },
    JoinError {
        reason: String,
    },
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
    },
    Signal {
        from_peer: String,
        payload: Value,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Role as assigned by the relay: first arrival impolite, second polite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Impolite,
    Polite,
}

impl From<PeerRole> for Role {
    fn from(role: PeerRole) -> Self {
        match role {
            PeerRole::Impolite => Role::Impolite,
            PeerRole::Polite => Role::Polite,
        }
    }
}

/// Channel-level events surfaced to the session driver.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Joined { peer_id: String },
    Left { peer_id: String },
    Signal(SignalMessage),
}

/// Commands for the websocket writer task. `Shutdown` completes the close
/// handshake so the relay sees a clean departure, not a dead socket.
enum WriterCommand {
    Frame(ClientFrame),
    Shutdown,
}

/// A participant's handle on its signaling channel: a sender for outbound
/// [`SignalMessage`]s and a stream of [`PeerEvent`]s. Produced either by
/// [`SignalingClient::connect`] or by [`in_memory_link`].
pub struct SignalingHandle {
    role: Role,
    peer_id: String,
    outgoing: mpsc::UnboundedSender<SignalMessage>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    control: Option<mpsc::UnboundedSender<WriterCommand>>,
}

impl SignalingHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Best-effort send; a missing peer means the message is simply not
    /// delivered, so a closed channel is not surfaced here.
    pub fn send(&self, message: SignalMessage) {
        let _ = self.outgoing.send(message);
    }

    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    /// Leave the session: the writer sends a websocket Close and exits,
    /// which unwinds the adapter and heartbeat tasks with it. The relay
    /// observes the close and announces `peer-left` to the remaining member.
    /// Dropping the handle does the same, so a handle can never leak its
    /// connection.
    pub fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(WriterCommand::Shutdown);
        }
    }
}

impl Drop for SignalingHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Websocket signaling client against a parlor relay.
pub struct SignalingClient;

impl SignalingClient {
    /// Connect to `base_url` (http/https or ws/wss), join the given 6-digit
    /// session and return a handle once the relay acknowledges the join with
    /// an assigned role.
    pub async fn connect(
        base_url: &str,
        session_id: &str,
    ) -> Result<SignalingHandle, SignalingError> {
        if !is_valid_session_id(session_id) {
            return Err(SignalingError::InvalidSessionId(session_id.to_string()));
        }
        let url = websocket_url(base_url, session_id)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SignalingError::Setup(format!("websocket connect failed: {err}")))?;
        tracing::debug!(%url, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let (join_tx, join_rx) = oneshot::channel::<Result<PeerRole, SignalingError>>();

        // Writer: serialize frames onto the socket. A shutdown command sends
        // the Close frame and ends the task; subsequent sends from the
        // adapter and heartbeat then fail and unwind those tasks too.
        tokio::spawn(async move {
            while let Some(command) = frames_rx.recv().await {
                match command {
                    WriterCommand::Frame(frame) => {
                        if let Ok(text) = serde_json::to_string(&frame) {
                            if ws_write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    WriterCommand::Shutdown => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Adapter: wrap application signals into relay frames.
        let signal_frames_tx = frames_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let payload = match serde_json::to_value(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(%err, "unserializable signal dropped");
                        continue;
                    }
                };
                if signal_frames_tx
                    .send(WriterCommand::Frame(ClientFrame::Signal { payload }))
                    .is_err()
                {
                    break;
                }
            }
        });

        // Heartbeat.
        let heartbeat_tx = frames_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_tx
                    .send(WriterCommand::Frame(ClientFrame::Ping))
                    .is_err()
                {
                    break;
                }
            }
        });

        // Reader: decode relay frames into peer events.
        tokio::spawn(async move {
            let mut join_tx = Some(join_tx);
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => {
                                if handle_server_frame(frame, &events_tx, &mut join_tx).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(%err, "undecodable relay frame dropped")
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                    ) => break,
                    Err(err) => {
                        tracing::warn!(%err, "signaling websocket error");
                        break;
                    }
                }
            }
            if let Some(tx) = join_tx.take() {
                let _ = tx.send(Err(SignalingError::ChannelClosed));
            }
            // Dropping events_tx closes the handle's event stream.
        });

        let peer_id = Uuid::new_v4().to_string();
        frames_tx
            .send(WriterCommand::Frame(ClientFrame::Join {
                peer_id: peer_id.clone(),
            }))
            .map_err(|_| SignalingError::ChannelClosed)?;

        let role = join_rx
            .await
            .map_err(|_| SignalingError::ChannelClosed)??;
        tracing::info!(session_id, %peer_id, ?role, "joined session");

        Ok(SignalingHandle {
            role: role.into(),
            peer_id,
            outgoing: outgoing_tx,
            events: events_rx,
            control: Some(frames_tx),
        })
    }
}

fn handle_server_frame(
    frame: ServerFrame,
    events_tx: &mpsc::UnboundedSender<PeerEvent>,
    join_tx: &mut Option<oneshot::Sender<Result<PeerRole, SignalingError>>>,
) -> Result<(), ()> {
    match frame {
        ServerFrame::JoinAck { role, .. } => {
            if let Some(tx) = join_tx.take() {
                let _ = tx.send(Ok(role));
            }
        }
        ServerFrame::JoinError { reason } => {
            if let Some(tx) = join_tx.take() {
                let _ = tx.send(Err(SignalingError::JoinRejected(reason)));
            }
            return Err(());
        }
        // A failed event send means the handle is gone; stop reading so the
        // connection is not kept alive for nobody.
        ServerFrame::PeerJoined { peer_id } => {
            if events_tx.send(PeerEvent::Joined { peer_id }).is_err() {
                return Err(());
            }
        }
        ServerFrame::PeerLeft { peer_id } => {
            if events_tx.send(PeerEvent::Left { peer_id }).is_err() {
                return Err(());
            }
        }
        ServerFrame::Signal { payload, .. } => {
            match serde_json::from_value::<SignalMessage>(payload) {
                Ok(message) => {
                    if events_tx.send(PeerEvent::Signal(message)).is_err() {
                        return Err(());
                    }
                }
                Err(err) => tracing::warn!(%err, "unrecognized signal payload dropped"),
            }
        }
        ServerFrame::Pong => {}
        ServerFrame::Error { message } => {
            tracing::warn!(%message, "relay reported an error");
        }
    }
    Ok(())
}

/// Two directly-wired signaling handles, no relay involved. The first handle
/// is impolite, the second polite, matching arrival-order assignment.
pub fn in_memory_link() -> (SignalingHandle, SignalingHandle) {
    let (a_out_tx, mut a_out_rx) = mpsc::unbounded_channel::<SignalMessage>();
    let (b_out_tx, mut b_out_rx) = mpsc::unbounded_channel::<SignalMessage>();
    let (a_events_tx, a_events_rx) = mpsc::unbounded_channel::<PeerEvent>();
    let (b_events_tx, b_events_rx) = mpsc::unbounded_channel::<PeerEvent>();

    tokio::spawn(async move {
        while let Some(message) = a_out_rx.recv().await {
            if b_events_tx.send(PeerEvent::Signal(message)).is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        while let Some(message) = b_out_rx.recv().await {
            if a_events_tx.send(PeerEvent::Signal(message)).is_err() {
                break;
            }
        }
    });

    (
        SignalingHandle {
            role: Role::Impolite,
            peer_id: "peer-impolite".into(),
            outgoing: a_out_tx,
            events: a_events_rx,
            control: None,
        },
        SignalingHandle {
            role: Role::Polite,
            peer_id: "peer-polite".into(),
            outgoing: b_out_tx,
            events: b_events_rx,
            control: None,
        },
    )
}

/// Validate the fixed 6-digit session identifier format.
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == 6 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Accept an existing identifier (for example from a location fragment) when
/// well-formed, otherwise mint a fresh random one. No relay round-trip:
/// validation against the relay happens at join time.
pub fn prepare_session_id(existing: Option<&str>) -> String {
    if let Some(id) = existing {
        let id = id.trim_start_matches('#');
        if is_valid_session_id(id) {
            return id.to_string();
        }
    }
    use rand::Rng;
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

fn websocket_url(base_url: &str, session_id: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(base_url)
        .map_err(|err| SignalingError::Setup(format!("invalid relay url {base_url}: {err}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SignalingError::Setup(format!(
                "unsupported relay url scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SignalingError::Setup("cannot set websocket scheme".into()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| SignalingError::Setup("cannot mutate relay url path".into()))?;
        segments.pop_if_empty();
        segments.push("ws");
        segments.push(session_id);
    }
    Ok(url)
}
