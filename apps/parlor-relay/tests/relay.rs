//! Relay protocol over live websockets: join/role assignment, fan-out,
//! capacity rejection and disconnect notification.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use parlor_relay::protocol::{ClientFrame, PeerRole, ServerFrame};
use parlor_relay::{router, ChannelRegistry};

async fn spawn_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(ChannelRegistry::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(addr: &str, session_id: &str) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/ws/{session_id}"))
            .await
            .expect("websocket connect");
        Self { ws }
    }

    async fn send(&mut self, frame: ClientFrame) {
        let text = serde_json::to_string(&frame).unwrap();
        self.ws.send(Message::Text(text)).await.unwrap();
    }

    async fn join(&mut self, peer_id: &str) -> ServerFrame {
        self.send(ClientFrame::Join {
            peer_id: peer_id.into(),
        })
        .await;
        self.recv().await
    }

    async fn recv(&mut self) -> ServerFrame {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("timed out waiting for relay frame")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn expect_silence(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_millis(200), self.ws.next()).await;
        assert!(outcome.is_err(), "expected no frame, got {outcome:?}");
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[tokio::test]
async fn roles_assigned_by_arrival_order() {
    let addr = spawn_relay().await;
    let mut first = TestClient::connect(&addr, "482913").await;
    let mut second = TestClient::connect(&addr, "482913").await;

    match first.join("alpha").await {
        ServerFrame::JoinAck {
            session_id,
            peer_id,
            role,
        } => {
            assert_eq!(session_id, "482913");
            assert_eq!(peer_id, "alpha");
            assert_eq!(role, PeerRole::Impolite);
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    match second.join("beta").await {
        ServerFrame::JoinAck { role, .. } => assert_eq!(role, PeerRole::Polite),
        other => panic!("unexpected frame: {other:?}"),
    }

    // The existing member hears about the arrival; the arrival itself only
    // gets the ack.
    match first.recv().await {
        ServerFrame::PeerJoined { peer_id } => assert_eq!(peer_id, "beta"),
        other => panic!("unexpected frame: {other:?}"),
    }
    second.expect_silence().await;
}

#[tokio::test]
async fn third_join_is_rejected_and_disconnected() {
    let addr = spawn_relay().await;
    let mut first = TestClient::connect(&addr, "111111").await;
    let mut second = TestClient::connect(&addr, "111111").await;
    first.join("alpha").await;
    second.join("beta").await;

    let mut third = TestClient::connect(&addr, "111111").await;
    match third.join("gamma").await {
        ServerFrame::JoinError { reason } => assert_eq!(reason, "session is full"),
        other => panic!("unexpected frame: {other:?}"),
    }

    // The relay closes the rejected connection.
    let next = tokio::time::timeout(Duration::from_secs(2), third.ws.next())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(next, None | Some(Ok(Message::Close(_)))));

    // Members never hear about the rejected arrival.
    first.recv().await; // beta's peer_joined
    first.expect_silence().await;
    second.expect_silence().await;
}

#[tokio::test]
async fn signals_reach_only_the_other_member() {
    let addr = spawn_relay().await;
    let mut first = TestClient::connect(&addr, "222222").await;
    let mut second = TestClient::connect(&addr, "222222").await;
    first.join("alpha").await;
    second.join("beta").await;
    first.recv().await; // peer_joined

    let payload = json!({"description": {"type": "offer", "sdp": "v=0"}});
    first
        .send(ClientFrame::Signal {
            payload: payload.clone(),
        })
        .await;

    match second.recv().await {
        ServerFrame::Signal {
            from_peer,
            payload: relayed,
        } => {
            assert_eq!(from_peer, "alpha");
            assert_eq!(relayed, payload);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    first.expect_silence().await;
}

#[tokio::test]
async fn signal_with_no_audience_is_a_silent_no_op() {
    let addr = spawn_relay().await;
    let mut first = TestClient::connect(&addr, "333333").await;
    first.join("alpha").await;

    first
        .send(ClientFrame::Signal {
            payload: json!({"candidate": null}),
        })
        .await;

    // The connection stays healthy and no error comes back.
    first.send(ClientFrame::Ping).await;
    assert!(matches!(first.recv().await, ServerFrame::Pong));
}

#[tokio::test]
async fn signal_before_join_is_refused() {
    let addr = spawn_relay().await;
    let mut client = TestClient::connect(&addr, "444444").await;
    client
        .send(ClientFrame::Signal {
            payload: json!({"candidate": null}),
        })
        .await;
    assert!(matches!(client.recv().await, ServerFrame::Error { .. }));
}

#[tokio::test]
async fn disconnect_notifies_the_remaining_member() {
    let addr = spawn_relay().await;
    let mut first = TestClient::connect(&addr, "555555").await;
    let second = {
        let mut second = TestClient::connect(&addr, "555555").await;
        first.join("alpha").await;
        second.join("beta").await;
        second
    };
    first.recv().await; // peer_joined

    second.close().await;
    match first.recv().await {
        ServerFrame::PeerLeft { peer_id } => assert_eq!(peer_id, "beta"),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn released_session_id_can_be_reused() {
    let addr = spawn_relay().await;
    let first = {
        let mut first = TestClient::connect(&addr, "666666").await;
        first.join("alpha").await;
        first
    };
    first.close().await;

    // Cleanup races the close; retry until the id hands out impolite again.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let mut next = TestClient::connect(&addr, "666666").await;
        match next.join("gamma").await {
            ServerFrame::JoinAck {
                role: PeerRole::Impolite,
                ..
            } => break,
            _ => next.close().await,
        }
        if tokio::time::Instant::now() > deadline {
            panic!("session id was never released");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn malformed_session_id_is_rejected_before_upgrade() {
    let addr = spawn_relay().await;
    assert!(connect_async(format!("ws://{addr}/ws/lobby")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/ws/12345")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/ws/1234567")).await.is_err());
}
