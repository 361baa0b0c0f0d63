//! Full stack: two mock-backed participants negotiating through a live
//! relay over real websockets.

use std::time::Duration;

use parlor_peer::mock::MockSessionFactory;
use parlor_peer::signal::{DescriptionKind, SignalingPhase};
use parlor_peer::{
    MediaAttachment, MediaSessionManager, PeerSession, Role, SignalingClient, TransportSession,
};
use parlor_relay::{router, ChannelRegistry};

async fn spawn_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(ChannelRegistry::new());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn mock_peers_negotiate_through_the_relay() {
    let base = spawn_relay().await;

    let first = SignalingClient::connect(&base, "482913").await.unwrap();
    assert_eq!(first.role(), Role::Impolite);
    let second = SignalingClient::connect(&base, "482913").await.unwrap();
    assert_eq!(second.role(), Role::Polite);

    let impolite_factory = MockSessionFactory::new("impolite");
    let polite_factory = MockSessionFactory::new("polite");

    let impolite = PeerSession::start(
        impolite_factory.clone(),
        first,
        MediaSessionManager::with_attachments(vec![MediaAttachment::data_channel("chat")]),
    )
    .await
    .unwrap();
    let polite = PeerSession::start(
        polite_factory.clone(),
        second,
        MediaSessionManager::new(),
    )
    .await
    .unwrap();
    tokio::spawn(impolite.run());
    tokio::spawn(polite.run());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let settled = match (impolite_factory.session(0), polite_factory.session(0)) {
            (Some(impolite), Some(polite)) => {
                !polite.applied_remote_descriptions().is_empty()
                    && impolite.signaling_phase() == SignalingPhase::Stable
                    && polite.signaling_phase() == SignalingPhase::Stable
            }
            _ => false,
        };
        if settled {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("negotiation never settled");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let polite_applied = polite_factory.session(0).unwrap().applied_remote_descriptions();
    assert_eq!(polite_applied[0].kind, DescriptionKind::Offer);
    let impolite_applied = impolite_factory
        .session(0)
        .unwrap()
        .applied_remote_descriptions();
    assert_eq!(impolite_applied[0].kind, DescriptionKind::Answer);
}

#[tokio::test]
async fn dropping_a_handle_leaves_the_session_and_frees_its_slot() {
    let base = spawn_relay().await;
    let mut first = SignalingClient::connect(&base, "135790").await.unwrap();
    let second = SignalingClient::connect(&base, "135790").await.unwrap();

    match tokio::time::timeout(Duration::from_secs(2), first.recv()).await {
        Ok(Some(parlor_peer::PeerEvent::Joined { .. })) => {}
        other => panic!("expected peer joined, got {other:?}"),
    }

    // Dropping the handle must close the connection, not leak it.
    drop(second);
    match tokio::time::timeout(Duration::from_secs(2), first.recv()).await {
        Ok(Some(parlor_peer::PeerEvent::Left { .. })) => {}
        other => panic!("expected peer left, got {other:?}"),
    }

    // The freed slot admits a new participant as the polite peer.
    let third = SignalingClient::connect(&base, "135790").await.unwrap();
    assert_eq!(third.role(), Role::Polite);
}

#[tokio::test]
async fn third_participant_cannot_join_over_the_client() {
    let base = spawn_relay().await;
    let _first = SignalingClient::connect(&base, "987654").await.unwrap();
    let _second = SignalingClient::connect(&base, "987654").await.unwrap();

    let rejected = SignalingClient::connect(&base, "987654").await;
    assert!(matches!(
        rejected,
        Err(parlor_peer::SignalingError::JoinRejected(reason)) if reason == "session is full"
    ));
}

#[tokio::test]
async fn invalid_session_id_is_refused_client_side() {
    let rejected = SignalingClient::connect("http://127.0.0.1:1", "lobby").await;
    assert!(matches!(
        rejected,
        Err(parlor_peer::SignalingError::InvalidSessionId(_))
    ));
}
