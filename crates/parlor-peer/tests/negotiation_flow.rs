//! Two mock-backed participants wired through an in-memory signaling link,
//! exercising the full perfect-negotiation flows: clean handshake, glare,
//! reset lockstep and the impolite peer's silent local rebuild.

use std::sync::Arc;
use std::time::Duration;

use parlor_peer::mock::{MockSession, MockSessionFactory};
use parlor_peer::signal::{CandidateInit, DescriptionKind, SignalingPhase};
use parlor_peer::{in_memory_link, MediaAttachment, MediaSessionManager, PeerSession, Role};

/// Poll until `condition` holds or the deadline passes.
async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn stable(session: &Arc<MockSession>) -> bool {
    use parlor_peer::TransportSession;
    session.signaling_phase() == SignalingPhase::Stable
}

async fn spawn_pair(
    impolite_media: Vec<MediaAttachment>,
    polite_media: Vec<MediaAttachment>,
) -> (Arc<MockSessionFactory>, Arc<MockSessionFactory>) {
    let impolite_factory = MockSessionFactory::new("impolite");
    let polite_factory = MockSessionFactory::new("polite");
    let (impolite_handle, polite_handle) = in_memory_link();

    let impolite = PeerSession::start(
        impolite_factory.clone(),
        impolite_handle,
        MediaSessionManager::with_attachments(impolite_media),
    )
    .await
    .expect("impolite start");
    assert_eq!(impolite.role(), Role::Impolite);

    let polite = PeerSession::start(
        polite_factory.clone(),
        polite_handle,
        MediaSessionManager::with_attachments(polite_media),
    )
    .await
    .expect("polite start");
    assert_eq!(polite.role(), Role::Polite);

    tokio::spawn(impolite.run());
    tokio::spawn(polite.run());
    (impolite_factory, polite_factory)
}

#[tokio::test]
async fn clean_handshake_reaches_stable() {
    let (impolite_factory, polite_factory) =
        spawn_pair(vec![MediaAttachment::data_channel("chat")], vec![]).await;

    let impolite = impolite_factory.session(0).unwrap();
    let polite = polite_factory.session(0).unwrap();

    wait_for("handshake completes", || {
        !impolite.applied_remote_descriptions().is_empty()
            && stable(&impolite)
            && stable(&polite)
    })
    .await;

    // Offer landed on the polite side, answer came back.
    let polite_applied = polite.applied_remote_descriptions();
    assert_eq!(polite_applied.len(), 1);
    assert_eq!(polite_applied[0].kind, DescriptionKind::Offer);

    let impolite_applied = impolite.applied_remote_descriptions();
    assert_eq!(impolite_applied.len(), 1);
    assert_eq!(impolite_applied[0].kind, DescriptionKind::Answer);
}

#[tokio::test]
async fn glare_resolves_with_impolite_offer_winning() {
    // Both sides attach media, so both offer immediately.
    let (impolite_factory, polite_factory) = spawn_pair(
        vec![MediaAttachment::data_channel("chat")],
        vec![MediaAttachment::video("camera")],
    )
    .await;

    let impolite = impolite_factory.session(0).unwrap();
    let polite = polite_factory.session(0).unwrap();

    wait_for("glare settles", || {
        !impolite.applied_remote_descriptions().is_empty()
            && !polite.applied_remote_descriptions().is_empty()
            && stable(&impolite)
            && stable(&polite)
    })
    .await;

    // The polite peer yielded: it applied the impolite peer's offer.
    assert!(polite
        .applied_remote_descriptions()
        .iter()
        .any(|d| d.kind == DescriptionKind::Offer));

    // The impolite peer never applied the colliding offer, only the answer.
    let impolite_applied = impolite.applied_remote_descriptions();
    assert!(!impolite_applied.is_empty());
    assert!(impolite_applied
        .iter()
        .all(|d| d.kind != DescriptionKind::Offer));
}

#[tokio::test]
async fn polite_reset_propagates_in_lockstep() {
    let (impolite_factory, polite_factory) =
        spawn_pair(vec![MediaAttachment::data_channel("chat")], vec![]).await;

    let impolite = impolite_factory.session(0).unwrap();
    let polite = polite_factory.session(0).unwrap();
    wait_for("initial handshake", || {
        !impolite.applied_remote_descriptions().is_empty()
            && stable(&impolite)
            && stable(&polite)
    })
    .await;

    // The next remote description on the polite side fails to apply, which
    // must trigger its reset protocol and drag the impolite side along via
    // the _reset signal.
    polite.fail_remote_descriptions(1);
    impolite.trigger_negotiation_needed();

    wait_for("both sides rebuilt", || {
        impolite_factory.created_count() == 2 && polite_factory.created_count() == 2
    })
    .await;

    assert!(impolite.is_closed());
    assert!(polite.is_closed());

    // The impolite re-offer wins the post-reset race and the fresh sessions
    // converge to stable.
    let impolite2 = impolite_factory.session(1).unwrap();
    let polite2 = polite_factory.session(1).unwrap();
    wait_for("post-reset handshake", || {
        !polite2.applied_remote_descriptions().is_empty()
            && stable(&impolite2)
            && stable(&polite2)
    })
    .await;
    assert!(polite2
        .applied_remote_descriptions()
        .iter()
        .any(|d| d.kind == DescriptionKind::Offer));
}

#[tokio::test]
async fn impolite_rebuilds_on_local_failure_without_reset_signal() {
    // Both sides carry media. Whatever the glare ordering, the first remote
    // description the impolite side actually applies is made to fail, which
    // must trigger its own rebuild.
    let impolite_factory = MockSessionFactory::new("impolite");
    let polite_factory = MockSessionFactory::new("polite");
    let (impolite_handle, polite_handle) = in_memory_link();

    let impolite_session = PeerSession::start(
        impolite_factory.clone(),
        impolite_handle,
        MediaSessionManager::with_attachments(vec![MediaAttachment::data_channel("chat")]),
    )
    .await
    .unwrap();
    let polite_session = PeerSession::start(
        polite_factory.clone(),
        polite_handle,
        MediaSessionManager::with_attachments(vec![MediaAttachment::video("camera")]),
    )
    .await
    .unwrap();

    impolite_factory.session(0).unwrap().fail_remote_descriptions(1);

    tokio::spawn(impolite_session.run());
    tokio::spawn(polite_session.run());

    wait_for("impolite rebuilds", || impolite_factory.created_count() == 2).await;

    // An impolite peer recovers silently: no _reset crosses the wire, so the
    // polite peer keeps its original transport session.
    let impolite2 = impolite_factory.session(1).unwrap();
    let polite1 = polite_factory.session(0).unwrap();
    wait_for("recovery handshake", || {
        !impolite2.applied_remote_descriptions().is_empty()
            && stable(&impolite2)
            && stable(&polite1)
    })
    .await;
    assert_eq!(polite_factory.created_count(), 1);
}

#[tokio::test]
async fn candidates_trickle_in_order_with_null_terminator() {
    let (impolite_factory, polite_factory) =
        spawn_pair(vec![MediaAttachment::data_channel("chat")], vec![]).await;

    let impolite = impolite_factory.session(0).unwrap();
    let polite = polite_factory.session(0).unwrap();
    wait_for("handshake", || {
        !impolite.applied_remote_descriptions().is_empty()
            && stable(&impolite)
            && stable(&polite)
    })
    .await;

    impolite.emit_local_candidate(Some(CandidateInit {
        candidate: "candidate:1 1 udp 2113937151 192.0.2.1 54400 typ host".into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }));
    impolite.emit_local_candidate(None);

    wait_for("candidates applied", || {
        polite.applied_candidates().len() == 2
    })
    .await;
    let applied = polite.applied_candidates();
    assert!(applied[0].is_some());
    assert!(applied[1].is_none(), "null candidate applied, not rejected");
}
