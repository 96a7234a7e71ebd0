//! Sessions over TCP: listener, loopback self check and dialing.

use std::time::Duration;

use tracing::Span;

use dst_node_channel::{new_channel, new_session, ChannelConfig, ChannelError, MessageStatus};
use dst_node_core::Role;
use dst_node_testkit::fixtures::{alice, bob, carol};

fn config() -> ChannelConfig {
    ChannelConfig {
        message_timeout: Duration::from_secs(5),
        ..ChannelConfig::default()
    }
}

#[tokio::test]
async fn test_session_accepts_identified_channel() {
    let (a, b) = (alice(), bob());
    let mut bob_id = b.id.clone();
    let (listener, mut incoming) = new_session(&mut bob_id, &config(), Span::none())
        .await
        .unwrap();
    assert_ne!(bob_id.listener_ip_addr, "127.0.0.1:0");
    assert_eq!(listener.local_addr().port().to_string(), bob_id.listener_ip_addr.rsplit_once(':').unwrap().1);

    let mut outgoing = new_channel(&a.id, &bob_id, &config(), Span::none()).await.unwrap();
    assert_eq!(outgoing.role_channel(), Role::Sender);
    assert_eq!(outgoing.peer_id().unwrap().on_chain_id, b.address());

    let mut accepted = incoming.recv().await.unwrap();
    assert_eq!(accepted.role_channel(), Role::Receiver);
    assert_eq!(accepted.peer_id().unwrap().on_chain_id, a.address());

    let (reply, ()) = tokio::join!(outgoing.new_channel_request(), async {
        let request = accepted.new_channel_read().await.unwrap();
        accepted
            .new_channel_respond(&request, MessageStatus::Accept, "")
            .await
            .unwrap();
    });
    assert!(reply.unwrap().accepted());

    outgoing.close().await.unwrap();
    listener.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_dial_rejects_wrong_identity() {
    let (a, b, c) = (alice(), bob(), carol());
    let mut bob_id = b.id.clone();
    let (listener, _incoming) = new_session(&mut bob_id, &config(), Span::none())
        .await
        .unwrap();

    // Carol's identity at Bob's address.
    let mut impostor = c.id.clone();
    impostor.listener_ip_addr = bob_id.listener_ip_addr.clone();

    let err = new_channel(&a.id, &impostor, &config(), Span::none())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChannelError::PeerIdentityMismatch { expected, got }
            if expected == c.address() && got == b.address()
    ));
    listener.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_dial_without_listener_fails() {
    let (a, b) = (alice(), bob());
    let mut nobody = b.id.clone();
    nobody.listener_ip_addr = "127.0.0.1:1".into();
    assert!(matches!(
        new_channel(&a.id, &nobody, &config(), Span::none()).await,
        Err(ChannelError::Io(_))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let b = bob();
    let mut bob_id = b.id.clone();
    let (listener, _incoming) = new_session(&mut bob_id, &config(), Span::none())
        .await
        .unwrap();
    listener.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(new_channel(&alice().id, &bob_id, &config(), Span::none())
        .await
        .is_err());
}
