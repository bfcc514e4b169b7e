#![cfg(feature = "gateway")]

use std::sync::Arc;
use std::time::Duration;

use broadcaster::bus::MemoryBus;
use broadcaster::gateway::{
    ChatSession, ClaimError, GatewayError, MemoryPeer, PeerFrame, Principal, StaticCredentials,
    TokenKind, memory_socket,
};
use broadcaster::{Broadcaster, Config};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

async fn setup() -> (Arc<Broadcaster>, Arc<ChatSession>) {
    let bus = MemoryBus::new();
    let config = Config::default();
    let broadcaster = Arc::new(Broadcaster::new(Arc::new(bus.client()), &config));
    broadcaster.connect().await.unwrap();

    let credentials = StaticCredentials::new()
        .with_token("alice-token", TokenKind::Access, "alice")
        .with_token("bob-token", TokenKind::Access, "bob");
    let session = Arc::new(ChatSession::new(
        Arc::clone(&broadcaster),
        Arc::new(credentials),
        &config,
    ));
    (broadcaster, session)
}

fn open(session: &Arc<ChatSession>) -> (MemoryPeer, JoinHandle<Result<Principal, GatewayError>>) {
    let (peer, source, sink) = memory_socket();
    let session = Arc::clone(session);
    let handle = tokio::spawn(async move { session.serve(source, sink).await });
    (peer, handle)
}

fn auth(token: &str) -> String {
    format!(r#"{{"type":"authorization","token":"{token}"}}"#)
}

async fn recv(peer: &mut MemoryPeer) -> Option<PeerFrame> {
    tokio::time::timeout(WAIT, peer.recv())
        .await
        .expect("frame within timeout")
}

async fn wait_subscribers(broadcaster: &Broadcaster, n: usize) {
    tokio::time::timeout(WAIT, async {
        while broadcaster.subscriber_count("chat") != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count reached");
}

#[tokio::test]
async fn test_chat_between_two_clients() {
    let (broadcaster, session) = setup().await;

    let (mut alice, alice_task) = open(&session);
    let (mut bob, bob_task) = open(&session);
    alice.send(auth("alice-token"));
    bob.send(auth("bob-token"));
    wait_subscribers(&broadcaster, 2).await;

    alice.send(r#"{"type":"message","message":"hi bob"}"#);
    assert_eq!(recv(&mut alice).await, Some(PeerFrame::Text("hi bob".into())));
    assert_eq!(recv(&mut bob).await, Some(PeerFrame::Text("hi bob".into())));

    alice.hang_up();
    assert_eq!(recv(&mut alice).await, Some(PeerFrame::Close(1001)));
    assert_eq!(alice_task.await.unwrap().unwrap(), Principal::new("alice"));
    wait_subscribers(&broadcaster, 1).await;

    // Shutting the broadcaster down ends the remaining session.
    broadcaster.disconnect().await.unwrap();
    assert_eq!(recv(&mut bob).await, Some(PeerFrame::Close(1001)));
    assert_eq!(bob_task.await.unwrap().unwrap(), Principal::new("bob"));
}

#[tokio::test]
async fn test_rejected_token_closes_session() {
    let (broadcaster, session) = setup().await;

    let (mut mallory, task) = open(&session);
    mallory.send(auth("forged"));

    let Some(PeerFrame::Text(frame)) = recv(&mut mallory).await else {
        panic!("expected error frame");
    };
    assert_eq!(
        frame,
        r#"{"type":"error","payload":{"code":401,"message":"Unauthorized"}}"#
    );
    assert_eq!(recv(&mut mallory).await, Some(PeerFrame::Close(1001)));
    assert!(matches!(
        task.await.unwrap(),
        Err(GatewayError::Unauthorized {
            reason: ClaimError::Invalid
        })
    ));
    assert_eq!(broadcaster.subscriber_count("chat"), 0);
    broadcaster.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_invalid_frame_ends_session() {
    let (broadcaster, session) = setup().await;

    let (mut alice, task) = open(&session);
    alice.send(auth("alice-token"));
    wait_subscribers(&broadcaster, 1).await;

    alice.send(r#"{"type":"message","message":7}"#);
    assert_eq!(recv(&mut alice).await, Some(PeerFrame::Close(1001)));
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.as_label(), "gateway_protocol");

    // The session's subscription was released with it.
    wait_subscribers(&broadcaster, 0).await;
    broadcaster.settle().await;
    assert!(broadcaster.channels().is_empty());
    broadcaster.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_times_out() {
    let (broadcaster, session) = setup().await;

    let (mut silent, task) = open(&session);
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::AuthTimeout { timeout } if timeout == Duration::from_secs(12)));
    assert_eq!(silent.recv().await, Some(PeerFrame::Close(1001)));
    broadcaster.disconnect().await.unwrap();
}
