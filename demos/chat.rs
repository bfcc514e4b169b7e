//! # Demo: chat across two nodes
//!
//! Two broadcaster instances share one in-process bus, standing in for two
//! server processes behind a load balancer. Alice is connected to node A,
//! Bob to node B; each line either of them sends reaches both.
//!
//! ## Flow
//! ```text
//! alice ─► ChatSession(A) ─► Broadcaster A ─publish─► MemoryBus ─► Broadcaster A ─► alice
//!                                                         └──────► Broadcaster B ─► bob
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=broadcaster=debug cargo run --example chat
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broadcaster::bus::MemoryBus;
use broadcaster::gateway::{ChatSession, MemoryPeer, PeerFrame, StaticCredentials, TokenKind, memory_socket};
use broadcaster::{Broadcaster, Config};
use tracing_subscriber::EnvFilter;

struct Node {
    broadcaster: Arc<Broadcaster>,
    sessions: Arc<ChatSession>,
}

async fn start_node(bus: &MemoryBus, config: &Config, credentials: Arc<StaticCredentials>) -> anyhow::Result<Node> {
    let broadcaster = Arc::new(Broadcaster::new(Arc::new(bus.client()), config));
    broadcaster.connect().await.context("connect node")?;
    let sessions = Arc::new(ChatSession::new(Arc::clone(&broadcaster), credentials, config));
    Ok(Node {
        broadcaster,
        sessions,
    })
}

fn open_session(node: &Node, name: &'static str, token: &str) -> MemoryPeer {
    let (peer, source, sink) = memory_socket();
    peer.send(format!(r#"{{"type":"authorization","token":"{token}"}}"#));

    let sessions = Arc::clone(&node.sessions);
    tokio::spawn(async move {
        match sessions.serve(source, sink).await {
            Ok(principal) => println!("[{name}] session for {} ended", principal.id),
            Err(e) => println!("[{name}] session failed: {e}"),
        }
    });
    peer
}

async fn print_incoming(name: &'static str, mut peer: MemoryPeer) {
    while let Some(frame) = peer.recv().await {
        match frame {
            PeerFrame::Text(text) => println!("[{name}] <- {text}"),
            PeerFrame::Close(code) => {
                println!("[{name}] closed ({code})");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::default();
    let credentials = Arc::new(
        StaticCredentials::new()
            .with_token("alice-token", TokenKind::Access, "alice")
            .with_token("bob-token", TokenKind::Access, "bob"),
    );

    let bus = MemoryBus::new();
    let node_a = start_node(&bus, &config, Arc::clone(&credentials)).await?;
    let node_b = start_node(&bus, &config, credentials).await?;

    let alice = open_session(&node_a, "alice", "alice-token");
    let bob = open_session(&node_b, "bob", "bob-token");

    // Wait until both sessions listen on the channel.
    while node_a.broadcaster.subscriber_count(&config.channel) == 0
        || node_b.broadcaster.subscriber_count(&config.channel) == 0
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    alice.send(r#"{"type":"message","message":"hi bob, this is node A"}"#);
    bob.send(r#"{"type":"message","message":"hello alice, node B here"}"#);

    let readers = tokio::spawn(async move {
        tokio::join!(print_incoming("alice", alice), print_incoming("bob", bob));
    });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(200)) => {},
        _ = tokio::signal::ctrl_c() => println!("interrupted"),
    }

    node_a.broadcaster.disconnect().await.context("disconnect node A")?;
    node_b.broadcaster.disconnect().await.context("disconnect node B")?;
    readers.await.context("reader task")?;
    Ok(())
}
