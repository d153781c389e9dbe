//! Chat clients talking to a real relay over loopback HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nyaaya_chat::{
    Address, ChatClient, ChatConfig, ChatError, HttpRelay, KeyDirectory, MessageContent, Relay,
};
use nyaaya_crypto::MemoryKeychain;
use nyaaya_relay::{router, Store};

struct RunningRelay {
    addr: SocketAddr,
    _dir: tempfile::TempDir,
    store_path: std::path::PathBuf,
}

async fn start_relay() -> RunningRelay {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.json");
    let store = Arc::new(Store::open(&store_path).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(store)).await.unwrap();
    });
    RunningRelay {
        addr,
        _dir: dir,
        store_path,
    }
}

fn config(relay: &RunningRelay) -> ChatConfig {
    ChatConfig {
        relay_url: format!("http://{}", relay.addr),
        peer_poll_ms: 50,
        message_poll_ms: 50,
        request_timeout_ms: 5_000,
    }
}

fn alice() -> Address {
    "0x4a5c98505d0b7a055db0ced8af6213e3210629f6".parse().unwrap()
}

fn bob() -> Address {
    "0xb4fb12dffcf9dbafa0f270a97d9498251c4a79d6".parse().unwrap()
}

#[tokio::test]
async fn hello_hi_over_http() {
    let relay = start_relay().await;
    let alice_chat = ChatClient::new(config(&relay), Arc::new(MemoryKeychain::new())).unwrap();
    let bob_chat = ChatClient::new(config(&relay), Arc::new(MemoryKeychain::new())).unwrap();

    let alice_online = alice_chat.connect(alice()).await.unwrap();
    let bob_online = bob_chat.connect(bob()).await.unwrap();

    let to_bob = alice_online.channel(bob());
    let sent = to_bob.send("hello").await.unwrap();
    assert!(sent.bootstrap.is_some());

    let to_alice = bob_online.channel(alice());
    let inbox = to_alice.receive().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, MessageContent::Plaintext("hello".into()));
    assert_eq!(inbox[0].message.id, sent.id);

    to_alice.send("hi").await.unwrap();
    let thread = to_bob.receive().await.unwrap();
    let texts: Vec<_> = thread.iter().filter_map(|m| m.text()).collect();
    assert_eq!(texts, vec!["hello", "hi"]);

    // Only ciphertext reached the disk.
    let on_disk = std::fs::read_to_string(&relay.store_path).unwrap();
    assert!(!on_disk.contains("hello"));
    assert!(on_disk.contains("kemCiphertext"));
}

#[tokio::test]
async fn directory_over_http() {
    let relay = start_relay().await;
    let http = HttpRelay::new(&format!("http://{}", relay.addr), Duration::from_secs(5)).unwrap();

    assert!(http.fetch_public_key(&bob()).await.unwrap().is_none());
    assert!(http.fetch_messages(&alice(), &bob()).await.unwrap().is_empty());

    let bob_chat = ChatClient::new(config(&relay), Arc::new(MemoryKeychain::new())).unwrap();
    let _bob_online = bob_chat.connect(bob()).await.unwrap();

    let published = http.fetch_public_key(&bob()).await.unwrap().unwrap();
    let pair = bob_chat.identity().ensure_keypair().await.unwrap();
    assert_eq!(published.public_key_bytes().unwrap(), pair.public_key());
}

#[tokio::test]
async fn rejected_request_surfaces_relay_error() {
    let relay = start_relay().await;
    let http = HttpRelay::new(&format!("http://{}", relay.addr), Duration::from_secs(5)).unwrap();

    let empty = nyaaya_chat::OutgoingMessage::new(alice(), bob(), b"", b"", None);
    let err = http.post_message(empty).await.unwrap_err();
    assert!(matches!(err, ChatError::RelayRejected { status: 400, .. }));
}
