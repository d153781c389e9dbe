//! Two wallets chatting through an in-process relay.

use std::sync::Arc;
use std::time::Duration;

use nyaaya_chat::{
    Address, ChatClient, ChatConfig, Direction, KeyDirectory, MemoryRelay, MessageContent,
};
use nyaaya_crypto::{FileKeychain, MemoryKeychain};

fn alice() -> Address {
    "0x4a5c98505d0b7a055db0ced8af6213e3210629f6".parse().unwrap()
}

fn bob() -> Address {
    "0xB4FB12DFFCF9DBAFA0F270A97D9498251C4A79D6".parse().unwrap()
}

fn config() -> ChatConfig {
    ChatConfig {
        peer_poll_ms: 25,
        message_poll_ms: 25,
        ..ChatConfig::default()
    }
}

#[tokio::test]
async fn alice_and_bob_exchange_messages() {
    let relay = Arc::new(MemoryRelay::new());
    let dir = tempfile::tempdir().unwrap();
    let alice_chat = ChatClient::with_relay(
        config(),
        Arc::new(FileKeychain::open(dir.path().join("alice.json")).unwrap()),
        relay.clone(),
        relay.clone(),
    )
    .unwrap();
    let bob_chat = ChatClient::with_relay(
        config(),
        Arc::new(MemoryKeychain::new()),
        relay.clone(),
        relay.clone(),
    )
    .unwrap();

    let alice_online = alice_chat.connect(alice()).await.unwrap();
    let bob_online = bob_chat.connect(bob()).await.unwrap();

    let to_bob = alice_online.channel(bob());
    assert!(alice_online.wait_for_peer(&to_bob).await.unwrap());
    let hello = to_bob.send("hello").await.unwrap();
    assert!(hello.bootstrap.is_some());

    // The relay stores ciphertext only.
    let stored = relay.records();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].ciphertext.contains("hello"));
    assert!(stored[0].kem_ciphertext.is_some());
    assert!(stored[0].salt.is_some());

    let to_alice = bob_online.channel(alice());
    let inbox = to_alice.receive().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].content, MessageContent::Plaintext("hello".into()));

    let hi = to_alice.send("hi").await.unwrap();
    assert!(hi.bootstrap.is_none());

    let thread = to_bob.receive().await.unwrap();
    let view: Vec<_> = thread
        .iter()
        .map(|m| (m.direction, m.text().map(str::to_owned)))
        .collect();
    assert_eq!(
        view,
        vec![
            (Direction::Outgoing, Some("hello".to_owned())),
            (Direction::Incoming, Some("hi".to_owned())),
        ]
    );
}

#[tokio::test]
async fn late_peer_is_discovered_by_polling() {
    let relay = Arc::new(MemoryRelay::new());
    let alice_chat = ChatClient::with_relay(
        config(),
        Arc::new(MemoryKeychain::new()),
        relay.clone(),
        relay.clone(),
    )
    .unwrap();
    let alice_online = alice_chat.connect(alice()).await.unwrap();
    let to_bob = alice_online.channel(bob());

    assert!(relay.fetch_public_key(&bob()).await.unwrap().is_none());
    assert!(to_bob.send("anyone there?").await.is_err());

    let joiner = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let bob_chat = ChatClient::with_relay(
                config(),
                Arc::new(MemoryKeychain::new()),
                relay.clone(),
                relay,
            )
            .unwrap();
            let online = bob_chat.connect(bob()).await.unwrap();
            // Keep the keypair around for the rest of the test.
            (bob_chat, online)
        })
    };

    assert!(alice_online.wait_for_peer(&to_bob).await.unwrap());
    let (_bob_chat, bob_online) = joiner.await.unwrap();

    to_bob.establish().await.unwrap();
    to_bob.send("there you are").await.unwrap();

    let inbox = bob_online.channel(alice()).receive().await.unwrap();
    assert!(inbox[0].is_handshake());
    assert_eq!(inbox[1].text(), Some("there you are"));
}

#[tokio::test]
async fn watcher_sees_new_messages() {
    let relay = Arc::new(MemoryRelay::new());
    let make = || {
        ChatClient::with_relay(
            config(),
            Arc::new(MemoryKeychain::new()),
            relay.clone(),
            relay.clone(),
        )
        .unwrap()
    };
    let (alice_chat, bob_chat) = (make(), make());
    let alice_online = alice_chat.connect(alice()).await.unwrap();
    let bob_online = bob_chat.connect(bob()).await.unwrap();

    let to_alice = bob_online.channel(alice());
    let (mut batches, _handle) = bob_online.watch(&to_alice);

    alice_online.channel(bob()).send("are you watching").await.unwrap();

    let found = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(batch) = batches.recv().await {
            if let Some(m) = batch.iter().find(|m| m.text() == Some("are you watching")) {
                return m.direction;
            }
        }
        panic!("watch ended without delivering the message");
    })
    .await
    .unwrap();
    assert_eq!(found, Direction::Incoming);

    bob_online.disconnect();
    // Buffered batches drain, then the stream ends.
    tokio::time::timeout(Duration::from_secs(2), async {
        while batches.recv().await.is_some() {}
    })
    .await
    .unwrap();
}
