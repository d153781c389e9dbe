use std::sync::Arc;

use nyaaya_crypto::{Keychain, MlKem768};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::address::Address;
use crate::channel::{MessageChannel, ReceivedMessage};
use crate::config::ChatConfig;
use crate::directory::PeerDirectory;
use crate::error::Result;
use crate::key_store::{KeyStore, LocalIdentity};
use crate::relay::{HttpRelay, KeyDirectory, Relay};
use crate::session::SessionManager;

/// Entry point for one device profile.
///
/// Holds the long-term identity; every [`ConnectedClient`] made from it
/// shares the same keypair.
pub struct ChatClient {
    config: ChatConfig,
    relay: Arc<dyn Relay>,
    directory: Arc<dyn KeyDirectory>,
    identity: Arc<LocalIdentity>,
}

impl ChatClient {
    /// A client talking to the relay at `config.relay_url`.
    pub fn new(config: ChatConfig, keychain: Arc<dyn Keychain>) -> Result<Self> {
        config.validate()?;
        let http = Arc::new(HttpRelay::new(&config.relay_url, config.request_timeout())?);
        Self::with_relay(config, keychain, http.clone(), http)
    }

    /// A client over caller-supplied relay and directory ports.
    pub fn with_relay(
        config: ChatConfig,
        keychain: Arc<dyn Keychain>,
        relay: Arc<dyn Relay>,
        directory: Arc<dyn KeyDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            relay,
            directory,
            identity: Arc::new(LocalIdentity::new(keychain, Arc::new(MlKem768))),
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.identity
    }

    /// Bring `address` online: make sure a keypair exists and publish it.
    ///
    /// A failed publish is logged and retried on the next `republish` or
    /// `establish`; it does not stop the connection.
    pub async fn connect(&self, address: Address) -> Result<ConnectedClient> {
        self.identity.ensure_keypair().await?;

        let key_store = Arc::new(KeyStore::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.directory),
        ));
        key_store.ensure_published(&address).await;
        tracing::info!(address = %address, "chat client connected");

        Ok(ConnectedClient {
            directory: PeerDirectory::new(
                Arc::clone(&self.directory),
                self.identity.algorithm(),
                self.config.peer_poll_interval(),
            ),
            relay: Arc::clone(&self.relay),
            sessions: Arc::new(SessionManager::new(Arc::clone(&self.identity))),
            key_store,
            config: self.config.clone(),
            cancel: CancellationToken::new(),
            address,
        })
    }
}

/// A wallet address that is online for chat.
///
/// Owns the in-memory sessions and every poller started through it.
/// Dropping it has the same effect as [`ConnectedClient::disconnect`].
pub struct ConnectedClient {
    address: Address,
    config: ChatConfig,
    relay: Arc<dyn Relay>,
    directory: PeerDirectory,
    key_store: Arc<KeyStore>,
    sessions: Arc<SessionManager>,
    cancel: CancellationToken,
}

impl ConnectedClient {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// A token that fires on disconnect, for callers running their own loops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn channel(&self, peer: Address) -> MessageChannel {
        MessageChannel::new(
            self.address.clone(),
            peer,
            Arc::clone(&self.relay),
            self.directory.clone(),
            Arc::clone(&self.key_store),
            Arc::clone(&self.sessions),
            self.config.message_poll_interval(),
        )
    }

    /// Retry publishing our key if an earlier attempt failed.
    pub async fn republish(&self) -> bool {
        self.key_store.ensure_published(&self.address).await
    }

    /// Wait until `channel`'s peer publishes a key. `false` on disconnect.
    pub async fn wait_for_peer(&self, channel: &MessageChannel) -> Result<bool> {
        channel.wait_for_peer(self.cancel_token()).await
    }

    /// Refresh `channel` in the background until disconnect.
    pub fn watch(
        &self,
        channel: &MessageChannel,
    ) -> (mpsc::Receiver<Vec<ReceivedMessage>>, JoinHandle<()>) {
        channel.watch(self.cancel_token())
    }

    /// Stop every poller and forget all session keys. The keypair stays.
    pub fn disconnect(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.sessions.clear();
        self.key_store.mark_stale();
        tracing::info!(address = %self.address, "chat client disconnected");
    }
}

impl Drop for ConnectedClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nyaaya_crypto::{FileKeychain, MemoryKeychain};

    use super::*;
    use crate::error::ChatError;
    use crate::relay::MemoryRelay;
    use crate::session::SessionState;

    fn alice() -> Address {
        "0x4a5c98505d0b7a055db0ced8af6213e3210629f6".parse().unwrap()
    }

    fn bob() -> Address {
        "0xb4fb12dffcf9dbafa0f270a97d9498251c4a79d6".parse().unwrap()
    }

    fn fast_config() -> ChatConfig {
        ChatConfig {
            peer_poll_ms: 20,
            message_poll_ms: 20,
            ..ChatConfig::default()
        }
    }

    fn client(relay: &Arc<MemoryRelay>, keychain: Arc<dyn Keychain>) -> ChatClient {
        ChatClient::with_relay(fast_config(), keychain, relay.clone(), relay.clone()).unwrap()
    }

    #[test]
    fn zero_poll_interval_is_rejected_up_front() {
        let config: ChatConfig = serde_json::from_str(r#"{"peerPollMs":0}"#).unwrap();
        let relay = Arc::new(MemoryRelay::new());
        let err = ChatClient::with_relay(
            config.clone(),
            Arc::new(MemoryKeychain::new()),
            relay.clone(),
            relay,
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChatError::InvalidConfig(_)));
        assert!(matches!(
            ChatClient::new(config, Arc::new(MemoryKeychain::new())),
            Err(ChatError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn connect_publishes_key() {
        let relay = Arc::new(MemoryRelay::new());
        let chat = client(&relay, Arc::new(MemoryKeychain::new()));
        let connected = chat.connect(alice()).await.unwrap();

        let published = relay.fetch_public_key(&alice()).await.unwrap().unwrap();
        let pair = chat.identity().ensure_keypair().await.unwrap();
        assert_eq!(published.public_key_bytes().unwrap(), pair.public_key());
        assert!(connected.is_connected());
    }

    #[tokio::test]
    async fn disconnect_stops_pollers_and_clears_sessions() {
        let relay = Arc::new(MemoryRelay::new());
        let a = client(&relay, Arc::new(MemoryKeychain::new()));
        let b = client(&relay, Arc::new(MemoryKeychain::new()));
        let alice_online = a.connect(alice()).await.unwrap();
        let _bob_online = b.connect(bob()).await.unwrap();

        let to_bob = alice_online.channel(bob());
        to_bob.send("hello").await.unwrap();
        let (_rx, handle) = alice_online.watch(&to_bob);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let pk_before = a.identity().ensure_keypair().await.unwrap().public_key().to_vec();
        alice_online.disconnect();
        handle.await.unwrap();

        assert!(!alice_online.is_connected());
        assert!(matches!(alice_online.sessions().state(&bob()), SessionState::NoSession));
        let calls = relay.fetch_calls();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(relay.fetch_calls(), calls);
        assert_eq!(a.identity().ensure_keypair().await.unwrap().public_key(), &pk_before[..]);
    }

    #[tokio::test]
    async fn wait_for_peer_returns_false_on_disconnect() {
        let relay = Arc::new(MemoryRelay::new());
        let chat = client(&relay, Arc::new(MemoryKeychain::new()));
        let online = Arc::new(chat.connect(alice()).await.unwrap());
        let channel = online.channel(bob());

        let waiter = {
            let online = Arc::clone(&online);
            tokio::spawn(async move { online.wait_for_peer(&channel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        online.disconnect();
        assert!(!waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn reconnect_reuses_persisted_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keychain.json");
        let relay = Arc::new(MemoryRelay::new());

        let first = {
            let chat = client(&relay, Arc::new(FileKeychain::open(&path).unwrap()));
            let online = chat.connect(alice()).await.unwrap();
            online.disconnect();
            chat.identity().ensure_keypair().await.unwrap().public_key().to_vec()
        };

        let chat = client(&relay, Arc::new(FileKeychain::open(&path).unwrap()));
        let _online = chat.connect(alice()).await.unwrap();
        let published = relay.fetch_public_key(&alice()).await.unwrap().unwrap();
        assert_eq!(published.public_key_bytes().unwrap(), first);
    }
}
