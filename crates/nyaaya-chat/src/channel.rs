use std::sync::Arc;
use std::time::Duration;

use nyaaya_crypto::{Sealed, SessionKey};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::address::Address;
use crate::directory::PeerDirectory;
use crate::error::{ChatError, ErrorCategory, Result};
use crate::key_store::KeyStore;
use crate::poller::Poller;
use crate::relay::Relay;
use crate::session::{is_current, BootstrapOutcome, SessionManager};
use crate::wire::{Bootstrap, Message, OutgoingMessage};

/// Batches buffered by [`MessageChannel::watch`] before the refresh waits.
const WATCH_BUFFER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Plaintext(String),
    /// No session key with this peer yet.
    Pending,
    /// A key exists but the tag did not verify (stale key or tampering).
    Undecryptable,
}

/// A relay message together with what this side could make of it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: Message,
    pub direction: Direction,
    pub content: MessageContent,
}

impl ReceivedMessage {
    /// The empty message sent by [`MessageChannel::establish`].
    pub fn is_handshake(&self) -> bool {
        self.message.bootstrap.is_some()
            && matches!(&self.content, MessageContent::Plaintext(text) if text.is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Plaintext(text) => Some(text),
            MessageContent::Pending | MessageContent::Undecryptable => None,
        }
    }
}

struct ChannelInner {
    local: Address,
    peer: Address,
    relay: Arc<dyn Relay>,
    directory: PeerDirectory,
    key_store: Arc<KeyStore>,
    sessions: Arc<SessionManager>,
    peer_key: Mutex<Option<Arc<Vec<u8>>>>,
    refresh_interval: Duration,
}

/// The conversation between the local address and one peer.
///
/// Cheap to clone; clones share the cached peer key.
#[derive(Clone)]
pub struct MessageChannel {
    inner: Arc<ChannelInner>,
}

impl MessageChannel {
    pub fn new(
        local: Address,
        peer: Address,
        relay: Arc<dyn Relay>,
        directory: PeerDirectory,
        key_store: Arc<KeyStore>,
        sessions: Arc<SessionManager>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                local,
                peer,
                relay,
                directory,
                key_store,
                sessions,
                peer_key: Mutex::new(None),
                refresh_interval,
            }),
        }
    }

    pub fn local(&self) -> &Address {
        &self.inner.local
    }

    pub fn peer(&self) -> &Address {
        &self.inner.peer
    }

    /// The peer's public key, from cache or the directory.
    pub async fn peer_public_key(&self) -> Result<Arc<Vec<u8>>> {
        let cached = self.inner.peer_key.lock().clone();
        if let Some(key) = cached {
            return Ok(key);
        }
        let key = self
            .inner
            .directory
            .fetch_public_key(&self.inner.peer)
            .await?
            .ok_or_else(|| ChatError::NoPeerKey(self.inner.peer.clone()))?;
        Ok(self.cache_peer_key(key))
    }

    /// Poll the directory until the peer has published. `false` on cancel.
    pub async fn wait_for_peer(&self, cancel: CancellationToken) -> Result<bool> {
        if self.inner.peer_key.lock().is_some() {
            return Ok(true);
        }
        match self
            .inner
            .directory
            .wait_for_public_key(&self.inner.peer, cancel)
            .await?
        {
            Some(key) => {
                self.cache_peer_key(key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn cache_peer_key(&self, key: Vec<u8>) -> Arc<Vec<u8>> {
        let key = Arc::new(key);
        *self.inner.peer_key.lock() = Some(Arc::clone(&key));
        key
    }

    /// Start a fresh session and post an empty message carrying its bootstrap.
    pub async fn establish(&self) -> Result<Message> {
        let inner = &self.inner;
        inner.key_store.ensure_published(&inner.local).await;

        let peer_key = self.peer_public_key().await?;
        let (key, bootstrap) = inner.sessions.establish(&inner.peer, &peer_key)?;
        let sealed = key.encrypt("")?;
        let message = self.post(&sealed, Some(bootstrap)).await?;

        tracing::info!(peer = %inner.peer, id = %message.id, "chat channel established");
        Ok(message)
    }

    /// Encrypt and post `text`, bootstrapping a session first if needed.
    pub async fn send(&self, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let inner = &self.inner;
        let (key, bootstrap) = match inner.sessions.session_key(&inner.peer) {
            Some(key) => (key, None),
            None => {
                let peer_key = self.peer_public_key().await?;
                inner.sessions.key_for_send(&inner.peer, &peer_key)?
            }
        };
        let sealed = key.encrypt(text)?;
        let message = self.post(&sealed, bootstrap).await?;

        tracing::debug!(
            peer = %inner.peer,
            id = %message.id,
            bootstrap = message.bootstrap.is_some(),
            "sent chat message"
        );
        Ok(message)
    }

    async fn post(&self, sealed: &Sealed, bootstrap: Option<Bootstrap>) -> Result<Message> {
        let inner = &self.inner;
        let outgoing = OutgoingMessage::new(
            inner.local.clone(),
            inner.peer.clone(),
            &sealed.ciphertext,
            &sealed.nonce,
            bootstrap.as_ref(),
        );
        match inner.relay.post_message(outgoing).await {
            Ok(message) => Ok(message),
            Err(e) => {
                if let Some(bootstrap) = bootstrap {
                    if inner
                        .sessions
                        .discard_if_current(&inner.peer, &bootstrap.fingerprint())
                    {
                        tracing::debug!(peer = %inner.peer, "bootstrap not delivered, session discarded");
                    }
                }
                Err(e)
            }
        }
    }

    /// Fetch the whole conversation, oldest first, and decrypt what we can.
    ///
    /// Only the newest inbound bootstrap is acted on; older ones are
    /// superseded. When both sides bootstrapped at once, the one the relay
    /// stored last wins: if that is ours and still current, it is kept.
    pub async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let inner = &self.inner;
        let mut messages = inner.relay.fetch_messages(&inner.local, &inner.peer).await?;
        messages.sort_by_key(|m| m.timestamp);

        self.process_latest_bootstrap(&messages).await?;

        let key = inner.sessions.session_key(&inner.peer);
        Ok(messages
            .into_iter()
            .map(|m| self.open(m, key.as_deref()))
            .collect())
    }

    async fn process_latest_bootstrap(&self, messages: &[Message]) -> Result<()> {
        let inner = &self.inner;
        let newest = messages.iter().rev().find_map(|m| m.bootstrap.as_ref().map(|b| (m, b)));
        if let Some((newest, bootstrap)) = newest {
            if newest.from == inner.local
                && is_current(&inner.sessions.state(&inner.peer), &bootstrap.fingerprint())
            {
                return Ok(());
            }
        }

        let inbound = messages.iter().rev().find_map(|m| {
            m.bootstrap
                .as_ref()
                .filter(|_| m.from == inner.peer && m.to == inner.local)
                .map(|b| (m, b))
        });
        let Some((latest, bootstrap)) = inbound else {
            return Ok(());
        };

        match inner.sessions.accept_bootstrap(&inner.peer, bootstrap).await {
            Ok(BootstrapOutcome::Derived) => {
                tracing::info!(peer = %inner.peer, id = %latest.id, "session key derived from peer bootstrap");
            }
            Ok(BootstrapOutcome::AlreadyCurrent) => {}
            Err(e) if e.category() == ErrorCategory::Fatal => return Err(e),
            Err(e) => {
                tracing::warn!(peer = %inner.peer, id = %latest.id, error = %e, "ignoring unusable bootstrap");
            }
        }
        Ok(())
    }

    fn open(&self, message: Message, key: Option<&SessionKey>) -> ReceivedMessage {
        let direction = if message.from == self.inner.local {
            Direction::Outgoing
        } else {
            Direction::Incoming
        };
        let content = match key {
            None => MessageContent::Pending,
            Some(key) => match key.decrypt(&message.nonce, &message.ciphertext) {
                Ok(text) => MessageContent::Plaintext(text),
                Err(e) => {
                    tracing::trace!(id = %message.id, error = %e, "cannot decrypt message");
                    MessageContent::Undecryptable
                }
            },
        };
        ReceivedMessage {
            message,
            direction,
            content,
        }
    }

    /// Refresh the conversation every interval and deliver each batch.
    ///
    /// Stops when `cancel` fires or the receiver is dropped.
    pub fn watch(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<Vec<ReceivedMessage>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = cancel.child_token();
        let poller = Poller::new(self.inner.refresh_interval, cancel.clone());
        let channel = self.clone();

        let handle = poller.spawn_repeating(move || {
            let channel = channel.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move {
                match channel.receive().await {
                    Ok(batch) => {
                        if tx.send(batch).await.is_err() {
                            cancel.cancel();
                        }
                    }
                    Err(e) => {
                        tracing::debug!(peer = %channel.peer(), error = %e, "message refresh failed");
                    }
                }
            }
        });
        (rx, handle)
    }
}
