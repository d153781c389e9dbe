use std::collections::HashMap;
use std::sync::Arc;

use nyaaya_crypto::{derive_session_key, random_salt, SessionKey};
use parking_lot::Mutex;

use crate::address::Address;
use crate::error::Result;
use crate::key_store::LocalIdentity;
use crate::wire::{Bootstrap, BootstrapFingerprint};

/// An established session with one peer.
///
/// Replaced wholesale on re-derivation; the key itself is never mutated.
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub key: Arc<SessionKey>,
    pub fingerprint: BootstrapFingerprint,
}

/// Per-peer protocol state.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    NoSession,
    Established(PeerSession),
}

/// Whether `state` was already derived from the bootstrap with `fingerprint`.
pub fn is_current(state: &SessionState, fingerprint: &BootstrapFingerprint) -> bool {
    matches!(state, SessionState::Established(s) if &s.fingerprint == fingerprint)
}

/// What happened when an inbound bootstrap was offered to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A new session key was derived and is now current.
    Derived,
    /// The bootstrap already produced the current key; nothing was done.
    AlreadyCurrent,
}

/// Session keys for every peer of one local identity.
///
/// Sender side: encapsulate against the peer's public key and hand back the
/// bootstrap to attach to the outgoing message. Receiver side: decapsulate an
/// inbound bootstrap, unless it is the one the current key came from.
pub struct SessionManager {
    identity: Arc<LocalIdentity>,
    sessions: Mutex<HashMap<Address, PeerSession>>,
}

impl SessionManager {
    pub fn new(identity: Arc<LocalIdentity>) -> Self {
        Self {
            identity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.identity
    }

    pub fn state(&self, peer: &Address) -> SessionState {
        self.sessions
            .lock()
            .get(peer)
            .cloned()
            .map_or(SessionState::NoSession, SessionState::Established)
    }

    pub fn session_key(&self, peer: &Address) -> Option<Arc<SessionKey>> {
        self.sessions.lock().get(peer).map(|s| Arc::clone(&s.key))
    }

    /// Start a fresh session with `peer`, replacing any current one.
    ///
    /// Returns the new key and the bootstrap the peer needs to derive it.
    pub fn establish(
        &self,
        peer: &Address,
        peer_public_key: &[u8],
    ) -> Result<(Arc<SessionKey>, Bootstrap)> {
        let (session, bootstrap) = self.outbound_session(peer_public_key)?;
        let key = Arc::clone(&session.key);
        tracing::debug!(peer = %peer, session = %session.fingerprint, "established outbound session");
        self.sessions.lock().insert(peer.clone(), session);
        Ok((key, bootstrap))
    }

    /// The key to send with: the current one, or a fresh session whose
    /// bootstrap must ride on the outgoing message.
    ///
    /// Concurrent callers from `NoSession` agree on one session; only the
    /// caller that installed it gets a bootstrap back.
    pub fn key_for_send(
        &self,
        peer: &Address,
        peer_public_key: &[u8],
    ) -> Result<(Arc<SessionKey>, Option<Bootstrap>)> {
        if let Some(key) = self.session_key(peer) {
            return Ok((key, None));
        }
        let (session, bootstrap) = self.outbound_session(peer_public_key)?;

        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(peer) {
            return Ok((Arc::clone(&existing.key), None));
        }
        let key = Arc::clone(&session.key);
        tracing::debug!(peer = %peer, session = %session.fingerprint, "established outbound session");
        sessions.insert(peer.clone(), session);
        Ok((key, Some(bootstrap)))
    }

    fn outbound_session(&self, peer_public_key: &[u8]) -> Result<(PeerSession, Bootstrap)> {
        let encapsulation = self.identity.kem().encapsulate(peer_public_key)?;
        let salt = random_salt()?;
        let key = derive_session_key(&encapsulation.shared_secret, &salt)?;

        let bootstrap = Bootstrap {
            kem_ciphertext: encapsulation.ciphertext,
            salt: salt.to_vec(),
        };
        let session = PeerSession {
            key: Arc::new(key),
            fingerprint: bootstrap.fingerprint(),
        };
        Ok((session, bootstrap))
    }

    /// Derive the session key carried by an inbound bootstrap from `peer`.
    ///
    /// Offering the bootstrap the current key came from is a no-op and
    /// performs no KEM work.
    pub async fn accept_bootstrap(
        &self,
        peer: &Address,
        bootstrap: &Bootstrap,
    ) -> Result<BootstrapOutcome> {
        let fingerprint = bootstrap.fingerprint();
        if is_current(&self.state(peer), &fingerprint) {
            return Ok(BootstrapOutcome::AlreadyCurrent);
        }

        let pair = self.identity.ensure_keypair().await?;

        // Re-check under the lock so concurrent callers decapsulate once.
        let mut sessions = self.sessions.lock();
        if sessions.get(peer).is_some_and(|s| s.fingerprint == fingerprint) {
            return Ok(BootstrapOutcome::AlreadyCurrent);
        }
        let shared_secret = self
            .identity
            .kem()
            .decapsulate(&bootstrap.kem_ciphertext, pair.private_key())?;
        let key = derive_session_key(&shared_secret, &bootstrap.salt)?;
        tracing::debug!(peer = %peer, session = %fingerprint, "derived session from inbound bootstrap");
        sessions.insert(
            peer.clone(),
            PeerSession {
                key: Arc::new(key),
                fingerprint,
            },
        );
        Ok(BootstrapOutcome::Derived)
    }

    /// Drop the session with `peer` only if it still comes from `fingerprint`.
    ///
    /// Used when the bootstrap never reached the relay: the peer cannot derive
    /// that key, so the next send has to bootstrap again.
    pub fn discard_if_current(&self, peer: &Address, fingerprint: &BootstrapFingerprint) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.get(peer).is_some_and(|s| &s.fingerprint == fingerprint) {
            sessions.remove(peer);
            return true;
        }
        false
    }

    /// Drop every session. The long-term keypair is untouched.
    pub fn clear(&self) {
        let mut sessions = self.sessions.lock();
        if !sessions.is_empty() {
            tracing::debug!(count = sessions.len(), "clearing chat sessions");
        }
        sessions.clear();
    }
}
