use std::sync::Arc;

use nyaaya_crypto::keychain::{KEY_KEM_ALGORITHM, KEY_KEM_PRIVATE, KEY_KEM_PUBLIC, VAULT_PQC};
use nyaaya_crypto::{CryptoError, Kem, KemAlgorithm, KemKeyPair, Keychain};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::address::Address;
use crate::error::{ChatError, Result};
use crate::relay::KeyDirectory;
use crate::wire::PublishKeyRequest;

/// The device profile's long-term chat identity.
///
/// Owns the persisted KEM keypair. Build one per profile and share it by
/// `Arc`; the keypair is loaded or generated at most once per instance no
/// matter how many tasks ask for it concurrently.
pub struct LocalIdentity {
    keychain: Arc<dyn Keychain>,
    kem: Arc<dyn Kem>,
    keypair: OnceCell<Arc<KemKeyPair>>,
}

impl LocalIdentity {
    pub fn new(keychain: Arc<dyn Keychain>, kem: Arc<dyn Kem>) -> Self {
        Self {
            keychain,
            kem,
            keypair: OnceCell::new(),
        }
    }

    pub fn kem(&self) -> &Arc<dyn Kem> {
        &self.kem
    }

    pub fn algorithm(&self) -> KemAlgorithm {
        self.kem.algorithm()
    }

    /// Return the persisted keypair, generating and persisting one first if
    /// this profile has none.
    pub async fn ensure_keypair(&self) -> Result<Arc<KemKeyPair>> {
        let pair = self
            .keypair
            .get_or_try_init(|| async {
                if let Some(existing) = self.load_persisted()? {
                    tracing::debug!(algorithm = %existing.algorithm(), "loaded chat keypair");
                    return Ok(Arc::new(existing));
                }

                let kem = Arc::clone(&self.kem);
                let generated = tokio::task::spawn_blocking(move || kem.generate_keypair())
                    .await
                    .map_err(|e| ChatError::Internal(format!("keygen task failed: {e}")))??;
                self.persist(&generated)?;
                tracing::info!(algorithm = %generated.algorithm(), "generated chat keypair");
                Ok::<_, ChatError>(Arc::new(generated))
            })
            .await?;
        Ok(Arc::clone(pair))
    }

    /// The keypair if one already exists; never generates.
    pub fn local_keypair(&self) -> Result<Option<Arc<KemKeyPair>>> {
        if let Some(pair) = self.keypair.get() {
            return Ok(Some(Arc::clone(pair)));
        }
        Ok(self.load_persisted()?.map(Arc::new))
    }

    pub fn has_keypair(&self) -> Result<bool> {
        Ok(self.keypair.initialized()
            || (self.keychain.key_exists(VAULT_PQC, KEY_KEM_PUBLIC)?
                && self.keychain.key_exists(VAULT_PQC, KEY_KEM_PRIVATE)?))
    }

    fn load_persisted(&self) -> Result<Option<KemKeyPair>> {
        let public = self.keychain.load_key(VAULT_PQC, KEY_KEM_PUBLIC)?;
        let private = self.keychain.load_key(VAULT_PQC, KEY_KEM_PRIVATE)?;
        let (Some(public), Some(private)) = (public, private) else {
            return Ok(None);
        };

        let algorithm = match self.keychain.load_key(VAULT_PQC, KEY_KEM_ALGORITHM)? {
            Some(tag) => String::from_utf8(tag)
                .map_err(|_| CryptoError::InvalidKey("stored algorithm tag is not UTF-8".into()))?
                .parse::<KemAlgorithm>()?,
            // Profiles written before the tag existed only ever held ML-KEM-768.
            None => KemAlgorithm::MlKem768,
        };
        if algorithm != self.kem.algorithm() {
            return Err(CryptoError::InvalidKey(format!(
                "stored keypair is {algorithm}, expected {}",
                self.kem.algorithm()
            ))
            .into());
        }
        Ok(Some(KemKeyPair::from_parts(algorithm, public, private)?))
    }

    fn persist(&self, pair: &KemKeyPair) -> Result<()> {
        self.keychain
            .store_key(VAULT_PQC, KEY_KEM_ALGORITHM, pair.algorithm().as_str().as_bytes())?;
        self.keychain
            .store_key(VAULT_PQC, KEY_KEM_PRIVATE, pair.private_key())?;
        self.keychain
            .store_key(VAULT_PQC, KEY_KEM_PUBLIC, pair.public_key())?;
        Ok(())
    }
}

/// Publishes the local public key to the peer directory.
pub struct KeyStore {
    identity: Arc<LocalIdentity>,
    directory: Arc<dyn KeyDirectory>,
    published_for: Mutex<Option<Address>>,
}

impl KeyStore {
    pub fn new(identity: Arc<LocalIdentity>, directory: Arc<dyn KeyDirectory>) -> Self {
        Self {
            identity,
            directory,
            published_for: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.identity
    }

    /// Upsert our public key under `address`.
    pub async fn publish(&self, address: &Address) -> Result<()> {
        let pair = self.identity.ensure_keypair().await?;
        let request = PublishKeyRequest::new(address.clone(), pair.algorithm(), pair.public_key());
        self.directory.publish_public_key(request).await?;
        *self.published_for.lock() = Some(address.clone());
        tracing::info!(address = %address, "published chat public key");
        Ok(())
    }

    /// Publish unless `address` is already published. Failures are logged,
    /// not returned, and the next call retries.
    pub async fn ensure_published(&self, address: &Address) -> bool {
        if self.published_for.lock().as_ref() == Some(address) {
            return true;
        }
        match self.publish(address).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "failed to publish chat key, will retry");
                false
            }
        }
    }

    /// Forget which address was published so the next trigger republishes.
    pub fn mark_stale(&self) {
        *self.published_for.lock() = None;
    }
}
