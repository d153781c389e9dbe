use std::sync::Arc;
use std::time::Duration;

use nyaaya_crypto::kem::key_lengths;
use nyaaya_crypto::KemAlgorithm;
use tokio_util::sync::CancellationToken;

use crate::address::Address;
use crate::error::{ChatError, Result};
use crate::poller::Poller;
use crate::relay::KeyDirectory;

/// Looks up peers' published chat keys.
#[derive(Clone)]
pub struct PeerDirectory {
    directory: Arc<dyn KeyDirectory>,
    algorithm: KemAlgorithm,
    poll_interval: Duration,
}

impl PeerDirectory {
    pub fn new(
        directory: Arc<dyn KeyDirectory>,
        algorithm: KemAlgorithm,
        poll_interval: Duration,
    ) -> Self {
        Self {
            directory,
            algorithm,
            poll_interval,
        }
    }

    /// The peer's public key, or `None` if they have not published yet.
    ///
    /// A record that exists but cannot be used (other algorithm, bad length,
    /// bad encoding) is `MalformedPeerKey`, not `None`.
    pub async fn fetch_public_key(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        let Some(record) = self.directory.fetch_public_key(address).await? else {
            return Ok(None);
        };

        if record.algorithm != self.algorithm {
            return Err(ChatError::MalformedPeerKey {
                peer: address.clone(),
                reason: format!("published {} key, expected {}", record.algorithm, self.algorithm),
            });
        }
        let key = record.public_key_bytes()?;
        let (expected_len, _) = key_lengths(self.algorithm)?;
        if key.len() != expected_len {
            return Err(ChatError::MalformedPeerKey {
                peer: address.clone(),
                reason: format!("expected {expected_len} bytes, got {}", key.len()),
            });
        }
        Ok(Some(key))
    }

    /// Poll until the peer publishes a key or `cancel` fires.
    ///
    /// Absence and relay hiccups are retried; a malformed record ends the
    /// wait with an error since polling will not fix it.
    pub async fn wait_for_public_key(
        &self,
        address: &Address,
        cancel: CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let poller = Poller::new(self.poll_interval, cancel);
        let outcome = poller
            .poll_until(|| async move {
                match self.fetch_public_key(address).await {
                    Ok(Some(key)) => Some(Ok(key)),
                    Ok(None) => {
                        tracing::trace!(peer = %address, "peer key not published yet");
                        None
                    }
                    Err(e @ ChatError::MalformedPeerKey { .. }) => Some(Err(e)),
                    Err(e) => {
                        tracing::debug!(peer = %address, error = %e, "peer key lookup failed, retrying");
                        None
                    }
                }
            })
            .await;
        outcome.transpose()
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use nyaaya_crypto::{Kem, MlKem768};

    use super::*;
    use crate::relay::MemoryRelay;
    use crate::wire::PublishKeyRequest;

    fn peer() -> Address {
        "0xb4fb12dffcf9dbafa0f270a97d9498251c4a79d6".parse().unwrap()
    }

    fn directory(relay: &Arc<MemoryRelay>) -> PeerDirectory {
        PeerDirectory::new(relay.clone(), KemAlgorithm::MlKem768, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn absent_is_none_not_error() {
        let relay = Arc::new(MemoryRelay::new());
        assert_eq!(directory(&relay).fetch_public_key(&peer()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_algorithm_is_malformed() {
        let relay = Arc::new(MemoryRelay::new());
        relay
            .publish_public_key(PublishKeyRequest::new(peer(), KemAlgorithm::MlKem1024, &[0; 1568]))
            .await
            .unwrap();
        let err = directory(&relay).fetch_public_key(&peer()).await.unwrap_err();
        assert!(matches!(err, ChatError::MalformedPeerKey { .. }));
    }

    #[tokio::test]
    async fn wrong_length_is_malformed() {
        let relay = Arc::new(MemoryRelay::new());
        relay
            .publish_public_key(PublishKeyRequest::new(peer(), KemAlgorithm::MlKem768, &[0; 32]))
            .await
            .unwrap();
        let err = directory(&relay).fetch_public_key(&peer()).await.unwrap_err();
        assert!(matches!(err, ChatError::MalformedPeerKey { .. }));
    }

    #[tokio::test]
    async fn bad_base64_is_malformed() {
        let relay = Arc::new(MemoryRelay::new());
        let mut req = PublishKeyRequest::new(peer(), KemAlgorithm::MlKem768, &[]);
        req.public_key = "!!not base64!!".into();
        relay.publish_public_key(req).await.unwrap();
        let err = directory(&relay).fetch_public_key(&peer()).await.unwrap_err();
        assert!(matches!(err, ChatError::MalformedPeerKey { .. }));
    }

    #[tokio::test]
    async fn polling_picks_up_late_publish_and_stops() {
        let relay = Arc::new(MemoryRelay::new());
        let dir = directory(&relay);
        let pair = MlKem768.generate_keypair().unwrap();
        let expected = pair.public_key().to_vec();

        let publisher = {
            let relay = Arc::clone(&relay);
            let pk = expected.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(180)).await;
                relay
                    .publish_public_key(PublishKeyRequest::new(peer(), KemAlgorithm::MlKem768, &pk))
                    .await
                    .unwrap();
            })
        };

        let found = dir
            .wait_for_public_key(&peer(), CancellationToken::new())
            .await
            .unwrap();
        publisher.await.unwrap();
        assert_eq!(found, Some(expected));

        let lookups = relay.key_lookups();
        assert!(lookups >= 2, "polled {lookups} times");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(relay.key_lookups(), lookups, "polling continued after key was found");
    }

    #[tokio::test]
    async fn cancelled_wait_returns_none_and_stops_calling() {
        let relay = Arc::new(MemoryRelay::new());
        let dir = directory(&relay);
        let cancel = CancellationToken::new();

        let waiter = {
            let dir = dir.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dir.wait_for_public_key(&peer(), cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap().unwrap(), None);

        let lookups = relay.key_lookups();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(relay.key_lookups(), lookups);
    }

    #[test]
    fn published_key_round_trips_base64() {
        let req = PublishKeyRequest::new(peer(), KemAlgorithm::MlKem768, &[1, 2, 3]);
        assert_eq!(
            base64::engine::general_purpose::STANDARD.decode(&req.public_key).unwrap(),
            vec![1, 2, 3]
        );
    }
}
