use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Symmetric key length (AES-256).
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// A sealed chat message: fresh nonce plus ciphertext-with-tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// The per-peer 256-bit session key.
///
/// Held only in memory. Encryption uses AES-256-GCM with a random nonce per
/// message, so one key can safely seal many messages.
#[derive(ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; KEY_LEN],
}

impl SessionKey {
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Generate a random key (tests and one-off use; sessions use the KDF).
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Encrypt UTF-8 text under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<Sealed, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        Ok(Sealed { nonce, ciphertext })
    }

    /// Decrypt and authenticate. Any tag mismatch is `Authentication`.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<String, CryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::InvalidNonce {
                expected: NONCE_LEN,
                actual: nonce.len(),
            });
        }
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::Authentication);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| CryptoError::Authentication)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Encoding)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = SessionKey::generate().unwrap();
        let long = "x".repeat(4096);
        for text in ["hello", "", "नमस्ते 🔐", long.as_str()] {
            let sealed = key.encrypt(text).unwrap();
            assert_eq!(sealed.ciphertext.len(), text.len() + TAG_LEN);
            assert_eq!(key.decrypt(&sealed.nonce, &sealed.ciphertext).unwrap(), text);
        }
    }

    #[test]
    fn nonces_are_fresh_per_call() {
        let key = SessionKey::generate().unwrap();
        let a = key.encrypt("same").unwrap();
        let b = key.encrypt("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_is_authentication_failure() {
        let key1 = SessionKey::generate().unwrap();
        let key2 = SessionKey::generate().unwrap();
        let sealed = key1.encrypt("secret").unwrap();
        assert!(matches!(
            key2.decrypt(&sealed.nonce, &sealed.ciphertext),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn every_ciphertext_bit_flip_is_detected() {
        let key = SessionKey::generate().unwrap();
        let sealed = key.encrypt("tamper me").unwrap();
        for i in 0..sealed.ciphertext.len() * 8 {
            let mut ct = sealed.ciphertext.clone();
            ct[i / 8] ^= 1 << (i % 8);
            assert!(matches!(
                key.decrypt(&sealed.nonce, &ct),
                Err(CryptoError::Authentication)
            ));
        }
    }

    #[test]
    fn every_nonce_bit_flip_is_detected() {
        let key = SessionKey::generate().unwrap();
        let sealed = key.encrypt("tamper me").unwrap();
        for i in 0..NONCE_LEN * 8 {
            let mut nonce = sealed.nonce;
            nonce[i / 8] ^= 1 << (i % 8);
            assert!(matches!(
                key.decrypt(&nonce, &sealed.ciphertext),
                Err(CryptoError::Authentication)
            ));
        }
    }

    #[test]
    fn bad_nonce_length_rejected() {
        let key = SessionKey::generate().unwrap();
        let sealed = key.encrypt("x").unwrap();
        assert!(matches!(
            key.decrypt(&sealed.nonce[..8], &sealed.ciphertext),
            Err(CryptoError::InvalidNonce { expected: 12, actual: 8 })
        ));
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let key = SessionKey::generate().unwrap();
        assert!(matches!(
            key.decrypt(&[0u8; NONCE_LEN], &[0u8; 5]),
            Err(CryptoError::Authentication)
        ));
    }
}
