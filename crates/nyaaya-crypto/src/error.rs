use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("secure random source unavailable: {0}")]
    RandomUnavailable(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid KEM ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("invalid nonce: expected {expected} bytes, got {actual}")]
    InvalidNonce { expected: usize, actual: usize },

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    EncryptionError(String),

    /// The AEAD tag did not verify: wrong key, corrupted or tampered data.
    #[error("message authentication failed")]
    Authentication,

    #[error("decrypted plaintext is not valid UTF-8")]
    Encoding,

    #[error("key storage error: {0}")]
    StorageError(String),
}
