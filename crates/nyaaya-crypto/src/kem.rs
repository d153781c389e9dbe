use std::fmt;
use std::str::FromStr;

use fips203::ml_kem_768;
use fips203::traits::{Decaps, Encaps, KeyGen, SerDes};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of every KEM shared secret, in bytes.
pub const SHARED_SECRET_LEN: usize = 32;

/// Post-quantum KEM parameter sets known to the chat protocol.
///
/// Only ML-KEM-768 is implemented locally; the others exist so that directory
/// records published by other clients can be recognised and rejected cleanly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KemAlgorithm {
    #[serde(rename = "MLKEM512")]
    MlKem512,
    #[default]
    #[serde(rename = "MLKEM768")]
    MlKem768,
    #[serde(rename = "MLKEM1024")]
    MlKem1024,
}

impl KemAlgorithm {
    /// The tag used on the wire and in the key store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MlKem512 => "MLKEM512",
            Self::MlKem768 => "MLKEM768",
            Self::MlKem1024 => "MLKEM1024",
        }
    }
}

impl fmt::Display for KemAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KemAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MLKEM512" => Ok(Self::MlKem512),
            "MLKEM768" => Ok(Self::MlKem768),
            "MLKEM1024" => Ok(Self::MlKem1024),
            other => Err(CryptoError::InvalidKey(format!(
                "unknown KEM algorithm: {other}"
            ))),
        }
    }
}

/// A long-term KEM keypair.
///
/// The private half never leaves the device; the public half is what gets
/// published to the peer directory.
#[derive(ZeroizeOnDrop)]
pub struct KemKeyPair {
    #[zeroize(skip)]
    algorithm: KemAlgorithm,
    public_key: Vec<u8>,
    private_key: Vec<u8>,
}

impl KemKeyPair {
    /// Rebuild a keypair from stored bytes, checking lengths for `algorithm`.
    pub fn from_parts(
        algorithm: KemAlgorithm,
        public_key: Vec<u8>,
        private_key: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        let (pk_len, sk_len) = key_lengths(algorithm)?;
        if public_key.len() != pk_len {
            return Err(CryptoError::InvalidKey(format!(
                "{algorithm} public key must be {pk_len} bytes, got {}",
                public_key.len()
            )));
        }
        if private_key.len() != sk_len {
            return Err(CryptoError::InvalidKey(format!(
                "{algorithm} private key must be {sk_len} bytes, got {}",
                private_key.len()
            )));
        }
        Ok(Self {
            algorithm,
            public_key,
            private_key,
        })
    }

    pub fn algorithm(&self) -> KemAlgorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// # Security
    /// Handle with care: this is the decapsulation key.
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &hex::encode(&self.public_key[..8.min(self.public_key.len())]))
            .finish_non_exhaustive()
    }
}

/// A KEM shared secret. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_LEN]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Result of encapsulating against a peer's public key.
#[derive(Debug)]
pub struct Encapsulation {
    /// Sent to the peer; only their private key opens it.
    pub ciphertext: Vec<u8>,
    /// Known to the caller now, and to the peer after decapsulation.
    pub shared_secret: SharedSecret,
}

/// A key-encapsulation mechanism.
///
/// Session code holds an `Arc<dyn Kem>` rather than calling the free
/// functions so that tests can observe how often each operation runs.
pub trait Kem: Send + Sync {
    /// The parameter set this KEM implements.
    fn algorithm(&self) -> KemAlgorithm;

    /// Generate a fresh keypair from the OS random source.
    fn generate_keypair(&self) -> Result<KemKeyPair, CryptoError>;

    /// Produce a ciphertext and shared secret for `peer_public_key`.
    fn encapsulate(&self, peer_public_key: &[u8]) -> Result<Encapsulation, CryptoError>;

    /// Recover the shared secret from `ciphertext`.
    ///
    /// A well-formed ciphertext opened with the wrong private key does NOT
    /// fail: ML-KEM implicit rejection returns an unrelated secret, and the
    /// mismatch only shows up later as an AEAD authentication failure.
    fn decapsulate(&self, ciphertext: &[u8], private_key: &[u8])
        -> Result<SharedSecret, CryptoError>;
}

/// FIPS 203 ML-KEM-768.
#[derive(Debug, Default, Clone, Copy)]
pub struct MlKem768;

impl MlKem768 {
    pub const PUBLIC_KEY_LEN: usize = ml_kem_768::EK_LEN;
    pub const PRIVATE_KEY_LEN: usize = ml_kem_768::DK_LEN;
    pub const CIPHERTEXT_LEN: usize = ml_kem_768::CT_LEN;
}

impl Kem for MlKem768 {
    fn algorithm(&self) -> KemAlgorithm {
        KemAlgorithm::MlKem768
    }

    fn generate_keypair(&self) -> Result<KemKeyPair, CryptoError> {
        let (ek, dk) = ml_kem_768::KG::try_keygen()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(KemKeyPair {
            algorithm: KemAlgorithm::MlKem768,
            public_key: ek.into_bytes().to_vec(),
            private_key: dk.into_bytes().to_vec(),
        })
    }

    fn encapsulate(&self, peer_public_key: &[u8]) -> Result<Encapsulation, CryptoError> {
        let bytes: [u8; MlKem768::PUBLIC_KEY_LEN] = peer_public_key.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "ML-KEM-768 public key must be {} bytes, got {}",
                MlKem768::PUBLIC_KEY_LEN,
                peer_public_key.len()
            ))
        })?;
        let ek = ml_kem_768::EncapsKey::try_from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let (ssk, ct) = ek
            .try_encaps()
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
        Ok(Encapsulation {
            ciphertext: ct.into_bytes().to_vec(),
            shared_secret: SharedSecret(ssk.into_bytes()),
        })
    }

    fn decapsulate(
        &self,
        ciphertext: &[u8],
        private_key: &[u8],
    ) -> Result<SharedSecret, CryptoError> {
        let ct_bytes: [u8; MlKem768::CIPHERTEXT_LEN] = ciphertext.try_into().map_err(|_| {
            CryptoError::InvalidCiphertext(format!(
                "ML-KEM-768 ciphertext must be {} bytes, got {}",
                MlKem768::CIPHERTEXT_LEN,
                ciphertext.len()
            ))
        })?;
        let dk_bytes: [u8; MlKem768::PRIVATE_KEY_LEN] = private_key.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "ML-KEM-768 private key must be {} bytes, got {}",
                MlKem768::PRIVATE_KEY_LEN,
                private_key.len()
            ))
        })?;
        let ct = ml_kem_768::CipherText::try_from_bytes(ct_bytes)
            .map_err(|e| CryptoError::InvalidCiphertext(e.to_string()))?;
        let dk = ml_kem_768::DecapsKey::try_from_bytes(dk_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let ssk = dk
            .try_decaps(&ct)
            .map_err(|e| CryptoError::InvalidCiphertext(e.to_string()))?;
        Ok(SharedSecret(ssk.into_bytes()))
    }
}

/// Generate an ML-KEM-768 keypair.
pub fn generate_keypair() -> Result<KemKeyPair, CryptoError> {
    MlKem768.generate_keypair()
}

/// Encapsulate against an ML-KEM-768 public key.
pub fn encapsulate(peer_public_key: &[u8]) -> Result<Encapsulation, CryptoError> {
    MlKem768.encapsulate(peer_public_key)
}

/// Decapsulate an ML-KEM-768 ciphertext.
pub fn decapsulate(ciphertext: &[u8], private_key: &[u8]) -> Result<SharedSecret, CryptoError> {
    MlKem768.decapsulate(ciphertext, private_key)
}

/// Expected `(public, private)` key lengths for a parameter set.
pub fn key_lengths(algorithm: KemAlgorithm) -> Result<(usize, usize), CryptoError> {
    match algorithm {
        KemAlgorithm::MlKem768 => Ok((MlKem768::PUBLIC_KEY_LEN, MlKem768::PRIVATE_KEY_LEN)),
        other => Err(CryptoError::InvalidKey(format!(
            "unsupported KEM algorithm: {other}"
        ))),
    }
}
