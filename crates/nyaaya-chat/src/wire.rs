//! Message and directory records, in domain form and in the relay's JSON form.
//!
//! Binary fields cross the relay boundary as standard base64. A message
//! carries a bootstrap only when both `kemCiphertext` and `salt` are present.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use nyaaya_crypto::KemAlgorithm;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{ChatError, Result};

/// The one-time KEM material that lets the receiver derive the session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub kem_ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
}

impl Bootstrap {
    pub fn fingerprint(&self) -> BootstrapFingerprint {
        let mut hasher = Sha256::new();
        hasher.update((self.kem_ciphertext.len() as u64).to_be_bytes());
        hasher.update(&self.kem_ciphertext);
        hasher.update(&self.salt);
        BootstrapFingerprint(hex::encode(hasher.finalize()))
    }
}

/// Identifies the bootstrap a session key was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapFingerprint(String);

impl BootstrapFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BootstrapFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell sessions apart in logs.
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// A stored chat message. Immutable once the relay has accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub from: Address,
    pub to: Address,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    /// Relay-assigned, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub bootstrap: Option<Bootstrap>,
}

impl Message {
    /// True when this message travels between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &Address, b: &Address) -> bool {
        (&self.from == a && &self.to == b) || (&self.from == b && &self.to == a)
    }
}

/// A message as the relay stores and serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub from: Address,
    pub to: Address,
    pub ciphertext: String,
    pub nonce: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kem_ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// Body of `POST messages`; the relay assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub from: Address,
    pub to: Address,
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kem_ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl OutgoingMessage {
    pub fn new(
        from: Address,
        to: Address,
        ciphertext: &[u8],
        nonce: &[u8],
        bootstrap: Option<&Bootstrap>,
    ) -> Self {
        Self {
            from,
            to,
            ciphertext: STANDARD.encode(ciphertext),
            nonce: STANDARD.encode(nonce),
            kem_ciphertext: bootstrap.map(|b| STANDARD.encode(&b.kem_ciphertext)),
            salt: bootstrap.map(|b| STANDARD.encode(&b.salt)),
        }
    }

    /// The record the relay stores for this message.
    pub fn into_record(self, id: String, timestamp: u64) -> MessageRecord {
        let (kem_ciphertext, salt) = match (self.kem_ciphertext, self.salt) {
            (Some(ct), Some(salt)) if !ct.is_empty() && !salt.is_empty() => (Some(ct), Some(salt)),
            _ => (None, None),
        };
        MessageRecord {
            id,
            from: self.from,
            to: self.to,
            ciphertext: self.ciphertext,
            nonce: self.nonce,
            timestamp,
            kem_ciphertext,
            salt,
        }
    }
}

impl TryFrom<MessageRecord> for Message {
    type Error = ChatError;

    fn try_from(record: MessageRecord) -> Result<Self> {
        let bootstrap = match (&record.kem_ciphertext, &record.salt) {
            (Some(ct), Some(salt)) => Some(Bootstrap {
                kem_ciphertext: decode_field(&record.id, "kemCiphertext", ct)?,
                salt: decode_field(&record.id, "salt", salt)?,
            }),
            _ => None,
        };
        Ok(Self {
            ciphertext: decode_field(&record.id, "ciphertext", &record.ciphertext)?,
            nonce: decode_field(&record.id, "nonce", &record.nonce)?,
            id: record.id,
            from: record.from,
            to: record.to,
            timestamp: record.timestamp,
            bootstrap,
        })
    }
}

fn decode_field(id: &str, field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| ChatError::MalformedRecord(format!("message {id}: {field}: {e}")))
}

/// A directory entry: one per address, overwritten on republish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedKey {
    pub address: Address,
    pub algorithm: KemAlgorithm,
    pub public_key: String,
    pub updated_at: u64,
}

impl PublishedKey {
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        STANDARD.decode(&self.public_key).map_err(|e| ChatError::MalformedPeerKey {
            peer: self.address.clone(),
            reason: format!("invalid base64: {e}"),
        })
    }
}

/// Body of `POST publicKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishKeyRequest {
    pub address: Address,
    #[serde(default)]
    pub algorithm: KemAlgorithm,
    pub public_key: String,
}

impl PublishKeyRequest {
    pub fn new(address: Address, algorithm: KemAlgorithm, public_key: &[u8]) -> Self {
        Self {
            address,
            algorithm,
            public_key: STANDARD.encode(public_key),
        }
    }
}

/// Envelope wrapping every relay response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
