//! Ports to the untrusted relay: message storage and the public-key directory.
//!
//! The relay only ever sees ciphertext and public keys; nothing behind these
//! traits decrypts anything.

mod http;
mod memory;

pub use http::HttpRelay;
pub use memory::MemoryRelay;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;
use crate::wire::{Message, OutgoingMessage, PublishKeyRequest, PublishedKey};

/// Append/query store for ciphertext messages.
#[async_trait]
pub trait Relay: Send + Sync {
    /// All messages between `a` and `b` (either direction), oldest first.
    async fn fetch_messages(&self, a: &Address, b: &Address) -> Result<Vec<Message>>;

    /// Append one message; the relay assigns id and timestamp.
    async fn post_message(&self, message: OutgoingMessage) -> Result<Message>;
}

/// Address-keyed directory of published KEM public keys.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// `Ok(None)` when `address` has not published yet.
    async fn fetch_public_key(&self, address: &Address) -> Result<Option<PublishedKey>>;

    /// Idempotent upsert keyed by address.
    async fn publish_public_key(&self, request: PublishKeyRequest) -> Result<()>;
}
