//! Post-quantum end-to-end encrypted chat between wallet addresses.
//!
//! Each party holds a long-term ML-KEM keypair and publishes the public half
//! to a directory. The first message to a peer carries a KEM bootstrap; both
//! sides derive the same AES-256-GCM session key from it and the relay only
//! ever stores ciphertext.

pub mod address;
pub mod channel;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod key_store;
pub mod poller;
pub mod relay;
pub mod session;
pub mod wire;

pub use address::Address;
pub use channel::{Direction, MessageChannel, MessageContent, ReceivedMessage};
pub use client::{ChatClient, ConnectedClient};
pub use config::ChatConfig;
pub use directory::PeerDirectory;
pub use error::{ChatError, ErrorCategory, Result};
pub use key_store::{KeyStore, LocalIdentity};
pub use poller::Poller;
pub use relay::{HttpRelay, KeyDirectory, MemoryRelay, Relay};
pub use session::{BootstrapOutcome, PeerSession, SessionManager, SessionState};
pub use wire::{
    ApiResponse, Bootstrap, BootstrapFingerprint, Message, MessageRecord, OutgoingMessage,
    PublishKeyRequest, PublishedKey,
};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
