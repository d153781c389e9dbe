mod file;
mod memory;

pub use file::FileKeychain;
pub use memory::MemoryKeychain;

use crate::CryptoError;

/// Trait for key storage, abstracting over the actual backend.
///
/// The chat layer only ever sees this trait; whether keys live in a JSON file
/// on disk or in process memory is decided by whoever builds the identity.
pub trait Keychain: Send + Sync {
    /// Store a key under a vault/key pair.
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError>;

    /// Retrieve a key from a vault/key pair.
    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Delete a key from a vault/key pair.
    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError>;

    /// Check if a key exists.
    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError> {
        Ok(self.load_key(vault, key)?.is_some())
    }
}

/// Vault for the post-quantum chat identity.
pub const VAULT_PQC: &str = "pqc";
/// KEM public (encapsulation) key.
pub const KEY_KEM_PUBLIC: &str = "kem_public";
/// KEM private (decapsulation) key.
pub const KEY_KEM_PRIVATE: &str = "kem_private";
/// Algorithm tag of the stored keypair.
pub const KEY_KEM_ALGORITHM: &str = "kem_algorithm";

fn entry_name(vault: &str, key: &str) -> String {
    format!("{vault}/{key}")
}
