//! In-memory keychain.
//!
//! Suitable for tests and for ephemeral profiles. Data is lost on process exit.

use std::collections::HashMap;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use super::{entry_name, Keychain};
use crate::CryptoError;

#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.entries
            .lock()
            .insert(entry_name(vault, key), Zeroizing::new(data.to_vec()));
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self
            .entries
            .lock()
            .get(&entry_name(vault, key))
            .map(|v| v.to_vec()))
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        self.entries.lock().remove(&entry_name(vault, key));
        Ok(())
    }
}
