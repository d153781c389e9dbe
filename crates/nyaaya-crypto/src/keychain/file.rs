use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;

use super::{entry_name, Keychain};
use crate::CryptoError;

/// A keychain persisted as one JSON document of base64 values.
///
/// This is the on-disk equivalent of a browser profile's local storage: one
/// file per device profile. Every mutation rewrites the file through a
/// temporary sibling and a rename so a crash never leaves it half-written.
pub struct FileKeychain {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeychain {
    /// Open (or lazily create) the keychain file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CryptoError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| CryptoError::StorageError(format!("read {}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| CryptoError::StorageError(format!("parse {}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), CryptoError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CryptoError::StorageError(format!("create dir: {e}")))?;
            }
        }
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| CryptoError::StorageError(format!("serialize: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| CryptoError::StorageError(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| CryptoError::StorageError(format!("rename: {e}")))?;
        Ok(())
    }
}

impl Keychain for FileKeychain {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        let mut entries = self.entries.lock();
        entries.insert(entry_name(vault, key), STANDARD.encode(data));
        self.persist(&entries)
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let entries = self.entries.lock();
        entries
            .get(&entry_name(vault, key))
            .map(|v| {
                STANDARD
                    .decode(v)
                    .map_err(|e| CryptoError::StorageError(format!("corrupt entry {vault}/{key}: {e}")))
            })
            .transpose()
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        let mut entries = self.entries.lock();
        if entries.remove(&entry_name(vault, key)).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeychain")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
