use std::path::{Path, PathBuf};

use nyaaya_chat::{Address, MessageRecord, OutgoingMessage, PublishKeyRequest, PublishedKey};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;

/// On-disk layout. Top-level keys the relay does not own are carried through
/// untouched so the file can be shared with other services.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    #[serde(default)]
    pqc_keys: Vec<PublishedKey>,
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

struct Inner {
    data: StoreData,
    last_timestamp: u64,
}

/// JSON file store for messages and published keys.
///
/// Reads are served from memory; every write rewrites the whole file through
/// a temporary sibling and a rename.
pub struct Store {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Store {
    /// Open the store at `path`, creating an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read(&path)?;
            if raw.iter().all(u8::is_ascii_whitespace) {
                StoreData::default()
            } else {
                serde_json::from_slice(&raw).map_err(|e| {
                    RelayError::Storage(format!("{} is not a valid store: {e}", path.display()))
                })?
            }
        } else {
            StoreData::default()
        };

        let last_timestamp = data.messages.iter().map(|m| m.timestamp).max().unwrap_or(0);
        let store = Self {
            path,
            inner: Mutex::new(Inner {
                data,
                last_timestamp,
            }),
        };
        if !store.path.exists() {
            store.persist(&store.inner.lock().data)?;
            tracing::info!(path = %store.path.display(), "created relay store");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Messages between `a` and `b` in either direction, oldest first.
    pub fn messages_between(&self, a: &Address, b: &Address) -> Vec<MessageRecord> {
        let mut found: Vec<MessageRecord> = self
            .inner
            .lock()
            .data
            .messages
            .iter()
            .filter(|m| (&m.from == a && &m.to == b) || (&m.from == b && &m.to == a))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.timestamp);
        found
    }

    /// Store `message` with a fresh id and timestamp.
    pub fn append_message(&self, message: OutgoingMessage) -> Result<MessageRecord, RelayError> {
        if message.ciphertext.is_empty() || message.nonce.is_empty() {
            return Err(RelayError::BadRequest("Missing ciphertext/nonce".into()));
        }

        let mut inner = self.inner.lock();
        let timestamp = nyaaya_chat::now_millis().max(inner.last_timestamp + 1);
        let record = message.into_record(new_id(timestamp), timestamp);

        inner.data.messages.push(record.clone());
        if let Err(e) = self.persist(&inner.data) {
            inner.data.messages.pop();
            return Err(e);
        }
        inner.last_timestamp = timestamp;
        Ok(record)
    }

    pub fn public_key(&self, address: &Address) -> Option<PublishedKey> {
        self.inner
            .lock()
            .data
            .pqc_keys
            .iter()
            .find(|k| &k.address == address)
            .cloned()
    }

    /// Insert or replace the key published under `request.address`.
    pub fn upsert_key(&self, request: PublishKeyRequest) -> Result<PublishedKey, RelayError> {
        if request.public_key.is_empty() {
            return Err(RelayError::BadRequest("Missing publicKey".into()));
        }

        let mut inner = self.inner.lock();
        let entry = PublishedKey {
            address: request.address,
            algorithm: request.algorithm,
            public_key: request.public_key,
            updated_at: nyaaya_chat::now_millis(),
        };
        let keys = &mut inner.data.pqc_keys;
        let previous = match keys.iter().position(|k| k.address == entry.address) {
            Some(i) => Some(std::mem::replace(&mut keys[i], entry.clone())),
            None => {
                keys.push(entry.clone());
                None
            }
        };

        if let Err(e) = self.persist(&inner.data) {
            let keys = &mut inner.data.pqc_keys;
            match previous {
                Some(old) => {
                    if let Some(slot) = keys.iter_mut().find(|k| k.address == old.address) {
                        *slot = old;
                    }
                }
                None => {
                    keys.retain(|k| k.address != entry.address);
                }
            }
            return Err(e);
        }
        Ok(entry)
    }

    fn persist(&self, data: &StoreData) -> Result<(), RelayError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// `<millis>-<random base36>`.
fn new_id(timestamp: u64) -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{timestamp}-{}", to_base36(suffix))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
