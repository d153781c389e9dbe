use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KeyDirectory, Relay};
use crate::address::Address;
use crate::error::Result;
use crate::wire::{Message, MessageRecord, OutgoingMessage, PublishKeyRequest, PublishedKey};

/// In-process relay and key directory.
///
/// Same semantics as the HTTP relay (relay-assigned ids, strictly increasing
/// timestamps, upsert-by-address keys), without the network. Records are
/// kept in wire form so the base64 boundary is exercised exactly as over HTTP.
#[derive(Default)]
pub struct MemoryRelay {
    inner: Mutex<Inner>,
    fetch_calls: AtomicUsize,
    key_lookups: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    messages: Vec<MessageRecord>,
    keys: HashMap<Address, PublishedKey>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        let now = crate::now_millis();
        self.clock = now.max(self.clock + 1);
        self.clock
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch_messages` calls served so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_public_key` calls served so far.
    pub fn key_lookups(&self) -> usize {
        self.key_lookups.load(Ordering::SeqCst)
    }

    /// Raw stored records, for inspecting what the relay can see.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.inner.lock().messages.clone()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn fetch_messages(&self, a: &Address, b: &Address) -> Result<Vec<Message>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut records: Vec<MessageRecord> = self
            .inner
            .lock()
            .messages
            .iter()
            .filter(|m| (&m.from == a && &m.to == b) || (&m.from == b && &m.to == a))
            .cloned()
            .collect();
        records.sort_by_key(|m| m.timestamp);
        records.into_iter().map(Message::try_from).collect()
    }

    async fn post_message(&self, message: OutgoingMessage) -> Result<Message> {
        let record = {
            let mut inner = self.inner.lock();
            let timestamp = inner.tick();
            let id = format!("{timestamp}-{}", inner.messages.len());
            let record = message.into_record(id, timestamp);
            inner.messages.push(record.clone());
            record
        };
        Message::try_from(record)
    }
}

#[async_trait]
impl KeyDirectory for MemoryRelay {
    async fn fetch_public_key(&self, address: &Address) -> Result<Option<PublishedKey>> {
        self.key_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.lock().keys.get(address).cloned())
    }

    async fn publish_public_key(&self, request: PublishKeyRequest) -> Result<()> {
        let mut inner = self.inner.lock();
        let updated_at = inner.tick();
        inner.keys.insert(
            request.address.clone(),
            PublishedKey {
                address: request.address,
                algorithm: request.algorithm,
                public_key: request.public_key,
                updated_at,
            },
        );
        Ok(())
    }
}
