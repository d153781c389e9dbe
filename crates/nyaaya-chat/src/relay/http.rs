use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{KeyDirectory, Relay};
use crate::address::Address;
use crate::error::{ChatError, Result};
use crate::wire::{
    ApiResponse, Message, MessageRecord, OutgoingMessage, PublishKeyRequest, PublishedKey,
};

/// HTTP client for the relay service (`nyaaya-relay`).
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRelay {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| ChatError::RelayUnreachable(e.to_string()))?;
        Self::unwrap_envelope(response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::RelayUnreachable(e.to_string()))?;
        Self::unwrap_envelope(response).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ChatError::RelayUnreachable(e.to_string()))?;

        let envelope: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(ChatError::MalformedRecord(format!("relay response: {e}")));
            }
            Err(_) => {
                return Err(ChatError::RelayRejected {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
        };

        if !status.is_success() || !envelope.ok {
            return Err(ChatError::RelayRejected {
                status: status.as_u16(),
                message: envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn fetch_messages(&self, a: &Address, b: &Address) -> Result<Vec<Message>> {
        let records: Vec<MessageRecord> = self
            .get("messages", &[("from", a.as_str()), ("to", b.as_str())])
            .await?
            .unwrap_or_default();
        let mut messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>>>()?;
        // The relay already orders; re-sort so callers never depend on it.
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn post_message(&self, message: OutgoingMessage) -> Result<Message> {
        let record: MessageRecord = self
            .post("messages", &message)
            .await?
            .ok_or_else(|| ChatError::MalformedRecord("relay returned no message".into()))?;
        Message::try_from(record)
    }
}

#[async_trait]
impl KeyDirectory for HttpRelay {
    async fn fetch_public_key(&self, address: &Address) -> Result<Option<PublishedKey>> {
        self.get("publicKey", &[("address", address.as_str())]).await
    }

    async fn publish_public_key(&self, request: PublishKeyRequest) -> Result<()> {
        let _: Option<serde_json::Value> = self.post("publicKey", &request).await?;
        Ok(())
    }
}
