use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3001";
const DEFAULT_PEER_POLL_MS: u64 = 1500;
const DEFAULT_MESSAGE_POLL_MS: u64 = 2000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Runtime settings for a chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatConfig {
    pub relay_url: String,
    pub peer_poll_ms: u64,
    pub message_poll_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            peer_poll_ms: DEFAULT_PEER_POLL_MS,
            message_poll_ms: DEFAULT_MESSAGE_POLL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `NYAAYA_RELAY_URL`, `NYAAYA_PEER_POLL_MS` and
    /// `NYAAYA_MESSAGE_POLL_MS` where set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("NYAAYA_RELAY_URL").filter(|v| !v.trim().is_empty()) {
            config.relay_url = url.trim().to_string();
        }
        if let Some(ms) = lookup("NYAAYA_PEER_POLL_MS") {
            config.peer_poll_ms = parse_millis("NYAAYA_PEER_POLL_MS", &ms)?;
        }
        if let Some(ms) = lookup("NYAAYA_MESSAGE_POLL_MS") {
            config.message_poll_ms = parse_millis("NYAAYA_MESSAGE_POLL_MS", &ms)?;
        }
        Ok(config)
    }

    /// Reject settings no client can run with, whichever way they were built.
    pub fn validate(&self) -> Result<()> {
        if self.relay_url.trim().is_empty() {
            return Err(ChatError::InvalidConfig("relayUrl must not be empty".into()));
        }
        for (name, ms) in [
            ("peerPollMs", self.peer_poll_ms),
            ("messagePollMs", self.message_poll_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ChatError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn peer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.peer_poll_ms)
    }

    pub fn message_poll_interval(&self) -> Duration {
        Duration::from_millis(self.message_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_millis(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(ChatError::InvalidConfig(format!(
            "{name} must be a positive number of milliseconds, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = ChatConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ChatConfig::default());
        assert_eq!(config.relay_url, "http://127.0.0.1:3001");
        assert_eq!(config.peer_poll_interval(), Duration::from_millis(1500));
        assert_eq!(config.message_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn env_overrides() {
        let config = ChatConfig::from_lookup(lookup(&[
            ("NYAAYA_RELAY_URL", "https://relay.example "),
            ("NYAAYA_PEER_POLL_MS", "250"),
            ("NYAAYA_MESSAGE_POLL_MS", "500"),
        ]))
        .unwrap();
        assert_eq!(config.relay_url, "https://relay.example");
        assert_eq!(config.peer_poll_ms, 250);
        assert_eq!(config.message_poll_ms, 500);
    }

    #[test]
    fn rejects_zero_or_garbage_intervals() {
        assert!(ChatConfig::from_lookup(lookup(&[("NYAAYA_PEER_POLL_MS", "0")])).is_err());
        assert!(ChatConfig::from_lookup(lookup(&[("NYAAYA_MESSAGE_POLL_MS", "soon")])).is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ChatConfig = serde_json::from_str(r#"{"relayUrl":"http://relay:8080"}"#).unwrap();
        assert_eq!(config.relay_url, "http://relay:8080");
        assert_eq!(config.message_poll_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_intervals_from_json_fail_validation() {
        let config: ChatConfig = serde_json::from_str(r#"{"peerPollMs":0}"#).unwrap();
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(ref m)) if m.contains("peerPollMs")));

        let config = ChatConfig {
            request_timeout_ms: 0,
            ..ChatConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));

        let config = ChatConfig {
            relay_url: "  ".into(),
            ..ChatConfig::default()
        };
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));
    }
}
