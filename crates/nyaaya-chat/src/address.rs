use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A wallet address: `0x` followed by 40 hex digits, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `s` would parse as an address.
    pub fn is_valid(s: &str) -> bool {
        let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
            return false;
        };
        hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl FromStr for Address {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if Self::is_valid(trimmed) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(ChatError::InvalidAddress(s.to_string()))
        }
    }
}

impl TryFrom<String> for Address {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
