use thiserror::Error;

use nyaaya_crypto::CryptoError;

use crate::address::Address;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid wallet address: {0:?}")]
    InvalidAddress(String),

    #[error("peer {0} has not published a chat key yet")]
    NoPeerKey(Address),

    #[error("peer {peer} published an unusable chat key: {reason}")]
    MalformedPeerKey { peer: Address, reason: String },

    #[error("message is empty")]
    EmptyMessage,

    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),

    #[error("relay rejected request ({status}): {message}")]
    RelayRejected { status: u16, message: String },

    #[error("malformed relay record: {0}")]
    MalformedRecord(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How a failure should be treated by whoever drives the chat surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Expected while peers come online; keep polling.
    Transient,
    /// The chat keeps working; show "cannot decrypt yet" and carry on.
    Recoverable,
    /// Needs the user to act: retry, or re-check the address.
    UserFacing,
    /// Abort; never continue with weaker guarantees.
    Fatal,
}

impl ChatError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoPeerKey(_) => ErrorCategory::Transient,
            Self::Crypto(CryptoError::Authentication | CryptoError::Encoding) => {
                ErrorCategory::Recoverable
            }
            Self::Crypto(CryptoError::RandomUnavailable(_) | CryptoError::KeyGeneration(_))
            | Self::Internal(_) => ErrorCategory::Fatal,
            Self::InvalidAddress(_)
            | Self::MalformedPeerKey { .. }
            | Self::EmptyMessage
            | Self::RelayUnreachable(_)
            | Self::RelayRejected { .. }
            | Self::MalformedRecord(_)
            | Self::InvalidConfig(_)
            | Self::Crypto(_) => ErrorCategory::UserFacing,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        let peer: Address = "0x4a5c98505d0b7a055db0ced8af6213e3210629f6".parse().unwrap();
        assert_eq!(ChatError::NoPeerKey(peer).category(), ErrorCategory::Transient);
        assert_eq!(
            ChatError::Crypto(CryptoError::Authentication).category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            ChatError::RelayUnreachable("connection refused".into()).category(),
            ErrorCategory::UserFacing
        );
        assert_eq!(
            ChatError::Crypto(CryptoError::RandomUnavailable("no entropy".into())).category(),
            ErrorCategory::Fatal
        );
        assert_eq!(
            ChatError::Crypto(CryptoError::InvalidKey("short".into())).category(),
            ErrorCategory::UserFacing
        );
    }
}
