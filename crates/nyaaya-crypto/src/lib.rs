pub mod cipher;
pub mod error;
pub mod kdf;
pub mod kem;
pub mod keychain;

pub use cipher::{Sealed, SessionKey};
pub use error::CryptoError;
pub use kdf::{derive_key, derive_session_key, random_salt, CHAT_CONTEXT};
pub use kem::{Encapsulation, Kem, KemAlgorithm, KemKeyPair, MlKem768, SharedSecret};
pub use keychain::{FileKeychain, Keychain, MemoryKeychain};
