use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cipher::{SessionKey, KEY_LEN};
use crate::error::CryptoError;
use crate::kem::SharedSecret;

/// HKDF `info` binding every session key to this protocol.
pub const CHAT_CONTEXT: &[u8] = b"NyaayaPay-PQC-Chat-v1";

/// Length of the per-session random salt carried in a bootstrap.
pub const SALT_LEN: usize = 16;

/// HKDF-SHA256 output ceiling (255 blocks of 32 bytes).
const MAX_OUTPUT_LEN: usize = 255 * 32;

/// Stretch `shared_secret` into `output_len` bytes with HKDF-SHA256.
///
/// Deterministic: the same `(shared_secret, salt, context)` always yields the
/// same bytes, which is what lets both ends of a bootstrap converge.
pub fn derive_key(
    shared_secret: &[u8],
    salt: &[u8],
    context: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if output_len == 0 || output_len > MAX_OUTPUT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "output length {output_len} outside 1..={MAX_OUTPUT_LEN}"
        )));
    }
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = Zeroizing::new(vec![0u8; output_len]);
    hk.expand(context, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Derive the 256-bit chat session key from a KEM shared secret.
pub fn derive_session_key(
    shared_secret: &SharedSecret,
    salt: &[u8],
) -> Result<SessionKey, CryptoError> {
    let okm = derive_key(shared_secret.as_bytes(), salt, CHAT_CONTEXT, KEY_LEN)?;
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&okm);
    Ok(SessionKey::from_bytes(key))
}

/// Fresh random salt for a new bootstrap.
pub fn random_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
    Ok(salt)
}
