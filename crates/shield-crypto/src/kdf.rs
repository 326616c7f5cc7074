//! PBKDF2-HMAC-SHA256 key stretching.
//!
//! One derivation function serves both the per-call encryption subkeys and
//! password hashing; the two call sites differ only in iteration count.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;

/// Derived key length in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// Default iteration count for per-call encryption subkeys.
pub const DEFAULT_ENCRYPTION_ITERATIONS: u32 = 100_000;

/// Default iteration count for password hashing. Higher than the
/// encryption count: verification happens once per login, not per record.
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 210_000;

/// Derive a 256-bit key from a secret and salt.
///
/// Deterministic: the same (secret, salt, iterations) triple always yields
/// the same key.
///
/// # Arguments
/// * `secret` - Input secret (password or root key material)
/// * `salt` - Per-derivation salt
/// * `iterations` - PBKDF2 iteration count
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LENGTH] {
    let mut okm = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(secret, salt, iterations, &mut okm);
    okm
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> Result<[u8; SALT_LENGTH], CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::Rng(e.to_string()))?;
    Ok(salt)
}
