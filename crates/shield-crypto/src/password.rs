//! Password hashing and verification.
//!
//! Same stretching function as the envelope subkeys, sized for the
//! once-per-login verification cost. Comparison is constant-time.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::envelope::b64;
use crate::error::CryptoError;
use crate::kdf::{derive_key, generate_salt, DEFAULT_PASSWORD_ITERATIONS, SALT_LENGTH};

/// Algorithm identifier stored alongside the hash.
pub const PASSWORD_ALGORITHM: &str = "pbkdf2-hmac-sha256";

/// Immutable after creation; a password change replaces the whole record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordRecord {
    #[serde(with = "b64")]
    pub hash: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    pub algorithm: String,
    pub iterations: u32,
}

/// Hash a password with the default iteration count.
///
/// # Arguments
/// * `password` - The cleartext password
/// * `salt` - Explicit salt, or `None` to generate a fresh one
pub fn hash_password(
    password: &str,
    salt: Option<[u8; SALT_LENGTH]>,
) -> Result<PasswordRecord, CryptoError> {
    hash_password_with_iterations(password, salt, DEFAULT_PASSWORD_ITERATIONS)
}

/// Hash a password with an explicit iteration count.
pub fn hash_password_with_iterations(
    password: &str,
    salt: Option<[u8; SALT_LENGTH]>,
    iterations: u32,
) -> Result<PasswordRecord, CryptoError> {
    let salt = match salt {
        Some(s) => s,
        None => generate_salt()?,
    };
    let hash = derive_key(password.as_bytes(), &salt, iterations);
    Ok(PasswordRecord {
        hash: hash.to_vec(),
        salt: salt.to_vec(),
        algorithm: PASSWORD_ALGORITHM.to_string(),
        iterations,
    })
}

/// Recompute the hash with the record's stored salt and iteration count,
/// then compare in constant time.
pub fn verify_password(password: &str, record: &PasswordRecord) -> bool {
    let computed = derive_key(password.as_bytes(), &record.salt, record.iterations);
    computed.as_slice().ct_eq(record.hash.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATIONS: u32 = 1_000;

    #[test]
    fn correct_password_verifies() {
        let record = hash_password_with_iterations("hunter2", None, ITERATIONS).unwrap();
        assert!(verify_password("hunter2", &record));
    }

    #[test]
    fn wrong_password_fails() {
        let record = hash_password_with_iterations("hunter2", None, ITERATIONS).unwrap();
        assert!(!verify_password("hunter3", &record));
    }

    #[test]
    fn explicit_salt_is_deterministic() {
        let salt = [0x42u8; SALT_LENGTH];
        let a = hash_password_with_iterations("pw", Some(salt), ITERATIONS).unwrap();
        let b = hash_password_with_iterations("pw", Some(salt), ITERATIONS).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn fresh_salts_differ() {
        let a = hash_password_with_iterations("pw", None, ITERATIONS).unwrap();
        let b = hash_password_with_iterations("pw", None, ITERATIONS).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn verify_honors_stored_iterations() {
        let record = hash_password_with_iterations("pw", None, 2_000).unwrap();
        assert!(verify_password("pw", &record));
    }

    #[test]
    fn record_json_round_trip() {
        let record = hash_password_with_iterations("pw", None, ITERATIONS).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: PasswordRecord = serde_json::from_str(&json).unwrap();
        assert!(verify_password("pw", &parsed));
        assert_eq!(parsed.algorithm, PASSWORD_ALGORITHM);
    }
}
