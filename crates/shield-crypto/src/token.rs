//! Cryptographically random token generation.

use crate::error::CryptoError;

/// Generate a hex-encoded random token of `byte_length` random bytes.
///
/// The only failure mode is the entropy source itself; callers treat that
/// as fatal.
pub fn generate_secure_token(byte_length: usize) -> Result<String, CryptoError> {
    let mut bytes = vec![0u8; byte_length];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Rng(e.to_string()))?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_length() {
        let token = generate_secure_token(32).unwrap();
        assert_eq!(token.len(), 64);
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_secure_token(16).unwrap();
        let b = generate_secure_token(16).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hex_alphabet_only() {
        let token = generate_secure_token(8).unwrap();
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
