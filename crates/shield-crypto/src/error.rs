use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Deliberately carries no detail. Integrity failure, malformed
    /// envelope, and wrong key are indistinguishable to the caller.
    #[error("Decryption failed")]
    Decryption,

    #[error("Random number generation failed: {0}")]
    Rng(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
