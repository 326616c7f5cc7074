//! Error taxonomy for the security layer.
//!
//! Cryptographic and validation errors propagate to the caller as typed
//! results. Persistence errors never do: they are caught at the call site,
//! audited, and surfaced only through the operational report.

use thiserror::Error;

pub use shield_crypto::CryptoError;

use crate::firewall::DenyReason;
use crate::ratelimit::ActionClass;

pub type Result<T> = std::result::Result<T, SecurityError>;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Session/fingerprint mismatch or expired session. Recoverable by
    /// re-authenticating.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Recoverable by waiting out the window.
    #[error("Rate limit exceeded for {subject} ({class})")]
    RateLimitExceeded { subject: String, class: ActionClass },

    /// Not recoverable without a manual unblock.
    #[error("Actor is blocked: {actor}")]
    Blocked { actor: String },

    /// Firewall denial short of a permanent block.
    #[error("Request denied: {reason}")]
    Denied { reason: DenyReason },

    /// Non-fatal to the in-memory decision; surfaced in the report.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// Restoration aborts entirely; no partial state mutation.
    #[error("Backup integrity check failed: {0}")]
    BackupIntegrity(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
