//! Envelope encryption with AES-256-GCM.
//!
//! Every `encrypt` call draws a fresh random salt and IV and derives a
//! per-call subkey from them, so two envelopes are never comparable by
//! content even for identical plaintext and key. The envelope carries
//! everything needed to decrypt except the secret itself.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::{derive_key, generate_salt, DEFAULT_ENCRYPTION_ITERATIONS, SALT_LENGTH};

/// AES-GCM IV length in bytes.
pub const IV_LENGTH: usize = 12;

/// Base64 (de)serialization for binary envelope fields.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// EncryptionEnvelope
// ============================================================================

/// Ciphertext plus the randomness needed to decrypt it.
///
/// Salt and IV are public values; possession of the envelope alone does not
/// allow decryption. Lengths are validated at decrypt time, not here, so a
/// malformed envelope fails the same way as a tampered one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// CipherEngine
// ============================================================================

/// Stateful only with respect to the long-lived root secret; envelopes are
/// owned by the caller.
pub struct CipherEngine {
    root_secret: Zeroizing<Vec<u8>>,
    iterations: u32,
}

impl CipherEngine {
    /// Create an engine with the default iteration count.
    pub fn new(root_secret: impl Into<Vec<u8>>) -> Self {
        Self::with_iterations(root_secret, DEFAULT_ENCRYPTION_ITERATIONS)
    }

    /// Create an engine with an explicit iteration count.
    pub fn with_iterations(root_secret: impl Into<Vec<u8>>, iterations: u32) -> Self {
        Self {
            root_secret: Zeroizing::new(root_secret.into()),
            iterations,
        }
    }

    fn secret_or_root<'a>(&'a self, key: Option<&'a str>) -> &'a [u8] {
        match key {
            Some(k) => k.as_bytes(),
            None => &self.root_secret,
        }
    }

    /// Encrypt plaintext under a per-call subkey.
    ///
    /// # Arguments
    /// * `plaintext` - Raw bytes to protect
    /// * `key` - Optional caller secret; defaults to the engine's root secret
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: Option<&str>,
    ) -> Result<EncryptionEnvelope, CryptoError> {
        let salt = generate_salt()?;
        let mut iv = [0u8; IV_LENGTH];
        getrandom::getrandom(&mut iv).map_err(|e| CryptoError::Rng(e.to_string()))?;

        let subkey = Zeroizing::new(derive_key(
            self.secret_or_root(key),
            &salt,
            self.iterations,
        ));
        let cipher = Aes256Gcm::new_from_slice(subkey.as_slice())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(EncryptionEnvelope {
            ciphertext,
            salt: salt.to_vec(),
            iv: iv.to_vec(),
            created_at: Utc::now(),
        })
    }

    /// Serialize a value to JSON, then encrypt it.
    pub fn encrypt_value<T: Serialize>(
        &self,
        value: &T,
        key: Option<&str>,
    ) -> Result<EncryptionEnvelope, CryptoError> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        self.encrypt(&plaintext, key)
    }

    /// Decrypt an envelope, re-deriving the subkey from its stored salt.
    ///
    /// All failure modes (wrong key, tampered ciphertext, malformed
    /// envelope) collapse into [`CryptoError::Decryption`].
    pub fn decrypt(
        &self,
        envelope: &EncryptionEnvelope,
        key: Option<&str>,
    ) -> Result<Vec<u8>, CryptoError> {
        if envelope.salt.len() != SALT_LENGTH || envelope.iv.len() != IV_LENGTH {
            return Err(CryptoError::Decryption);
        }

        let subkey = Zeroizing::new(derive_key(
            self.secret_or_root(key),
            &envelope.salt,
            self.iterations,
        ));
        let cipher = Aes256Gcm::new_from_slice(subkey.as_slice())
            .map_err(|_| CryptoError::Decryption)?;

        cipher
            .decrypt(Nonce::from_slice(&envelope.iv), envelope.ciphertext.as_slice())
            .map_err(|_| CryptoError::Decryption)
    }

    /// Decrypt an envelope and deserialize the recovered JSON.
    pub fn decrypt_value<T: for<'de> Deserialize<'de>>(
        &self,
        envelope: &EncryptionEnvelope,
        key: Option<&str>,
    ) -> Result<T, CryptoError> {
        let plaintext = self.decrypt(envelope, key)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CipherEngine {
        CipherEngine::with_iterations(b"test-root-secret".to_vec(), 1_000)
    }

    #[test]
    fn round_trip() {
        let e = engine();
        let envelope = e.encrypt(b"hello", None).unwrap();
        assert_eq!(e.decrypt(&envelope, None).unwrap(), b"hello");
    }

    #[test]
    fn round_trip_with_caller_key() {
        let e = engine();
        let envelope = e.encrypt(b"hello", Some("caller-key")).unwrap();
        assert_eq!(e.decrypt(&envelope, Some("caller-key")).unwrap(), b"hello");
    }

    #[test]
    fn wrong_key_fails() {
        let e = engine();
        let envelope = e.encrypt(b"secret", Some("key-1")).unwrap();
        assert!(matches!(
            e.decrypt(&envelope, Some("key-2")),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn identical_plaintext_distinct_envelopes() {
        let e = engine();
        let a = e.encrypt(b"same", None).unwrap();
        let b = e.encrypt(b"same", None).unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let e = engine();
        let mut envelope = e.encrypt(b"secret", None).unwrap();
        let last = envelope.ciphertext.len() - 1;
        envelope.ciphertext[last] ^= 0xff;
        assert!(matches!(
            e.decrypt(&envelope, None),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn malformed_salt_fails_uniformly() {
        let e = engine();
        let mut envelope = e.encrypt(b"secret", None).unwrap();
        envelope.salt.truncate(4);
        assert!(matches!(
            e.decrypt(&envelope, None),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn empty_plaintext() {
        let e = engine();
        let envelope = e.encrypt(b"", None).unwrap();
        assert!(e.decrypt(&envelope, None).unwrap().is_empty());
    }

    #[test]
    fn envelope_json_round_trip() {
        let e = engine();
        let envelope = e.encrypt(b"persist me", None).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EncryptionEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(e.decrypt(&parsed, None).unwrap(), b"persist me");
    }

    #[test]
    fn value_round_trip() {
        let e = engine();
        let envelope = e
            .encrypt_value(&serde_json::json!({ "a": 1, "b": [2, 3] }), None)
            .unwrap();
        let value: serde_json::Value = e.decrypt_value(&envelope, None).unwrap();
        assert_eq!(value["a"], 1);
    }
}
