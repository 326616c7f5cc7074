//! Encrypted snapshots of critical state.
//!
//! Pipeline order is fixed: compress, then encrypt. Compressing ciphertext
//! is ineffective, so the inverse order would cost the compression for
//! nothing. Restoration reverses the pipeline exactly and applies the
//! recovered state only after the whole snapshot has been validated.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use shield_crypto::{CipherEngine, CryptoError, EncryptionEnvelope};

use crate::audit::AuditLog;
use crate::config::BackupConfig;
use crate::error::{Result, SecurityError};
use crate::firewall::{Firewall, FirewallSnapshot};
use crate::session::{Session, SessionManager};
use crate::storage::{keys, KvStore};

/// Base64 (de)serialization for the payload blob.
mod b64 {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub encrypted: bool,
    pub size: usize,
}

/// The designated critical state: session table plus firewall state and
/// threat log. Rate windows and audit entries are short-horizon data and
/// deliberately excluded.
#[derive(Serialize, Deserialize)]
struct StateSnapshot {
    sessions: Vec<Session>,
    firewall: FirewallSnapshot,
}

pub struct BackupManager {
    history: Mutex<VecDeque<BackupRecord>>,
    config: BackupConfig,
    engine: Arc<CipherEngine>,
    sessions: Arc<SessionManager>,
    firewall: Arc<Firewall>,
    audit: Arc<AuditLog>,
    store: Arc<dyn KvStore>,
    degraded: Arc<AtomicBool>,
}

impl BackupManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BackupConfig,
        engine: Arc<CipherEngine>,
        sessions: Arc<SessionManager>,
        firewall: Arc<Firewall>,
        audit: Arc<AuditLog>,
        store: Arc<dyn KvStore>,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            config,
            engine,
            sessions,
            firewall,
            audit,
            store,
            degraded,
        }
    }

    /// Load previously persisted backup history.
    pub fn hydrate(&self) {
        if let Some(saved) = crate::storage::load_best_effort::<Vec<BackupRecord>>(
            self.store.as_ref(),
            keys::BACKUPS,
            &self.audit,
        ) {
            *self.history.lock() = saved.into_iter().collect();
        }
    }

    /// Snapshot, compress, encrypt, append to history.
    pub fn create_backup(&self) -> Result<BackupRecord> {
        self.create_backup_at(Utc::now())
    }

    pub fn create_backup_at(&self, now: DateTime<Utc>) -> Result<BackupRecord> {
        let snapshot = StateSnapshot {
            sessions: self.sessions.snapshot(),
            firewall: self.firewall.snapshot(),
        };
        let mut payload = serde_json::to_vec(&snapshot)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;

        if self.config.compress {
            payload = zstd::encode_all(payload.as_slice(), zstd::DEFAULT_COMPRESSION_LEVEL)
                .map_err(|e| SecurityError::Storage(format!("compression failed: {e}")))?;
        }
        if self.config.encrypt {
            let envelope = self.engine.encrypt(&payload, None)?;
            payload = serde_json::to_vec(&envelope)
                .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        }

        let record = BackupRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            size: payload.len(),
            payload,
            compressed: self.config.compress,
            encrypted: self.config.encrypt,
        };

        {
            let mut history = self.history.lock();
            history.push_back(record.clone());
            while history.len() > self.config.max_backups {
                history.pop_front();
            }
        }
        tracing::info!(backup = %record.id, size = record.size, "backup created");
        self.audit.record("backup.created", &record.id, None);
        self.persist();
        Ok(record)
    }

    /// Reverse the pipeline (decrypt, decompress, deserialize), then apply
    /// the recovered state. Application happens only after the whole
    /// snapshot has parsed: a failure anywhere aborts with nothing mutated.
    pub fn restore_backup(&self, id: &str) -> Result<()> {
        let record = {
            let history = self.history.lock();
            history.iter().find(|r| r.id == id).cloned()
        }
        .ok_or_else(|| SecurityError::Validation(format!("unknown backup id: {id}")))?;

        let mut payload = record.payload;
        if record.encrypted {
            let envelope: EncryptionEnvelope = serde_json::from_slice(&payload)
                .map_err(|_| SecurityError::BackupIntegrity("malformed envelope".to_string()))?;
            payload = self
                .engine
                .decrypt(&envelope, None)
                .map_err(|_| SecurityError::BackupIntegrity("payload decryption failed".to_string()))?;
        }
        if record.compressed {
            payload = zstd::decode_all(payload.as_slice())
                .map_err(|_| SecurityError::BackupIntegrity("decompression failed".to_string()))?;
        }
        let snapshot: StateSnapshot = serde_json::from_slice(&payload)
            .map_err(|_| SecurityError::BackupIntegrity("malformed snapshot".to_string()))?;

        self.sessions.replace_all(snapshot.sessions);
        self.firewall.replace_all(snapshot.firewall);

        tracing::info!(backup = %id, "backup restored");
        self.audit.record("backup.restored", id, None);
        Ok(())
    }

    /// History, oldest first.
    pub fn list_backups(&self) -> Vec<BackupRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn last_backup_at(&self) -> Option<DateTime<Utc>> {
        self.history.lock().back().map(|r| r.timestamp)
    }

    fn persist(&self) {
        let snapshot = self.list_backups();
        crate::storage::save_best_effort(
            self.store.as_ref(),
            keys::BACKUPS,
            &snapshot,
            &self.audit,
            &self.degraded,
        );
    }
}
