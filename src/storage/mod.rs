//! Durable key-value persistence.
//!
//! Every store keeps its working state in memory and mirrors it here
//! best-effort: a security decision is computed and returned from memory
//! first, and a failed write never retroactively changes it. Failures are
//! logged, audited, and flip the degraded flag surfaced in the report.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::AuditLog;
use crate::error::{Result, SecurityError};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Persistence keys, one per store.
pub mod keys {
    pub const SESSIONS: &str = "shield.sessions";
    pub const RATE_WINDOWS: &str = "shield.rate_windows";
    pub const FIREWALL: &str = "shield.firewall";
    pub const THREATS: &str = "shield.threats";
    pub const BACKUPS: &str = "shield.backups";
    pub const AUDIT: &str = "shield.audit";
}

/// The boundary contract with the durable store. Implementations must not
/// be called while a component lock is held.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Serialize `value` to JSON and write it under `key`.
pub(crate) fn save_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| SecurityError::Persistence(e.to_string()))?;
    store.set(key, &bytes)
}

/// Read and deserialize the JSON stored under `key`, if any.
pub(crate) fn load_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SecurityError::Persistence(e.to_string())),
        None => Ok(None),
    }
}

/// Best-effort write: failures are audited and flip the degraded flag, but
/// never propagate.
pub(crate) fn save_best_effort<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    audit: &AuditLog,
    degraded: &AtomicBool,
) {
    if let Err(e) = save_json(store, key, value) {
        degraded.store(true, Ordering::Relaxed);
        tracing::warn!(key = %key, error = %e, "persistence write failed");
        audit.record("persistence.write_failed", &format!("{key}: {e}"), None);
    }
}

/// Best-effort read at hydration time: a missing or unparsable snapshot
/// yields `None` so the store starts empty.
pub(crate) fn load_best_effort<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
    audit: &AuditLog,
) -> Option<T> {
    match load_json(store, key) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "discarding unreadable snapshot");
            audit.record("persistence.hydrate_failed", &format!("{key}: {e}"), None);
            None
        }
    }
}
