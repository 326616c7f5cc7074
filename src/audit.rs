//! Append-only audit log with bounded retention.
//!
//! A passive sink: components record events, operators read them back via
//! the report. Bounded two ways, by entry capacity (oldest evicted on
//! append) and by age (purged by the maintenance task).

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;
use crate::storage::{keys, KvStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub details: String,
    pub actor: Option<String>,
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditLogEntry>>,
    max_entries: usize,
    retention: Duration,
    store: Arc<dyn KvStore>,
    degraded: Arc<AtomicBool>,
}

impl AuditLog {
    pub fn new(config: &AuditConfig, store: Arc<dyn KvStore>, degraded: Arc<AtomicBool>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: config.max_entries,
            retention: Duration::seconds(config.retention_secs as i64),
            store,
            degraded,
        }
    }

    /// Load previously persisted entries. A missing or unreadable snapshot
    /// leaves the log empty.
    pub fn hydrate(&self) {
        match crate::storage::load_json::<Vec<AuditLogEntry>>(self.store.as_ref(), keys::AUDIT) {
            Ok(Some(saved)) => {
                let mut entries = self.entries.lock();
                *entries = saved.into_iter().collect();
                while entries.len() > self.max_entries {
                    entries.pop_front();
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable audit snapshot");
            }
        }
    }

    /// Append an entry, evicting the oldest past capacity.
    pub fn record(&self, event: &str, details: &str, actor: Option<&str>) {
        self.record_at(Utc::now(), event, details, actor);
    }

    pub fn record_at(&self, now: DateTime<Utc>, event: &str, details: &str, actor: Option<&str>) {
        let entry = AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            event: event.to_string(),
            details: details.to_string(),
            actor: actor.map(str::to_string),
        };
        tracing::debug!(event = %event, actor = ?actor, "audit");

        let snapshot = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            while entries.len() > self.max_entries {
                entries.pop_front();
            }
            entries.iter().cloned().collect::<Vec<_>>()
        };
        self.persist(&snapshot);
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<AuditLogEntry> {
        let entries = self.entries.lock();
        entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop entries older than the retention window. Returns the number
    /// removed.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let (removed, snapshot) = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| e.timestamp >= cutoff);
            (before - entries.len(), entries.iter().cloned().collect::<Vec<_>>())
        };
        if removed > 0 {
            tracing::debug!(removed, "purged expired audit entries");
            self.persist(&snapshot);
        }
        removed
    }

    /// The audit log persists itself directly: routing its own write
    /// failures back through `record` would recurse.
    fn persist(&self, snapshot: &[AuditLogEntry]) {
        if let Err(e) = crate::storage::save_json(self.store.as_ref(), keys::AUDIT, &snapshot) {
            self.degraded
                .store(true, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!(error = %e, "audit persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn make_log(max_entries: usize, retention_secs: u64) -> AuditLog {
        let config = AuditConfig {
            max_entries,
            retention_secs,
            ..Default::default()
        };
        AuditLog::new(
            &config,
            Arc::new(MemoryBackend::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = make_log(3, 3_600);
        for i in 0..5 {
            log.record(&format!("event.{i}"), "", None);
        }
        assert_eq!(log.len(), 3);
        let recent = log.recent(3);
        assert_eq!(recent[0].event, "event.4");
        assert_eq!(recent[2].event, "event.2");
    }

    #[test]
    fn recent_is_newest_first() {
        let log = make_log(10, 3_600);
        log.record("first", "", None);
        log.record("second", "", Some("actor-1"));
        let recent = log.recent(2);
        assert_eq!(recent[0].event, "second");
        assert_eq!(recent[0].actor.as_deref(), Some("actor-1"));
    }

    #[test]
    fn purge_drops_old_entries_only() {
        let log = make_log(10, 60);
        let now = Utc::now();
        log.record_at(now - Duration::seconds(120), "old", "", None);
        log.record_at(now, "fresh", "", None);
        assert_eq!(log.purge_expired_at(now), 1);
        assert_eq!(log.recent(10).len(), 1);
        assert_eq!(log.recent(10)[0].event, "fresh");
    }

    #[test]
    fn hydrate_restores_entries() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryBackend::new());
        let config = AuditConfig::default();
        let degraded = Arc::new(AtomicBool::new(false));
        let log = AuditLog::new(&config, Arc::clone(&store), Arc::clone(&degraded));
        log.record("persisted", "details", None);

        let revived = AuditLog::new(&config, store, degraded);
        revived.hydrate();
        assert_eq!(revived.recent(1)[0].event, "persisted");
    }
}
