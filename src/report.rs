//! Read-only aggregate snapshot for operational dashboards.
//!
//! Assembled from each store under its own short lock; the report is a
//! point-in-time composite, not a transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::AuditLogEntry;
use crate::firewall::ThreatRecord;

#[derive(Debug, Clone, Serialize)]
pub struct ThreatSummary {
    pub active: usize,
    pub resolved: usize,
    pub recent: Vec<ThreatRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub active: usize,
    pub distinct_users: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSummary {
    pub tracked_subjects: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirewallSummary {
    pub blocked_actors: Vec<String>,
    pub actors_under_watch: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub count: usize,
    pub last_backup_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub generated_at: DateTime<Utc>,
    pub threats: ThreatSummary,
    pub sessions: SessionSummary,
    pub rate_limits: RateLimitSummary,
    pub firewall: FirewallSummary,
    pub backups: BackupSummary,
    pub recent_audit_entries: Vec<AuditLogEntry>,
    /// True once any persistence write has failed; decisions were still
    /// served from memory, but durability has drifted.
    pub persistence_degraded: bool,
}
