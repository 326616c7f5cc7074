//! Request admission filtering and threat detection.
//!
//! Admission order: blocked-set test, then signature matching over the
//! user agent and URL, then the trailing-window suspicious-activity count.
//! Crossing the higher auto-block threshold moves an actor into the
//! blocked set permanently; only a manual unblock reverses it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::config::FirewallConfig;
use crate::error::{Result, SecurityError};
use crate::storage::{keys, KvStore};

// ============================================================================
// Request admission types
// ============================================================================

/// Inbound request descriptor supplied by the calling web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub actor_id: String,
    pub user_agent: String,
    pub url: String,
    pub ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Blocked,
    SuspiciousPattern,
    SuspiciousActivity,
    RateLimited,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Blocked => write!(f, "blocked"),
            DenyReason::SuspiciousPattern => write!(f, "suspicious_pattern"),
            DenyReason::SuspiciousActivity => write!(f, "suspicious_activity"),
            DenyReason::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Outcome of a firewall check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl Admission {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

// ============================================================================
// Threat records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub status: ThreatStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActivityEvent {
    kind: String,
    timestamp: DateTime<Utc>,
}

/// Persisted form of the blocked set and per-actor activity logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FirewallStateSnapshot {
    blocked: Vec<String>,
    activity: Vec<(String, Vec<ActivityEvent>)>,
}

/// Full snapshot for the backup pipeline, threat log included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FirewallSnapshot {
    state: FirewallStateSnapshot,
    threats: Vec<ThreatRecord>,
}

#[derive(Default)]
struct FirewallState {
    blocked: HashSet<String>,
    activity: HashMap<String, VecDeque<ActivityEvent>>,
}

// ============================================================================
// Firewall
// ============================================================================

pub struct Firewall {
    state: Mutex<FirewallState>,
    threats: Mutex<VecDeque<ThreatRecord>>,
    ua_signatures: Vec<Regex>,
    url_signatures: Vec<Regex>,
    config: FirewallConfig,
    audit: Arc<AuditLog>,
    store: Arc<dyn KvStore>,
    degraded: Arc<AtomicBool>,
}

impl Firewall {
    pub fn new(
        config: FirewallConfig,
        audit: Arc<AuditLog>,
        store: Arc<dyn KvStore>,
        degraded: Arc<AtomicBool>,
    ) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        SecurityError::Validation(format!("invalid firewall signature {p:?}: {e}"))
                    })
                })
                .collect()
        };
        Ok(Self {
            state: Mutex::new(FirewallState::default()),
            threats: Mutex::new(VecDeque::new()),
            ua_signatures: compile(&config.user_agent_signatures)?,
            url_signatures: compile(&config.url_signatures)?,
            config,
            audit,
            store,
            degraded,
        })
    }

    fn activity_window(&self) -> Duration {
        Duration::seconds(self.config.activity_window_secs as i64)
    }

    /// Load previously persisted state and threat log.
    pub fn hydrate(&self) {
        if let Some(saved) = crate::storage::load_best_effort::<FirewallStateSnapshot>(
            self.store.as_ref(),
            keys::FIREWALL,
            &self.audit,
        ) {
            let mut state = self.state.lock();
            state.blocked = saved.blocked.into_iter().collect();
            state.activity = saved
                .activity
                .into_iter()
                .map(|(actor, events)| (actor, events.into_iter().collect()))
                .collect();
        }
        if let Some(saved) = crate::storage::load_best_effort::<Vec<ThreatRecord>>(
            self.store.as_ref(),
            keys::THREATS,
            &self.audit,
        ) {
            *self.threats.lock() = saved.into_iter().collect();
        }
    }

    /// Admission check for one request.
    pub fn check_request(&self, request: &RequestDescriptor) -> Admission {
        self.check_request_at(Utc::now(), request)
    }

    pub fn check_request_at(&self, now: DateTime<Utc>, request: &RequestDescriptor) -> Admission {
        if self.is_blocked(&request.actor_id) {
            self.audit
                .record("firewall.denied_blocked", &request.url, Some(&request.actor_id));
            return Admission::deny(DenyReason::Blocked);
        }

        let matched = self
            .ua_signatures
            .iter()
            .find(|re| re.is_match(&request.user_agent))
            .or_else(|| {
                self.url_signatures
                    .iter()
                    .find(|re| re.is_match(&request.url))
            });
        if let Some(signature) = matched {
            tracing::warn!(
                actor = %request.actor_id,
                signature = %signature.as_str(),
                "suspicious pattern in request"
            );
            self.record_threat_at(
                now,
                "suspicious_pattern",
                &format!("signature {:?} matched request to {}", signature.as_str(), request.url),
                Severity::Medium,
            );
            self.record_suspicious_activity_at(now, &request.actor_id, "suspicious_pattern");
            return Admission::deny(DenyReason::SuspiciousPattern);
        }

        if self.activity_count_at(now, &request.actor_id) > self.config.alert_threshold {
            self.audit.record(
                "firewall.denied_activity",
                &request.url,
                Some(&request.actor_id),
            );
            return Admission::deny(DenyReason::SuspiciousActivity);
        }

        Admission::allow()
    }

    fn activity_count_at(&self, now: DateTime<Utc>, actor_id: &str) -> usize {
        let window_start = now - self.activity_window();
        let state = self.state.lock();
        state
            .activity
            .get(actor_id)
            .map(|events| events.iter().filter(|e| e.timestamp >= window_start).count())
            .unwrap_or(0)
    }

    /// Append a suspicious-activity event for `actor_id`. Crossing the
    /// auto-block threshold inside the trailing window blocks the actor.
    /// Returns true when this call triggered the block.
    pub fn record_suspicious_activity(&self, actor_id: &str, kind: &str) -> bool {
        self.record_suspicious_activity_at(Utc::now(), actor_id, kind)
    }

    pub fn record_suspicious_activity_at(
        &self,
        now: DateTime<Utc>,
        actor_id: &str,
        kind: &str,
    ) -> bool {
        let window_start = now - self.activity_window();
        let auto_blocked = {
            let mut state = self.state.lock();
            let events = state.activity.entry(actor_id.to_string()).or_default();
            events.push_back(ActivityEvent {
                kind: kind.to_string(),
                timestamp: now,
            });
            while events.len() > self.config.max_activity_entries {
                events.pop_front();
            }

            let recent = events.iter().filter(|e| e.timestamp >= window_start).count();
            let should_block =
                recent > self.config.auto_block_threshold && !state.blocked.contains(actor_id);
            if should_block {
                state.blocked.insert(actor_id.to_string());
            }
            should_block
        };

        if auto_blocked {
            tracing::warn!(actor = %actor_id, "auto-blocked after repeated suspicious activity");
            self.audit
                .record("firewall.auto_blocked", kind, Some(actor_id));
            self.record_threat_at(
                now,
                "auto_block",
                &format!("actor {actor_id} auto-blocked after repeated suspicious activity"),
                Severity::High,
            );
        } else {
            self.audit
                .record("firewall.suspicious_activity", kind, Some(actor_id));
        }
        self.persist_state();
        auto_blocked
    }

    /// Manual block. Permanent until `unblock_actor`.
    pub fn block_actor(&self, actor_id: &str) {
        let inserted = self.state.lock().blocked.insert(actor_id.to_string());
        if inserted {
            self.audit.record("firewall.blocked", "", Some(actor_id));
            self.persist_state();
        }
    }

    pub fn unblock_actor(&self, actor_id: &str) {
        let removed = self.state.lock().blocked.remove(actor_id);
        if removed {
            self.audit.record("firewall.unblocked", "", Some(actor_id));
            self.persist_state();
        }
    }

    pub fn is_blocked(&self, actor_id: &str) -> bool {
        self.state.lock().blocked.contains(actor_id)
    }

    pub fn blocked_actors(&self) -> Vec<String> {
        let mut actors: Vec<String> = self.state.lock().blocked.iter().cloned().collect();
        actors.sort();
        actors
    }

    /// Actors with at least one activity entry on record.
    pub fn actors_under_watch(&self) -> usize {
        self.state.lock().activity.len()
    }

    // ------------------------------------------------------------------
    // Threat log
    // ------------------------------------------------------------------

    /// Append to the threat ring, evicting the oldest past capacity.
    pub fn record_threat(&self, kind: &str, description: &str, severity: Severity) -> ThreatRecord {
        self.record_threat_at(Utc::now(), kind, description, severity)
    }

    pub fn record_threat_at(
        &self,
        now: DateTime<Utc>,
        kind: &str,
        description: &str,
        severity: Severity,
    ) -> ThreatRecord {
        let record = ThreatRecord {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            severity,
            timestamp: now,
            status: ThreatStatus::Active,
        };
        {
            let mut threats = self.threats.lock();
            threats.push_back(record.clone());
            while threats.len() > self.config.max_threats {
                threats.pop_front();
            }
        }
        self.persist_threats();
        record
    }

    /// Mark a threat resolved. Returns false for unknown ids.
    pub fn resolve_threat(&self, id: &str) -> bool {
        let resolved = {
            let mut threats = self.threats.lock();
            match threats.iter_mut().find(|t| t.id == id) {
                Some(threat) => {
                    threat.status = ThreatStatus::Resolved;
                    true
                }
                None => false,
            }
        };
        if resolved {
            self.audit.record("threat.resolved", id, None);
            self.persist_threats();
        }
        resolved
    }

    pub fn threats(&self) -> Vec<ThreatRecord> {
        self.threats.lock().iter().cloned().collect()
    }

    pub fn threat_counts(&self) -> (usize, usize) {
        let threats = self.threats.lock();
        let active = threats
            .iter()
            .filter(|t| t.status == ThreatStatus::Active)
            .count();
        (active, threats.len() - active)
    }

    // ------------------------------------------------------------------
    // Backup snapshot
    // ------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> FirewallSnapshot {
        FirewallSnapshot {
            state: self.state_snapshot(),
            threats: self.threats(),
        }
    }

    pub(crate) fn replace_all(&self, snapshot: FirewallSnapshot) {
        {
            let mut state = self.state.lock();
            state.blocked = snapshot.state.blocked.into_iter().collect();
            state.activity = snapshot
                .state
                .activity
                .into_iter()
                .map(|(actor, events)| (actor, events.into_iter().collect()))
                .collect();
        }
        *self.threats.lock() = snapshot.threats.into_iter().collect();
        self.persist_state();
        self.persist_threats();
    }

    fn state_snapshot(&self) -> FirewallStateSnapshot {
        let state = self.state.lock();
        FirewallStateSnapshot {
            blocked: state.blocked.iter().cloned().collect(),
            activity: state
                .activity
                .iter()
                .map(|(actor, events)| (actor.clone(), events.iter().cloned().collect()))
                .collect(),
        }
    }

    fn persist_state(&self) {
        let snapshot = self.state_snapshot();
        crate::storage::save_best_effort(
            self.store.as_ref(),
            keys::FIREWALL,
            &snapshot,
            &self.audit,
            &self.degraded,
        );
    }

    fn persist_threats(&self) {
        let snapshot = self.threats();
        crate::storage::save_best_effort(
            self.store.as_ref(),
            keys::THREATS,
            &snapshot,
            &self.audit,
            &self.degraded,
        );
    }
}

// ============================================================================
// Quality scoring
// ============================================================================

/// What a quality validation is gating. Conversions carry monetary
/// consequence and are held to a stricter bar than clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Click,
    Conversion,
}

impl ValidationKind {
    pub fn acceptance_floor(&self) -> u32 {
        match self {
            ValidationKind::Click => 60,
            ValidationKind::Conversion => 70,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityVerdict {
    pub score: u32,
    pub accepted: bool,
}

/// `max(0, 100 - penalty * failed_checks)`.
pub fn quality_score(failed_checks: u32, penalty: u32) -> u32 {
    100u32.saturating_sub(penalty.saturating_mul(failed_checks))
}

/// Run the verdict for a set of independent boolean checks.
pub fn validate_quality(checks: &[bool], kind: ValidationKind, penalty: u32) -> QualityVerdict {
    let failed = checks.iter().filter(|passed| !**passed).count() as u32;
    let score = quality_score(failed, penalty);
    QualityVerdict {
        score,
        accepted: score >= kind.acceptance_floor(),
    }
}
