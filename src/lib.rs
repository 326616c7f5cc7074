//! In-process security layer for a content-subscription platform.
//!
//! Inbound actions pass through the rate limiter, the firewall, and then
//! session validation; the cipher engine is invoked ad hoc by anything
//! needing confidentiality; backups and sweeps run on background timers,
//! off the request path.
//!
//! [`Shield`] is the single context object: constructed once at process
//! start, shared via `Arc`, and injected into request handlers. Each store
//! it owns is independently locked, and a security decision is always
//! computed from in-memory state before any persistence happens — a failed
//! write is audited and surfaced in the report, never turned into a
//! denial.

pub mod audit;
pub mod backup;
pub mod config;
pub mod error;
pub mod firewall;
pub mod ratelimit;
pub mod report;
pub mod sanitize;
pub mod session;
pub mod storage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

pub use shield_crypto::{
    generate_secure_token, verify_password, CipherEngine, CryptoError, EncryptionEnvelope,
    PasswordRecord,
};

pub use audit::{AuditLog, AuditLogEntry};
pub use backup::{BackupManager, BackupRecord};
pub use config::ShieldConfig;
pub use error::{Result, SecurityError};
pub use firewall::{
    quality_score, validate_quality, Admission, DenyReason, Firewall, QualityVerdict,
    RequestDescriptor, Severity, ThreatRecord, ThreatStatus, ValidationKind,
};
pub use ratelimit::{ActionClass, RateLimiter};
pub use report::{
    BackupSummary, FirewallSummary, RateLimitSummary, SecurityReport, SessionSummary,
    ThreatSummary,
};
pub use sanitize::{sanitize_input, InputKind};
pub use session::{ClientFingerprint, Session, SessionManager};
pub use storage::{KvStore, MemoryBackend};
#[cfg(feature = "sqlite")]
pub use storage::SqliteBackend;

/// Threat records included in the report.
const REPORT_RECENT_THREATS: usize = 10;

/// Audit entries included in the report.
const REPORT_RECENT_AUDIT: usize = 20;

// ============================================================================
// Shield
// ============================================================================

/// The security layer's context object. One instance per process.
pub struct Shield {
    config: ShieldConfig,
    engine: Arc<CipherEngine>,
    audit: Arc<AuditLog>,
    sessions: Arc<SessionManager>,
    rate_limiter: Arc<RateLimiter>,
    firewall: Arc<Firewall>,
    backups: Arc<BackupManager>,
    degraded: Arc<AtomicBool>,
}

impl Shield {
    /// Build the layer and hydrate every store from the key-value store.
    ///
    /// `root_secret` seeds the cipher engine; it never leaves the engine.
    pub fn new(
        config: ShieldConfig,
        root_secret: &str,
        store: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let degraded = Arc::new(AtomicBool::new(false));
        let audit = Arc::new(AuditLog::new(
            &config.audit,
            Arc::clone(&store),
            Arc::clone(&degraded),
        ));
        let engine = Arc::new(CipherEngine::with_iterations(
            root_secret.as_bytes().to_vec(),
            config.crypto.encryption_iterations,
        ));
        let sessions = Arc::new(SessionManager::new(
            config.session.clone(),
            config.crypto.session_token_bytes,
            Arc::clone(&audit),
            Arc::clone(&store),
            Arc::clone(&degraded),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            Arc::clone(&audit),
            Arc::clone(&store),
            Arc::clone(&degraded),
        ));
        let firewall = Arc::new(Firewall::new(
            config.firewall.clone(),
            Arc::clone(&audit),
            Arc::clone(&store),
            Arc::clone(&degraded),
        )?);
        let backups = Arc::new(BackupManager::new(
            config.backup.clone(),
            Arc::clone(&engine),
            Arc::clone(&sessions),
            Arc::clone(&firewall),
            Arc::clone(&audit),
            Arc::clone(&store),
            Arc::clone(&degraded),
        ));

        audit.hydrate();
        sessions.hydrate();
        rate_limiter.hydrate();
        firewall.hydrate();
        backups.hydrate();

        tracing::info!("security layer initialized");
        Ok(Self {
            config,
            engine,
            audit,
            sessions,
            rate_limiter,
            firewall,
            backups,
            degraded,
        })
    }

    // ------------------------------------------------------------------
    // Admission pipeline
    // ------------------------------------------------------------------

    /// Admit one inbound action: rate limiter, then firewall, then (when a
    /// session id is supplied) session validation against the request's
    /// fingerprint.
    ///
    /// The three checks are independent decisions against independently
    /// locked stores; a session may expire between checks and will simply
    /// fail its own.
    pub fn admit(
        &self,
        request: &RequestDescriptor,
        class: ActionClass,
        session_id: Option<&str>,
    ) -> Result<()> {
        if !self.rate_limiter.check_limit(&request.actor_id, class) {
            // Rate pressure feeds the firewall's activity signal
            self.firewall
                .record_suspicious_activity(&request.actor_id, "rate_limit");
            return Err(SecurityError::RateLimitExceeded {
                subject: request.actor_id.clone(),
                class,
            });
        }

        let admission = self.firewall.check_request(request);
        if !admission.allowed {
            return match admission.reason {
                Some(DenyReason::Blocked) => Err(SecurityError::Blocked {
                    actor: request.actor_id.clone(),
                }),
                Some(reason) => Err(SecurityError::Denied { reason }),
                None => Err(SecurityError::Denied {
                    reason: DenyReason::SuspiciousActivity,
                }),
            };
        }

        if let Some(id) = session_id {
            let fingerprint = ClientFingerprint::new(&request.user_agent, &request.ip);
            if !self.sessions.validate_session(id, &fingerprint) {
                return Err(SecurityError::Validation(
                    "session invalid or expired".to_string(),
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cipher engine
    // ------------------------------------------------------------------

    pub fn encrypt(&self, plaintext: &[u8], key: Option<&str>) -> Result<EncryptionEnvelope> {
        Ok(self.engine.encrypt(plaintext, key)?)
    }

    pub fn decrypt(&self, envelope: &EncryptionEnvelope, key: Option<&str>) -> Result<Vec<u8>> {
        Ok(self.engine.decrypt(envelope, key)?)
    }

    /// Hash a password with the configured iteration count.
    pub fn hash_password(&self, password: &str) -> Result<PasswordRecord> {
        Ok(shield_crypto::hash_password_with_iterations(
            password,
            None,
            self.config.crypto.password_iterations,
        )?)
    }

    pub fn verify_password(&self, password: &str, record: &PasswordRecord) -> bool {
        shield_crypto::verify_password(password, record)
    }

    pub fn generate_secure_token(&self, byte_length: usize) -> Result<String> {
        Ok(shield_crypto::generate_secure_token(byte_length)?)
    }

    pub fn sanitize_input(&self, input: &str, kind: InputKind) -> String {
        sanitize::sanitize_input(input, kind)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn create_session(
        &self,
        user_id: &str,
        fingerprint: ClientFingerprint,
    ) -> Result<Session> {
        self.sessions.create_session(user_id, fingerprint)
    }

    pub fn validate_session(&self, id: &str, fingerprint: &ClientFingerprint) -> bool {
        self.sessions.validate_session(id, fingerprint)
    }

    pub fn destroy_session(&self, id: &str) {
        self.sessions.destroy_session(id)
    }

    pub fn list_active_sessions(&self) -> Vec<Session> {
        self.sessions.list_active_sessions()
    }

    // ------------------------------------------------------------------
    // Rate limiting
    // ------------------------------------------------------------------

    pub fn check_limit(&self, subject: &str, class: ActionClass) -> bool {
        self.rate_limiter.check_limit(subject, class)
    }

    // ------------------------------------------------------------------
    // Firewall
    // ------------------------------------------------------------------

    pub fn check_request(&self, request: &RequestDescriptor) -> Admission {
        self.firewall.check_request(request)
    }

    pub fn block_actor(&self, actor_id: &str) {
        self.firewall.block_actor(actor_id)
    }

    pub fn unblock_actor(&self, actor_id: &str) {
        self.firewall.unblock_actor(actor_id)
    }

    /// Score a click or conversion against the configured penalty.
    pub fn validate_quality(&self, checks: &[bool], kind: ValidationKind) -> QualityVerdict {
        firewall::validate_quality(checks, kind, self.config.firewall.quality_penalty)
    }

    // ------------------------------------------------------------------
    // Backups
    // ------------------------------------------------------------------

    pub fn create_backup(&self) -> Result<BackupRecord> {
        self.backups.create_backup()
    }

    pub fn restore_backup(&self, id: &str) -> Result<()> {
        self.backups.restore_backup(id)
    }

    pub fn list_backups(&self) -> Vec<BackupRecord> {
        self.backups.list_backups()
    }

    // ------------------------------------------------------------------
    // Report & component access
    // ------------------------------------------------------------------

    /// Point-in-time operational snapshot across every store.
    pub fn security_report(&self) -> SecurityReport {
        let (active_threats, resolved_threats) = self.firewall.threat_counts();
        let mut recent_threats = self.firewall.threats();
        let skip = recent_threats.len().saturating_sub(REPORT_RECENT_THREATS);
        recent_threats.drain(..skip);

        let active_sessions = self.sessions.list_active_sessions();
        let distinct_users = {
            let mut users: Vec<&str> = active_sessions.iter().map(|s| s.user_id.as_str()).collect();
            users.sort_unstable();
            users.dedup();
            users.len()
        };

        SecurityReport {
            generated_at: Utc::now(),
            threats: ThreatSummary {
                active: active_threats,
                resolved: resolved_threats,
                recent: recent_threats,
            },
            sessions: SessionSummary {
                active: active_sessions.len(),
                distinct_users,
            },
            rate_limits: RateLimitSummary {
                tracked_subjects: self.rate_limiter.tracked_subjects(),
            },
            firewall: FirewallSummary {
                blocked_actors: self.firewall.blocked_actors(),
                actors_under_watch: self.firewall.actors_under_watch(),
            },
            backups: BackupSummary {
                count: self.backups.list_backups().len(),
                last_backup_at: self.backups.last_backup_at(),
            },
            recent_audit_entries: self.audit.recent(REPORT_RECENT_AUDIT),
            persistence_degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn firewall(&self) -> &Arc<Firewall> {
        &self.firewall
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    // ------------------------------------------------------------------
    // Maintenance timers
    // ------------------------------------------------------------------

    /// Spawn the background timers: session sweep, rate-window cleanup,
    /// audit purge, scheduled backups. Requires a tokio runtime. The
    /// returned handle aborts every task when dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        use std::time::Duration;
        use tokio::time::{interval_at, Instant};

        let every = |secs: u64| {
            let period = Duration::from_secs(secs.max(1));
            // Skip the immediate first tick
            interval_at(Instant::now() + period, period)
        };

        let shield = Arc::clone(self);
        let sweep = tokio::spawn({
            let mut tick = every(shield.config.session.sweep_interval_secs);
            async move {
                loop {
                    tick.tick().await;
                    shield.sessions.sweep_expired_at(Utc::now());
                }
            }
        });

        let shield = Arc::clone(self);
        let cleanup = tokio::spawn({
            let mut tick = every(shield.config.rate_limit.cleanup_interval_secs);
            async move {
                loop {
                    tick.tick().await;
                    shield.rate_limiter.cleanup_stale_at(Utc::now());
                }
            }
        });

        let shield = Arc::clone(self);
        let purge = tokio::spawn({
            let mut tick = every(shield.config.audit.purge_interval_secs);
            async move {
                loop {
                    tick.tick().await;
                    shield.audit.purge_expired_at(Utc::now());
                }
            }
        });

        let shield = Arc::clone(self);
        let backup = tokio::spawn({
            let mut tick = every(shield.config.backup.interval_secs);
            async move {
                loop {
                    tick.tick().await;
                    if let Err(e) = shield.backups.create_backup() {
                        tracing::error!(error = %e, "scheduled backup failed");
                    }
                }
            }
        });

        MaintenanceHandle {
            tasks: vec![sweep, cleanup, purge, backup],
        }
    }
}

/// Aborts the maintenance tasks on shutdown (or on drop).
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassLimit, CryptoConfig, RateLimitConfig};

    fn test_config() -> ShieldConfig {
        ShieldConfig {
            crypto: CryptoConfig {
                encryption_iterations: 1_000,
                password_iterations: 1_000,
                ..Default::default()
            },
            rate_limit: RateLimitConfig {
                api: ClassLimit {
                    limit: 3,
                    window_secs: 60,
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_shield() -> Shield {
        Shield::new(test_config(), "unit-test-secret", Arc::new(MemoryBackend::new())).unwrap()
    }

    fn request(actor: &str) -> RequestDescriptor {
        RequestDescriptor {
            actor_id: actor.to_string(),
            user_agent: "Mozilla/5.0 (Macintosh)".to_string(),
            url: "/videos/1".to_string(),
            ip: "1.2.3.4".to_string(),
        }
    }

    #[test]
    fn admit_allows_benign_traffic() {
        let shield = make_shield();
        assert!(shield.admit(&request("actor"), ActionClass::Api, None).is_ok());
    }

    #[test]
    fn admit_rejects_over_limit() {
        let shield = make_shield();
        for _ in 0..3 {
            shield.admit(&request("actor"), ActionClass::Api, None).unwrap();
        }
        assert!(matches!(
            shield.admit(&request("actor"), ActionClass::Api, None),
            Err(SecurityError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn admit_rejects_blocked_actor() {
        let shield = make_shield();
        shield.block_actor("actor");
        assert!(matches!(
            shield.admit(&request("actor"), ActionClass::Api, None),
            Err(SecurityError::Blocked { .. })
        ));
    }

    #[test]
    fn admit_validates_session_when_supplied() {
        let shield = make_shield();
        let fingerprint = ClientFingerprint::new("Mozilla/5.0 (Macintosh)", "1.2.3.4");
        let session = shield.create_session("user-1", fingerprint).unwrap();

        assert!(shield
            .admit(&request("actor"), ActionClass::Api, Some(&session.id))
            .is_ok());
        assert!(matches!(
            shield.admit(&request("actor"), ActionClass::Api, Some("bogus-session")),
            Err(SecurityError::Validation(_))
        ));
    }

    #[test]
    fn report_reflects_state() {
        let shield = make_shield();
        shield.block_actor("bad-actor");
        shield
            .create_session("user-1", ClientFingerprint::new("ua", "ip"))
            .unwrap();
        shield.create_backup().unwrap();

        let report = shield.security_report();
        assert_eq!(report.firewall.blocked_actors, vec!["bad-actor".to_string()]);
        assert_eq!(report.sessions.active, 1);
        assert_eq!(report.sessions.distinct_users, 1);
        assert_eq!(report.backups.count, 1);
        assert!(!report.persistence_degraded);
        assert!(!report.recent_audit_entries.is_empty());
    }
}
