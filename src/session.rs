//! Session lifecycle: creation, validation, fingerprint binding, expiry.
//!
//! A session is destroyed explicitly (logout), displaced by the per-user
//! concurrency cap, or reclaimed by the expiry sweep. A fingerprint
//! mismatch denies without destroying: a spoofed request must not evict
//! the legitimate client still holding the session.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::storage::{keys, KvStore};

/// Client-identifying attributes a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub user_agent: String,
    pub ip: String,
}

impl ClientFingerprint {
    pub fn new(user_agent: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ip: ip.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub fingerprint: ClientFingerprint,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    config: SessionConfig,
    token_bytes: usize,
    audit: Arc<AuditLog>,
    store: Arc<dyn KvStore>,
    degraded: Arc<AtomicBool>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        token_bytes: usize,
        audit: Arc<AuditLog>,
        store: Arc<dyn KvStore>,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            token_bytes,
            audit,
            store,
            degraded,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::seconds(self.config.timeout_secs as i64)
    }

    fn renew_threshold(&self) -> Duration {
        Duration::seconds(self.config.renew_threshold_secs as i64)
    }

    /// Load previously persisted sessions.
    pub fn hydrate(&self) {
        if let Some(saved) = crate::storage::load_best_effort::<Vec<Session>>(
            self.store.as_ref(),
            keys::SESSIONS,
            &self.audit,
        ) {
            let mut sessions = self.sessions.lock();
            *sessions = saved.into_iter().map(|s| (s.id.clone(), s)).collect();
        }
    }

    /// Create a session for `user_id`, evicting the user's oldest session
    /// (by `created_at`) when the concurrency cap is reached.
    pub fn create_session(&self, user_id: &str, fingerprint: ClientFingerprint) -> Result<Session> {
        self.create_session_at(Utc::now(), user_id, fingerprint)
    }

    pub fn create_session_at(
        &self,
        now: DateTime<Utc>,
        user_id: &str,
        fingerprint: ClientFingerprint,
    ) -> Result<Session> {
        let id = shield_crypto::generate_secure_token(self.token_bytes)?;
        let session = Session {
            id: id.clone(),
            user_id: user_id.to_string(),
            fingerprint,
            created_at: now,
            last_activity: now,
            expires_at: now + self.timeout(),
        };

        let evicted = {
            let mut sessions = self.sessions.lock();

            let mut evicted = None;
            let user_count = sessions.values().filter(|s| s.user_id == user_id).count();
            if user_count >= self.config.max_sessions_per_user {
                let oldest = sessions
                    .values()
                    .filter(|s| s.user_id == user_id)
                    .min_by_key(|s| s.created_at)
                    .map(|s| s.id.clone());
                if let Some(oldest_id) = oldest {
                    evicted = sessions.remove(&oldest_id).map(|s| s.id);
                }
            }

            sessions.insert(id.clone(), session.clone());
            evicted
        };

        if let Some(evicted_id) = evicted {
            tracing::info!(user = %user_id, "session cap reached, evicted oldest");
            self.audit
                .record("session.evicted", &evicted_id, Some(user_id));
        }
        self.audit.record("session.created", &id, Some(user_id));
        self.persist();
        Ok(session)
    }

    /// Validate a session against the requesting client's fingerprint.
    ///
    /// Expired sessions are purged on sight. A fingerprint mismatch (with
    /// binding enabled) denies but leaves the session in place. Success
    /// updates `last_activity` and slides `expires_at` forward only when
    /// the remaining lifetime is below the renew threshold, so renewal
    /// writes stay bounded. `expires_at` never moves backwards.
    pub fn validate_session(&self, id: &str, fingerprint: &ClientFingerprint) -> bool {
        self.validate_session_at(Utc::now(), id, fingerprint)
    }

    pub fn validate_session_at(
        &self,
        now: DateTime<Utc>,
        id: &str,
        fingerprint: &ClientFingerprint,
    ) -> bool {
        enum Outcome {
            Missing,
            Expired(String),
            Mismatch(String),
            Valid,
        }

        let outcome = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(id) {
                None => Outcome::Missing,
                Some(session) if now > session.expires_at => {
                    let user = session.user_id.clone();
                    sessions.remove(id);
                    Outcome::Expired(user)
                }
                Some(session) => {
                    if self.config.bind_fingerprint && session.fingerprint != *fingerprint {
                        Outcome::Mismatch(session.user_id.clone())
                    } else {
                        session.last_activity = now;
                        if session.expires_at - now < self.renew_threshold() {
                            session.expires_at = now + self.timeout();
                        }
                        Outcome::Valid
                    }
                }
            }
        };

        match outcome {
            Outcome::Missing => false,
            Outcome::Expired(user) => {
                self.audit.record("session.expired", id, Some(&user));
                self.persist();
                false
            }
            Outcome::Mismatch(user) => {
                tracing::warn!(session = %id, user = %user, "fingerprint mismatch");
                self.audit
                    .record("session.fingerprint_mismatch", id, Some(&user));
                false
            }
            Outcome::Valid => {
                self.persist();
                true
            }
        }
    }

    /// Unconditional removal; calling it twice is a no-op.
    pub fn destroy_session(&self, id: &str) {
        let removed = self.sessions.lock().remove(id);
        if let Some(session) = removed {
            self.audit
                .record("session.destroyed", id, Some(&session.user_id));
            self.persist();
        }
    }

    /// Sessions whose `expires_at` has not passed.
    pub fn list_active_sessions(&self) -> Vec<Session> {
        self.list_active_sessions_at(Utc::now())
    }

    pub fn list_active_sessions_at(&self, now: DateTime<Utc>) -> Vec<Session> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.expires_at >= now)
            .cloned()
            .collect()
    }

    /// Active sessions belonging to one user.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        let now = Utc::now();
        self.sessions
            .lock()
            .values()
            .filter(|s| s.user_id == user_id && s.expires_at >= now)
            .cloned()
            .collect()
    }

    /// Remove every expired session. The only reclaim path for sessions
    /// abandoned without logout. Returns the number removed.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let removed = {
            let mut sessions = self.sessions.lock();
            let before = sessions.len();
            sessions.retain(|_, s| s.expires_at >= now);
            before - sessions.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
            self.audit
                .record("session.sweep", &format!("removed {removed}"), None);
            self.persist();
        }
        removed
    }

    /// Full snapshot for the backup pipeline.
    pub(crate) fn snapshot(&self) -> Vec<Session> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Replace the whole table (backup restore). Callers validate first.
    pub(crate) fn replace_all(&self, sessions: Vec<Session>) {
        {
            let mut table = self.sessions.lock();
            *table = sessions.into_iter().map(|s| (s.id.clone(), s)).collect();
        }
        self.persist();
    }

    fn persist(&self) {
        let snapshot = self.snapshot();
        crate::storage::save_best_effort(
            self.store.as_ref(),
            keys::SESSIONS,
            &snapshot,
            &self.audit,
            &self.degraded,
        );
    }
}
