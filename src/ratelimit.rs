//! Sliding-window rate limiting keyed by (subject, action class).
//!
//! A true sliding window: retained admission timestamps are pruned against
//! `now - window` on every check, so a burst cannot reset itself by
//! crossing a bucket boundary. Rejected requests record nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::config::{ClassLimit, RateLimitConfig};
use crate::storage::{keys, KvStore};

/// Request categories with independent windows and thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Login,
    Api,
    Download,
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionClass::Login => write!(f, "login"),
            ActionClass::Api => write!(f, "api"),
            ActionClass::Download => write!(f, "download"),
        }
    }
}

/// Persisted form of one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowSnapshot {
    subject: String,
    class: ActionClass,
    timestamps: Vec<DateTime<Utc>>,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<(String, ActionClass), Vec<DateTime<Utc>>>>,
    config: RateLimitConfig,
    audit: Arc<AuditLog>,
    store: Arc<dyn KvStore>,
    degraded: Arc<AtomicBool>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        audit: Arc<AuditLog>,
        store: Arc<dyn KvStore>,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
            audit,
            store,
            degraded,
        }
    }

    fn class_limit(&self, class: ActionClass) -> &ClassLimit {
        match class {
            ActionClass::Login => &self.config.login,
            ActionClass::Api => &self.config.api,
            ActionClass::Download => &self.config.download,
        }
    }

    /// Load previously persisted windows. Lossy by design: a missing or
    /// unreadable snapshot starts the limiter empty.
    pub fn hydrate(&self) {
        if let Some(saved) = crate::storage::load_best_effort::<Vec<WindowSnapshot>>(
            self.store.as_ref(),
            keys::RATE_WINDOWS,
            &self.audit,
        ) {
            let mut windows = self.windows.lock();
            *windows = saved
                .into_iter()
                .map(|w| ((w.subject, w.class), w.timestamps))
                .collect();
        }
    }

    /// Admit or reject one request. Admission appends `now` to the window;
    /// rejection leaves the window untouched.
    pub fn check_limit(&self, subject: &str, class: ActionClass) -> bool {
        self.check_limit_at(Utc::now(), subject, class)
    }

    pub fn check_limit_at(&self, now: DateTime<Utc>, subject: &str, class: ActionClass) -> bool {
        let ClassLimit { limit, window_secs } = *self.class_limit(class);
        let window_start = now - Duration::seconds(window_secs as i64);

        let admitted = {
            let mut windows = self.windows.lock();
            let timestamps = windows
                .entry((subject.to_string(), class))
                .or_default();
            timestamps.retain(|t| *t >= window_start);

            if timestamps.len() >= limit {
                false
            } else {
                timestamps.push(now);
                true
            }
        };

        if !admitted {
            tracing::warn!(subject = %subject, class = %class, "rate limit exceeded");
            self.audit
                .record("rate_limit.exceeded", &class.to_string(), Some(subject));
        }
        self.persist();
        admitted
    }

    /// Admissions still available to `subject` in the current window.
    pub fn remaining(&self, subject: &str, class: ActionClass) -> usize {
        self.remaining_at(Utc::now(), subject, class)
    }

    pub fn remaining_at(&self, now: DateTime<Utc>, subject: &str, class: ActionClass) -> usize {
        let ClassLimit { limit, window_secs } = *self.class_limit(class);
        let window_start = now - Duration::seconds(window_secs as i64);
        let windows = self.windows.lock();
        let used = windows
            .get(&(subject.to_string(), class))
            .map(|timestamps| timestamps.iter().filter(|t| **t >= window_start).count())
            .unwrap_or(0);
        limit.saturating_sub(used)
    }

    /// Number of (subject, class) windows currently tracked.
    pub fn tracked_subjects(&self) -> usize {
        self.windows.lock().len()
    }

    /// Drop windows whose newest admission is older than the cleanup
    /// lookback. Bounds memory for one-off subjects. Returns the number of
    /// windows removed.
    pub fn cleanup_stale_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.cleanup_lookback_secs as i64);
        let removed = {
            let mut windows = self.windows.lock();
            let before = windows.len();
            windows.retain(|_, timestamps| timestamps.iter().any(|t| *t >= cutoff));
            before - windows.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "dropped stale rate windows");
            self.persist();
        }
        removed
    }

    fn persist(&self) {
        let snapshot: Vec<WindowSnapshot> = {
            let windows = self.windows.lock();
            windows
                .iter()
                .map(|((subject, class), timestamps)| WindowSnapshot {
                    subject: subject.clone(),
                    class: *class,
                    timestamps: timestamps.clone(),
                })
                .collect()
        };
        crate::storage::save_best_effort(
            self.store.as_ref(),
            keys::RATE_WINDOWS,
            &snapshot,
            &self.audit,
            &self.degraded,
        );
    }
}
