//! Configuration for every component of the layer.
//!
//! All structs deserialize with `#[serde(default)]` so a partial config
//! file (or none at all) yields working defaults. Durations are plain
//! second counts; the components convert at the boundary.

use serde::{Deserialize, Serialize};

use shield_crypto::{DEFAULT_ENCRYPTION_ITERATIONS, DEFAULT_PASSWORD_ITERATIONS};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    pub crypto: CryptoConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub firewall: FirewallConfig,
    pub backup: BackupConfig,
    pub audit: AuditConfig,
}

/// Key-stretching parameters and token sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iterations for per-call encryption subkeys.
    pub encryption_iterations: u32,

    /// PBKDF2 iterations for password hashing.
    pub password_iterations: u32,

    /// Random bytes per session token (hex-encoded, so ids are 2x chars).
    pub session_token_bytes: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            encryption_iterations: DEFAULT_ENCRYPTION_ITERATIONS,
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
            session_token_bytes: 32,
        }
    }
}

/// Session lifecycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime granted at creation and on renewal, in seconds.
    pub timeout_secs: u64,

    /// Concurrent-session cap per user; oldest is evicted past this.
    pub max_sessions_per_user: usize,

    /// Remaining lifetime below which a successful validation slides
    /// `expires_at` forward, in seconds.
    pub renew_threshold_secs: u64,

    /// Deny validation when the client fingerprint does not match.
    pub bind_fingerprint: bool,

    /// Expiry sweep cadence for the maintenance task, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1_800,
            max_sessions_per_user: 3,
            renew_threshold_secs: 300,
            bind_fingerprint: true,
            sweep_interval_secs: 60,
        }
    }
}

/// Per-class sliding-window limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassLimit {
    pub limit: usize,
    pub window_secs: u64,
}

/// Rate limiting configuration. Each action class has its own window and
/// threshold; they are never shared across classes for the same subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub login: ClassLimit,
    pub api: ClassLimit,
    pub download: ClassLimit,

    /// Subjects with no timestamp inside this lookback are dropped by the
    /// cleanup pass, in seconds.
    pub cleanup_lookback_secs: u64,

    /// Cleanup cadence for the maintenance task, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: ClassLimit {
                limit: 5,
                window_secs: 900,
            },
            api: ClassLimit {
                limit: 100,
                window_secs: 60,
            },
            download: ClassLimit {
                limit: 10,
                window_secs: 3_600,
            },
            cleanup_lookback_secs: 3_600,
            cleanup_interval_secs: 300,
        }
    }
}

/// Firewall thresholds and suspicious-signature patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Trailing window for suspicious-activity counting, in seconds.
    pub activity_window_secs: u64,

    /// Activity count above which requests are denied (no block yet).
    pub alert_threshold: usize,

    /// Activity count above which the actor is auto-blocked.
    pub auto_block_threshold: usize,

    /// Most-recent activity entries retained per actor.
    pub max_activity_entries: usize,

    /// Threat ring capacity; oldest records are evicted past this.
    pub max_threats: usize,

    /// Regex signatures matched against the user agent.
    pub user_agent_signatures: Vec<String>,

    /// Regex signatures matched against the URL.
    pub url_signatures: Vec<String>,

    /// Score penalty per failed quality check.
    pub quality_penalty: u32,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            activity_window_secs: 300,
            alert_threshold: 5,
            auto_block_threshold: 10,
            max_activity_entries: 100,
            max_threats: 500,
            user_agent_signatures: vec![
                r"(?i)\b(bot|crawler|spider|scraper)\b".to_string(),
                r"(?i)\b(curl|wget|python-requests|httpclient)\b".to_string(),
                r"(?i)headless".to_string(),
            ],
            url_signatures: vec![
                r"(?i)<script".to_string(),
                r"(?i)javascript:".to_string(),
                r"(?i)\bunion\s+select\b".to_string(),
                r"\.\./".to_string(),
                r"(?i)\bon\w+\s*=".to_string(),
            ],
            quality_penalty: 20,
        }
    }
}

/// Backup schedule and pipeline switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Scheduled backup cadence for the maintenance task, in seconds.
    pub interval_secs: u64,

    /// History capacity; oldest backups are evicted past this.
    pub max_backups: usize,

    /// Compress the snapshot before encryption.
    pub compress: bool,

    /// Encrypt the (possibly compressed) snapshot.
    pub encrypt: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            max_backups: 10,
            compress: true,
            encrypt: true,
        }
    }
}

/// Audit log retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Entry capacity; oldest entries are evicted past this.
    pub max_entries: usize,

    /// Entries older than this are purged, in seconds.
    pub retention_secs: u64,

    /// Purge cadence for the maintenance task, in seconds.
    pub purge_interval_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            retention_secs: 7 * 86_400,
            purge_interval_secs: 3_600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ShieldConfig::default();
        assert_eq!(config.session.max_sessions_per_user, 3);
        assert_eq!(config.rate_limit.login.limit, 5);
        assert!(config.firewall.alert_threshold < config.firewall.auto_block_threshold);
        assert!(config.backup.compress && config.backup.encrypt);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ShieldConfig =
            serde_json::from_str(r#"{ "session": { "timeout_secs": 60 } }"#).unwrap();
        assert_eq!(config.session.timeout_secs, 60);
        assert_eq!(config.session.max_sessions_per_user, 3);
        assert_eq!(config.rate_limit.api.limit, 100);
    }

    #[test]
    fn default_signatures_compile() {
        let config = FirewallConfig::default();
        for pattern in config
            .user_agent_signatures
            .iter()
            .chain(config.url_signatures.iter())
        {
            assert!(regex::Regex::new(pattern).is_ok(), "bad pattern: {pattern}");
        }
    }
}
