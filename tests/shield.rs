//! Integration tests for the assembled security layer.

use std::sync::Arc;

use shield::config::{ClassLimit, CryptoConfig, RateLimitConfig, SessionConfig, ShieldConfig};
use shield::{
    ActionClass, ClientFingerprint, DenyReason, KvStore, MemoryBackend, RequestDescriptor,
    SecurityError, Shield,
};

// ============================================================================
// Helpers
// ============================================================================

/// Config with cheap KDF settings so tests stay fast.
fn test_config() -> ShieldConfig {
    ShieldConfig {
        crypto: CryptoConfig {
            encryption_iterations: 1_000,
            password_iterations: 1_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn make_shield() -> Shield {
    Shield::new(test_config(), "integration-secret", Arc::new(MemoryBackend::new()))
        .expect("shield init")
}

fn browser_request(actor: &str) -> RequestDescriptor {
    RequestDescriptor {
        actor_id: actor.to_string(),
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)".to_string(),
        url: "/videos/premiere".to_string(),
        ip: "198.51.100.7".to_string(),
    }
}

fn fingerprint_of(request: &RequestDescriptor) -> ClientFingerprint {
    ClientFingerprint::new(&request.user_agent, &request.ip)
}

// ============================================================================
// End-to-end admission flow
// ============================================================================

#[test]
fn login_burst_hits_rate_limit_independent_of_credentials() {
    let mut config = test_config();
    config.rate_limit = RateLimitConfig {
        login: ClassLimit {
            limit: 5,
            window_secs: 900,
        },
        ..Default::default()
    };
    let shield = Shield::new(config, "integration-secret", Arc::new(MemoryBackend::new()))
        .expect("shield init");

    let request = browser_request("actor-x");
    for attempt in 0..5 {
        assert!(
            shield.admit(&request, ActionClass::Login, None).is_ok(),
            "attempt {attempt} should pass the rate check"
        );
    }
    // The 6th is rejected before credentials are ever looked at
    assert!(matches!(
        shield.admit(&request, ActionClass::Login, None),
        Err(SecurityError::RateLimitExceeded { .. })
    ));
}

#[test]
fn authenticated_flow_login_to_logout() {
    let shield = make_shield();
    let request = browser_request("subscriber-1");

    // Password check the way the web layer would run it
    let record = shield.hash_password("correct horse").expect("hash");
    assert!(shield.verify_password("correct horse", &record));
    assert!(!shield.verify_password("wrong staple", &record));

    let session = shield
        .create_session("subscriber-1", fingerprint_of(&request))
        .expect("create session");

    assert!(shield
        .admit(&request, ActionClass::Api, Some(&session.id))
        .is_ok());

    shield.destroy_session(&session.id);
    assert!(matches!(
        shield.admit(&request, ActionClass::Api, Some(&session.id)),
        Err(SecurityError::Validation(_))
    ));
}

#[test]
fn stolen_session_from_other_client_is_rejected_but_survives() {
    let shield = make_shield();
    let request = browser_request("subscriber-1");
    let session = shield
        .create_session("subscriber-1", fingerprint_of(&request))
        .expect("create session");

    let mut hijacked = browser_request("subscriber-1");
    hijacked.ip = "203.0.113.99".to_string();
    assert!(matches!(
        shield.admit(&hijacked, ActionClass::Api, Some(&session.id)),
        Err(SecurityError::Validation(_))
    ));

    // The legitimate client is unaffected
    assert!(shield
        .admit(&request, ActionClass::Api, Some(&session.id))
        .is_ok());
}

#[test]
fn scripted_client_gets_flagged_then_blocked() {
    let shield = make_shield();
    let mut request = browser_request("scraper");
    request.user_agent = "python-requests/2.31".to_string();

    // Every denied probe counts as suspicious activity; past the
    // auto-block threshold the actor is blocked outright
    let mut saw_block = false;
    for _ in 0..15 {
        match shield.admit(&request, ActionClass::Api, None) {
            Err(SecurityError::Blocked { .. }) => {
                saw_block = true;
                break;
            }
            Err(_) => {}
            Ok(_) => panic!("automation signature should never be admitted"),
        }
    }
    assert!(saw_block, "repeated probes should escalate to a block");

    let report = shield.security_report();
    assert_eq!(report.firewall.blocked_actors, vec!["scraper".to_string()]);
    assert!(report.threats.active > 0);

    // Manual unblock lifts the permanent block, but the recent activity
    // still trips the alerting threshold until it ages out
    shield.unblock_actor("scraper");
    assert!(matches!(
        shield.admit(&browser_request("scraper"), ActionClass::Api, None),
        Err(SecurityError::Denied {
            reason: DenyReason::SuspiciousActivity
        })
    ));
}

// ============================================================================
// Backup round trip
// ============================================================================

#[test]
fn backup_round_trip_preserves_sessions_and_firewall() {
    let shield = make_shield();
    let request = browser_request("subscriber-1");
    let session = shield
        .create_session("subscriber-1", fingerprint_of(&request))
        .expect("create session");
    shield.block_actor("bad-actor");

    let backup = shield.create_backup().expect("create backup");

    shield.destroy_session(&session.id);
    shield.unblock_actor("bad-actor");
    assert!(shield.list_active_sessions().is_empty());

    shield.restore_backup(&backup.id).expect("restore");

    assert!(shield.validate_session(&session.id, &fingerprint_of(&request)));
    assert_eq!(
        shield.security_report().firewall.blocked_actors,
        vec!["bad-actor".to_string()]
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[cfg(feature = "sqlite")]
#[test]
fn state_survives_process_restart_on_sqlite() {
    use shield::SqliteBackend;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("shield.db");

    let request = browser_request("subscriber-1");
    let session_id = {
        let store: Arc<dyn KvStore> = Arc::new(SqliteBackend::open(&path).expect("open"));
        let shield = Shield::new(test_config(), "integration-secret", store).expect("init");
        shield.block_actor("bad-actor");
        shield
            .create_session("subscriber-1", fingerprint_of(&request))
            .expect("create session")
            .id
    };

    let store: Arc<dyn KvStore> = Arc::new(SqliteBackend::open(&path).expect("reopen"));
    let shield = Shield::new(test_config(), "integration-secret", store).expect("reinit");

    assert!(shield.validate_session(&session_id, &fingerprint_of(&request)));
    assert!(matches!(
        shield.admit(&browser_request("bad-actor"), ActionClass::Api, None),
        Err(SecurityError::Blocked { .. })
    ));
}

/// A store whose writes always fail, for exercising fail-open persistence.
struct BrokenStore;

impl KvStore for BrokenStore {
    fn get(&self, _key: &str) -> shield::Result<Option<Vec<u8>>> {
        Ok(None)
    }
    fn set(&self, _key: &str, _value: &[u8]) -> shield::Result<()> {
        Err(SecurityError::Storage("disk full".to_string()))
    }
    fn remove(&self, _key: &str) -> shield::Result<()> {
        Err(SecurityError::Storage("disk full".to_string()))
    }
}

#[test]
fn persistence_failure_degrades_report_but_not_decisions() {
    let shield =
        Shield::new(test_config(), "integration-secret", Arc::new(BrokenStore)).expect("init");
    let request = browser_request("subscriber-1");

    // Decisions still come back from memory
    let session = shield
        .create_session("subscriber-1", fingerprint_of(&request))
        .expect("create session despite broken store");
    assert!(shield
        .admit(&request, ActionClass::Api, Some(&session.id))
        .is_ok());

    // But the drift is visible to operators
    assert!(shield.security_report().persistence_degraded);
}

// ============================================================================
// Maintenance timers
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn maintenance_sweeps_expired_sessions() {
    let mut config = test_config();
    config.session = SessionConfig {
        timeout_secs: 1,
        renew_threshold_secs: 0,
        sweep_interval_secs: 1,
        ..Default::default()
    };
    let shield = Arc::new(
        Shield::new(config, "integration-secret", Arc::new(MemoryBackend::new())).expect("init"),
    );
    let _maintenance = shield.spawn_maintenance();

    shield
        .create_session("subscriber-1", ClientFingerprint::new("ua", "ip"))
        .expect("create session");
    assert_eq!(shield.list_active_sessions().len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
    assert!(shield.list_active_sessions().is_empty());
}
