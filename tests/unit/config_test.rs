//! Tests for configuration validation

use std::io::Write;
use std::path::PathBuf;

use capacity_scheduler::config::{SchedulerConfig, StoreBackendConfig};
use capacity_scheduler::core::{PolicyKind, TieBreak};

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.policy, PolicyKind::StakeProportional);
    assert_eq!(cfg.tie_break, TieBreak::IdentityAscending);
    assert_eq!(cfg.store, StoreBackendConfig::InMemory);
}

#[test]
fn test_config_invalid_capacity() {
    let invalid = SchedulerConfig {
        capacity_per_window: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_window_length() {
    let invalid = SchedulerConfig {
        window_length: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_backoff() {
    let invalid = SchedulerConfig {
        persist_backoff_ms: 1_000,
        persist_backoff_max_ms: 10,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = SchedulerConfig {
        persist_max_attempts: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_timeouts() {
    for invalid in [
        SchedulerConfig {
            refresh_timeout_ms: 0,
            ..SchedulerConfig::default()
        },
        SchedulerConfig {
            store_timeout_ms: 0,
            ..SchedulerConfig::default()
        },
        SchedulerConfig {
            block_poll_timeout_ms: 0,
            ..SchedulerConfig::default()
        },
    ] {
        assert!(invalid.validate().is_err());
    }
}

#[test]
fn test_schedule_ttl_must_cover_a_window() {
    let cfg = SchedulerConfig {
        window_length: 100,
        block_time_secs: 12,
        schedule_ttl_secs: 1_199,
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("schedule_ttl_secs"));

    let cfg = SchedulerConfig {
        schedule_ttl_secs: 1_200,
        ..cfg
    };
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "capacity_per_window": 100,
        "window_length": 10,
        "block_time_secs": 1,
        "schedule_ttl_secs": 60,
        "policy": "equal",
        "tie_break": "identity_descending",
        "store": { "file": { "path": "/var/lib/capsched" } }
    }"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.capacity_per_window, 100);
    assert_eq!(cfg.policy, PolicyKind::Equal);
    assert_eq!(cfg.tie_break, TieBreak::IdentityDescending);
    assert_eq!(
        cfg.store,
        StoreBackendConfig::File {
            path: PathBuf::from("/var/lib/capsched")
        }
    );
    // unspecified fields keep their defaults
    assert_eq!(cfg.min_guarantee, 40);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{ "window_length": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_from_env_file() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("scheduler.env");
    let mut file = std::fs::File::create(&env_path).unwrap();
    writeln!(file, "CAPSCHED_CAPACITY_PER_WINDOW=250").unwrap();
    writeln!(file, "CAPSCHED_MIN_GUARANTEE=5").unwrap();
    writeln!(file, "CAPSCHED_POLICY=equal").unwrap();
    writeln!(file, "CAPSCHED_BLOCK_POLL_TIMEOUT_MS=750").unwrap();
    writeln!(file, "CAPSCHED_STORE_PATH={}", dir.path().join("store").display()).unwrap();
    drop(file);

    let cfg = SchedulerConfig::from_env(Some(&env_path)).unwrap();
    assert_eq!(cfg.capacity_per_window, 250);
    assert_eq!(cfg.min_guarantee, 5);
    assert_eq!(cfg.policy, PolicyKind::Equal);
    assert_eq!(cfg.block_poll_timeout().as_millis(), 750);
    assert_eq!(cfg.store_timeout().as_millis(), 5_000);
    assert!(matches!(cfg.store, StoreBackendConfig::File { .. }));
}

#[test]
fn test_config_from_missing_env_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(SchedulerConfig::from_env(Some(&dir.path().join("absent.env"))).is_err());
}

#[test]
fn test_duration_helpers() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.window_duration().as_secs(), 360 * 12);
    assert_eq!(cfg.store_timeout().as_millis(), 5_000);
    assert_eq!(cfg.block_poll_timeout().as_millis(), 5_000);
    assert_eq!(cfg.persist_backoff_max().as_millis(), 30_000);
}
