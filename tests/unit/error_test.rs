//! Tests for error types

use capacity_scheduler::core::SchedulerError;

#[test]
fn test_store_persist_error() {
    let err = SchedulerError::StorePersist("disk full".to_string());
    assert_eq!(format!("{}", err), "store persist failed: disk full");
}

#[test]
fn test_timeout_error() {
    let err = SchedulerError::Timeout {
        operation: "stake refresh",
        timeout_ms: 250,
    };
    assert_eq!(format!("{}", err), "stake refresh timed out after 250ms");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_recoverable_classification() {
    assert!(SchedulerError::RegistryRefresh("feed down".into()).is_recoverable());
    assert!(SchedulerError::StorePersist("io".into()).is_recoverable());
    assert!(SchedulerError::PolicyViolation("sum".into()).is_recoverable());
    assert!(SchedulerError::Timeout {
        operation: "store write",
        timeout_ms: 1
    }
    .is_recoverable());
    assert!(!SchedulerError::StoreRead("io".into()).is_recoverable());
    assert!(!SchedulerError::Config("bad".into()).is_recoverable());
    assert!(!SchedulerError::InvalidInput("bad".into()).is_recoverable());
}
