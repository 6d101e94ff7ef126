//! Tests for utility functions

use std::time::Duration;

use capacity_scheduler::util::{expiry_ms, now_ms, ConsumerId, ScheduleKey};

#[test]
fn test_schedule_key_parsing() {
    assert_eq!("current".parse::<ScheduleKey>(), Ok(ScheduleKey::Current));
    assert_eq!(" Current ".parse::<ScheduleKey>(), Ok(ScheduleKey::Current));
    assert_eq!("720".parse::<ScheduleKey>(), Ok(ScheduleKey::Window(720)));
    assert!("latest".parse::<ScheduleKey>().is_err());
    assert!("-1".parse::<ScheduleKey>().is_err());
}

#[test]
fn test_schedule_key_display() {
    assert_eq!(ScheduleKey::Current.to_string(), "current");
    assert_eq!(ScheduleKey::Window(360).to_string(), "360");
}

#[test]
fn test_consumer_id_is_transparent() {
    let id = ConsumerId::from("5F3sa2TJ");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"5F3sa2TJ\"");
    assert_eq!(id.as_str(), "5F3sa2TJ");
    assert_eq!(id.to_string(), "5F3sa2TJ");
}

#[test]
fn test_expiry_saturates() {
    assert_eq!(expiry_ms(1_000, Duration::from_millis(500)), 1_500);
    assert_eq!(expiry_ms(u128::MAX, Duration::from_secs(1)), u128::MAX);
    assert!(now_ms() > 0);
}
