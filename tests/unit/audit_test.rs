//! Tests for audit sinks

use capacity_scheduler::core::{
    build_audit_event, AuditEvent, AuditKind, AuditSink, ChannelAuditSink, InMemoryAuditSink,
    JsonlAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        AuditKind::ScheduleComputed,
        Some(360),
        Some(4),
        Some("{}".to_string()),
    );

    sink.record(event);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditKind::ScheduleComputed);
    assert_eq!(events[0].window_start, Some(360));
    assert_eq!(events[0].generation, Some(4));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(AuditKind::ScheduleComputed, Some(0), None, None));
    sink.record(build_audit_event(AuditKind::ScheduleComputed, Some(10), None, None));
    sink.record(build_audit_event(AuditKind::PersistFailed, Some(20), None, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].window_start, Some(10)); // First one popped
    assert_eq!(events[1].window_start, Some(20));
    assert_eq!(sink.events_of(AuditKind::PersistFailed).len(), 1);
}

#[test]
fn test_build_audit_event_ids_are_unique() {
    let a = build_audit_event(AuditKind::RegistrySuperseded, None, Some(1), None);
    let b = build_audit_event(AuditKind::RegistrySuperseded, None, Some(1), None);
    assert_ne!(a.event_id, b.event_id);
    assert!(a.created_at_ms > 0);
}

#[test]
fn test_channel_sink_forwards_events() {
    let (mut sink, rx) = ChannelAuditSink::bounded(8);
    sink.record(build_audit_event(AuditKind::ComputationDiscarded, Some(7), None, None));
    let received = rx.try_recv().unwrap();
    assert_eq!(received.kind, AuditKind::ComputationDiscarded);
    assert_eq!(sink.dropped(), 0);

    drop(rx);
    sink.record(build_audit_event(AuditKind::ComputationDiscarded, Some(8), None, None));
    assert_eq!(sink.dropped(), 1);
}

#[test]
fn test_jsonl_sink_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = JsonlAuditSink::new(dir.path(), "scheduler").unwrap();
    sink.record(build_audit_event(AuditKind::ScheduleComputed, Some(0), Some(1), None));
    sink.record(build_audit_event(AuditKind::PersistFailed, Some(0), Some(1), None));

    let raw = std::fs::read_to_string(sink.path()).unwrap();
    let events: Vec<AuditEvent> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].kind, AuditKind::PersistFailed);
    assert!(sink.path().ends_with("scheduler_audit.jsonl"));
}
