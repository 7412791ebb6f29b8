use std::fs;

use serde_json::{Map, Value, json};
use swarm_orchestrator::core::events::{EventQuery, EventType, SwarmEvent};
use swarm_orchestrator::io::event_bus::{EventBus, query_events};

fn full_payload(event_type: EventType) -> Map<String, Value> {
    event_type
        .allowed_fields()
        .iter()
        .map(|field| (field.to_string(), json!(format!("{field}-value"))))
        .collect()
}

#[test]
fn every_event_type_survives_the_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("events");
    let bus = EventBus::persistent(&dir);

    let mut emitted: Vec<SwarmEvent> = Vec::new();
    for (idx, event_type) in EventType::ALL.into_iter().enumerate() {
        let event = SwarmEvent::new(event_type, "billing")
            .with_issue(idx as u64)
            .with_source("critic")
            .with_payload(full_payload(event_type));
        emitted.push(bus.emit(event).expect("allowed payload"));
    }

    let mut reloaded = query_events(&dir, &EventQuery::default()).expect("query");
    reloaded.sort_by_key(|e| e.issue_number);
    assert_eq!(reloaded, emitted);
}

#[test]
fn queries_filter_by_feature_type_and_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bus = EventBus::persistent(temp.path());
    for feature in ["auth", "billing", "auth"] {
        bus.emit_event(
            EventType::IssueDone,
            feature,
            Some(1),
            Map::from_iter([("retries".to_string(), json!(0))]),
        )
        .expect("emit");
        bus.emit_event(EventType::IssueBlocked, feature, Some(2), Map::new())
            .expect("emit");
    }

    let auth_done = bus
        .query(&EventQuery {
            feature_id: Some("auth".to_string()),
            event_types: vec![EventType::IssueDone],
            ..EventQuery::default()
        })
        .expect("query");
    assert_eq!(auth_done.len(), 2);
    assert!(
        auth_done
            .iter()
            .all(|e| e.feature_id == "auth" && e.event_type == EventType::IssueDone)
    );

    let limited = bus
        .query(&EventQuery {
            limit: Some(3),
            ..EventQuery::default()
        })
        .expect("query");
    assert_eq!(limited.len(), 3);

    let future = bus
        .query(&EventQuery {
            since: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
            ..EventQuery::default()
        })
        .expect("query");
    assert!(future.is_empty());
}

#[test]
fn malformed_log_lines_are_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bus = EventBus::persistent(temp.path());
    let event = bus
        .emit_event(EventType::IssueFailed, "auth", Some(4), Map::new())
        .expect("emit");

    let log = fs::read_dir(temp.path())
        .expect("read dir")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .find(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .expect("log file");
    let mut contents = fs::read_to_string(&log).expect("read log");
    contents.push_str("{not json\n\n");
    fs::write(&log, contents).expect("write log");

    let events = query_events(temp.path(), &EventQuery::default()).expect("query");
    assert_eq!(events, vec![event]);
}

#[test]
fn a_rejected_payload_leaves_no_trace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bus = EventBus::persistent(temp.path());

    let err = bus
        .emit_event(
            EventType::IssueDone,
            "auth",
            Some(1),
            Map::from_iter([
                ("commit".to_string(), json!("abc123")),
                ("api_key".to_string(), json!("secret")),
            ]),
        )
        .expect_err("api_key is not allowed");
    assert_eq!(err.event_type, EventType::IssueDone);
    assert_eq!(err.unexpected, vec!["api_key"]);
    assert!(err.to_string().contains("api_key"));
    assert!(
        fs::read_dir(temp.path())
            .expect("read dir")
            .next()
            .is_none()
    );
}
