//! Usage tracking and statistics

#[path = "../common/mod.rs"]
mod common;

use chrono::Utc;
use common::*;
use licensor::service::{MSG_BATCH_TRACKED, MSG_TRACKED};
use serde_json::{Map, Value, json};

fn metadata(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

#[test]
fn test_track_usage() {
    let env = setup_service();
    let (_, _, key) = setup_license(&env, BUILTIN_V1, 1, None);

    let resp = env
        .service
        .track_usage(&TrackUsageRequest {
            license_key: key.key.clone(),
            event_type: "feature_used".into(),
            event_name: "export".into(),
            event_data: Some(json!({ "rows": 10 })),
            metadata: None,
        })
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.message, MSG_TRACKED);
    assert!(!resp.usage_id.is_empty());

    let events = queries::list_usage_events(&env.conn(), &key.id, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, resp.usage_id);
    assert_eq!(events[0].event_data["rows"], 10);
    assert_eq!(events[0].metadata, json!({}));
}

#[test]
fn test_track_usage_unknown_key() {
    let env = setup_service();
    let result = env.service.track_usage(&TrackUsageRequest {
        license_key: "PFX-MISSING".into(),
        event_type: "custom".into(),
        event_name: "x".into(),
        event_data: None,
        metadata: None,
    });
    assert_eq!(license_err(result), LicenseError::key_not_found());
}

#[test]
fn test_tracking_works_for_revoked_keys() {
    // Analytics are keyed by license, not gated by its standing.
    let env = setup_service();
    let (_, _, key) = setup_license(&env, BUILTIN_V1, 1, None);
    env.service.revoke_key(&key.key).unwrap();

    env.service
        .track_app_opened(&key.key, Map::new())
        .unwrap();
}

#[test]
fn test_convenience_trackers() {
    let env = setup_service();
    let (_, _, key) = setup_license(&env, BUILTIN_V1, 1, None);

    env.service
        .track_app_opened(&key.key, metadata(&[("app_version", "1.2.0")]))
        .unwrap();
    env.service
        .track_feature_usage(&key.key, "export", Some(json!({ "format": "csv" })), Map::new())
        .unwrap();
    env.service
        .track_error(&key.key, "disk full", None, Map::new())
        .unwrap();

    let events = queries::list_usage_events(&env.conn(), &key.id, 10).unwrap();
    let mut names: Vec<(String, String)> = events
        .iter()
        .map(|e| (e.event_type.clone(), e.event_name.clone()))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            ("app_opened".to_string(), "Application Opened".to_string()),
            ("error_occurred".to_string(), "disk full".to_string()),
            ("feature_used".to_string(), "export".to_string()),
        ]
    );
}

#[test]
fn test_track_batch() {
    let env = setup_service();
    let (_, _, key) = setup_license(&env, BUILTIN_V1, 1, None);

    let resp = env
        .service
        .track_usage_batch(&TrackBatchRequest {
            license_key: key.key.clone(),
            events: vec![
                BatchEvent {
                    event_type: Some("feature_used".into()),
                    name: Some("export".into()),
                    data: None,
                    metadata: Some(metadata(&[("screen", "main")])),
                },
                BatchEvent::default(),
            ],
            metadata: Some(metadata(&[("app_version", "1.2.0"), ("screen", "none")])),
        })
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.message, MSG_BATCH_TRACKED);
    assert_eq!(resp.tracked_count, 2);

    let events = queries::list_usage_events(&env.conn(), &key.id, 10).unwrap();
    let feature = events.iter().find(|e| e.event_type == "feature_used").unwrap();
    assert_eq!(feature.metadata["screen"], "main");
    assert_eq!(feature.metadata["app_version"], "1.2.0");

    let fallback = events.iter().find(|e| e.event_type == DEFAULT_EVENT_TYPE).unwrap();
    assert_eq!(fallback.event_name, DEFAULT_EVENT_NAME);
    assert_eq!(fallback.metadata["screen"], "none");
}

#[test]
fn test_empty_batch() {
    let env = setup_service();
    let (_, _, key) = setup_license(&env, BUILTIN_V1, 1, None);

    let resp = env
        .service
        .track_usage_batch(&TrackBatchRequest {
            license_key: key.key.clone(),
            events: vec![],
            metadata: None,
        })
        .unwrap();
    assert_eq!(resp.tracked_count, 0);
}

#[test]
fn test_usage_stats_by_period() {
    let env = setup_service();
    let (_, _, key) = setup_license(&env, BUILTIN_V1, 1, None);
    let conn = env.conn();

    let now = Utc::now();
    let month = UsagePeriod::Month.since(now).unwrap();

    queries::insert_usage_event(&conn, &key.id, &usage_event("app_opened")).unwrap();
    queries::insert_usage_event(&conn, &key.id, &usage_event("feature_used")).unwrap();
    // Before the start of this month, so outside today/week/month.
    queries::insert_usage_event_at(&conn, &key.id, &usage_event("app_opened"), month - 10 * ONE_DAY).unwrap();

    let all = env.service.usage_stats(&key.key, UsagePeriod::All).unwrap();
    assert_eq!(all.total_events, 3);
    assert_eq!(all.events_by_type.get("app_opened"), Some(&2));
    assert_eq!(all.period, UsagePeriod::All);

    let today_stats = env.service.usage_stats(&key.key, UsagePeriod::Today).unwrap();
    assert_eq!(today_stats.total_events, 2);
    assert_eq!(today_stats.events_by_type.get("app_opened"), Some(&1));

    let month_stats = env.service.usage_stats(&key.key, UsagePeriod::Month).unwrap();
    assert_eq!(month_stats.total_events, 2);
}

#[test]
fn test_usage_stats_unknown_key() {
    let env = setup_service();
    assert_eq!(
        license_err(env.service.usage_stats("PFX-MISSING", UsagePeriod::All)),
        LicenseError::key_not_found()
    );
}
