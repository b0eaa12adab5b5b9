//! Usage analytics attached to license keys.

use chrono::Utc;
use serde_json::{Map, Value};

use super::{LicenseService, find_key};
use crate::db::queries;
use crate::error::Result;
use crate::models::*;

pub const MSG_TRACKED: &str = "Usage tracked successfully";
pub const MSG_BATCH_TRACKED: &str = "Batch usage tracked successfully";

impl LicenseService {
    pub fn track_usage(&self, input: &TrackUsageRequest) -> Result<TrackUsageResponse> {
        let conn = self.conn()?;
        let license = find_key(&conn, &input.license_key)?;

        let event = queries::insert_usage_event(
            &conn,
            &license.id,
            &NewUsageEvent {
                event_type: input.event_type.clone(),
                event_name: input.event_name.clone(),
                event_data: input
                    .event_data
                    .clone()
                    .unwrap_or_else(|| Value::Object(Map::new())),
                metadata: Value::Object(input.metadata.clone().unwrap_or_default()),
            },
        )?;

        tracing::debug!(
            license_key_id = %license.id,
            event_type = %event.event_type,
            "Usage event tracked"
        );

        Ok(TrackUsageResponse {
            success: true,
            message: MSG_TRACKED.to_string(),
            usage_id: event.id,
        })
    }

    /// Store all events in one transaction. Shared metadata is merged under
    /// each event's own.
    pub fn track_usage_batch(&self, input: &TrackBatchRequest) -> Result<BatchTrackResponse> {
        let mut conn = self.conn()?;
        let license = find_key(&conn, &input.license_key)?;

        let shared = input.metadata.clone().unwrap_or_default();
        let events: Vec<NewUsageEvent> = input
            .events
            .iter()
            .cloned()
            .map(|e| e.into_new_event(&shared))
            .collect();

        let tracked_count = queries::insert_usage_events(&mut conn, &license.id, &events)?;

        tracing::debug!(license_key_id = %license.id, tracked_count, "Usage batch tracked");

        Ok(BatchTrackResponse {
            success: true,
            message: MSG_BATCH_TRACKED.to_string(),
            tracked_count,
        })
    }

    pub fn track_app_opened(&self, license_key: &str, metadata: Map<String, Value>) -> Result<TrackUsageResponse> {
        self.track_usage(&TrackUsageRequest {
            license_key: license_key.to_string(),
            event_type: "app_opened".into(),
            event_name: "Application Opened".into(),
            event_data: None,
            metadata: Some(metadata),
        })
    }

    pub fn track_feature_usage(
        &self,
        license_key: &str,
        feature: &str,
        data: Option<Value>,
        metadata: Map<String, Value>,
    ) -> Result<TrackUsageResponse> {
        self.track_usage(&TrackUsageRequest {
            license_key: license_key.to_string(),
            event_type: "feature_used".into(),
            event_name: feature.to_string(),
            event_data: data,
            metadata: Some(metadata),
        })
    }

    pub fn track_error(
        &self,
        license_key: &str,
        message: &str,
        data: Option<Value>,
        metadata: Map<String, Value>,
    ) -> Result<TrackUsageResponse> {
        self.track_usage(&TrackUsageRequest {
            license_key: license_key.to_string(),
            event_type: "error_occurred".into(),
            event_name: message.to_string(),
            event_data: data,
            metadata: Some(metadata),
        })
    }

    /// Event totals for the calendar period containing now (UTC).
    pub fn usage_stats(&self, license_key: &str, period: UsagePeriod) -> Result<UsageStats> {
        let conn = self.conn()?;
        let license = find_key(&conn, license_key)?;
        let since = period.since(Utc::now());

        Ok(UsageStats {
            total_events: queries::count_usage_events(&conn, &license.id, since)?,
            events_by_type: queries::count_usage_events_by_type(&conn, &license.id, since)?,
            period,
        })
    }
}
