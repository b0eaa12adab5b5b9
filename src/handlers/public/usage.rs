use axum::extract::State;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::{
    BatchTrackResponse, TrackBatchRequest, TrackUsageRequest, TrackUsageResponse, UsagePeriod,
    UsageStats, UsageStatsQuery,
};

/// POST /api/license/track
pub async fn track_usage(
    State(state): State<AppState>,
    Json(req): Json<TrackUsageRequest>,
) -> Result<Json<TrackUsageResponse>> {
    Ok(Json(state.service.track_usage(&req)?))
}

/// POST /api/license/track-batch
pub async fn track_usage_batch(
    State(state): State<AppState>,
    Json(req): Json<TrackBatchRequest>,
) -> Result<Json<BatchTrackResponse>> {
    Ok(Json(state.service.track_usage_batch(&req)?))
}

/// GET /api/license/usage-stats?license_key=...&period=today|week|month|all
pub async fn usage_stats(
    State(state): State<AppState>,
    Query(query): Query<UsageStatsQuery>,
) -> Result<Json<UsageStats>> {
    let period = query
        .period
        .as_deref()
        .map(UsagePeriod::parse)
        .unwrap_or_default();
    Ok(Json(state.service.usage_stats(&query.license_key, period)?))
}
