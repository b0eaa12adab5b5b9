mod license;
mod usage;

pub use license::*;
pub use usage::*;

use axum::{
    Router,
    routing::{get, post},
};

use crate::db::AppState;
use crate::extractors::Json;
use crate::models::HealthResponse;

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/license/activate", post(activate_license))
        .route("/api/license/validate", post(validate_license))
        .route("/api/license/track", post(track_usage))
        .route("/api/license/track-batch", post(track_usage_batch))
        .route("/api/license/usage-stats", get(usage_stats))
}
