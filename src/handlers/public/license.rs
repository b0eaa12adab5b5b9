use axum::extract::State;
use axum::http::HeaderMap;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::{ActivateResponse, LicenseCheck, ValidateResponse};
use crate::util::request_meta;

/// POST /api/license/activate
pub async fn activate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LicenseCheck>,
) -> Result<Json<ActivateResponse>> {
    let meta = request_meta(&headers);
    let response = state.service.activate(&req, &meta)?;
    Ok(Json(response))
}

/// POST /api/license/validate
pub async fn validate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LicenseCheck>,
) -> Result<Json<ValidateResponse>> {
    let meta = request_meta(&headers);
    let response = state.service.validate(&req, &meta)?;
    Ok(Json(response))
}
