use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::keygen::{KeygenError, RegistryError};

/// Client-facing license failures.
///
/// None of these are retried internally: the caller has to change its input
/// (activate first, get a new key, contact the issuer).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LicenseError {
    #[error("{0}")]
    InvalidKey(String),

    #[error("License key is inactive")]
    KeyInactive,

    #[error("License has expired")]
    LicenseExpired,

    #[error("{0}")]
    DeviceMismatch(String),

    #[error("Device is not activated for this license key")]
    DeviceNotActivated,

    #[error("Maximum device limit ({0}) reached")]
    MaxDevicesReached(i32),
}

impl LicenseError {
    /// Stable machine-readable code for the wire contract.
    pub fn code(&self) -> &'static str {
        match self {
            LicenseError::InvalidKey(_) => "INVALID_KEY",
            LicenseError::KeyInactive => "KEY_INACTIVE",
            LicenseError::LicenseExpired => "EXPIRED",
            LicenseError::DeviceMismatch(_) => "DEVICE_MISMATCH",
            LicenseError::DeviceNotActivated => "NOT_ACTIVATED",
            LicenseError::MaxDevicesReached(_) => "MAX_DEVICES_REACHED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LicenseError::InvalidKey(_) => StatusCode::NOT_FOUND,
            LicenseError::DeviceMismatch(_) => StatusCode::BAD_REQUEST,
            LicenseError::KeyInactive
            | LicenseError::LicenseExpired
            | LicenseError::DeviceNotActivated
            | LicenseError::MaxDevicesReached(_) => StatusCode::FORBIDDEN,
        }
    }

    pub fn key_not_found() -> Self {
        LicenseError::InvalidKey("License key not found".into())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    License(#[from] LicenseError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generator registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Key generation failed: {0}")]
    Keygen(#[from] KeygenError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The license-domain error, if this is one.
    pub fn as_license(&self) -> Option<&LicenseError> {
        match self {
            AppError::License(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    code: &'static str,
    message: String,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::License(e) => (e.status(), e.code(), e.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Json(e) => (StatusCode::BAD_REQUEST, "INVALID_JSON", e.to_string()),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                internal()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                internal()
            }
            AppError::Registry(e) => {
                tracing::error!("Generator registry error: {}", e);
                internal()
            }
            AppError::Keygen(e) => {
                tracing::error!("Key generation error: {}", e);
                internal()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                internal()
            }
        };

        let body = ErrorResponse {
            success: false,
            code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "Internal server error".to_string(),
    )
}

pub type Result<T> = std::result::Result<T, AppError>;
