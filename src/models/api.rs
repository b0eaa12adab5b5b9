//! Request and response bodies of the client-facing license API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::BatchEvent;

/// What a client proves on every activate/validate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseCheck {
    pub license_key: String,
    pub device_id: String,
    pub email: String,
    /// `base64(iv):base64(ciphertext)` of the device fingerprint.
    pub encrypted_device_info: String,
}

/// Transport details recorded alongside each validation record.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub success: bool,
    pub is_valid: bool,
    pub expiry_date: Option<String>,
    pub features: Vec<String>,
    pub max_devices: i32,
    pub activated_devices: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub success: bool,
    pub is_valid: bool,
    pub expiry_date: Option<String>,
    pub features: Vec<String>,
    pub max_devices: i32,
    pub validation_count: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackUsageRequest {
    pub license_key: String,
    pub event_type: String,
    pub event_name: String,
    #[serde(default)]
    pub event_data: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackUsageResponse {
    pub success: bool,
    pub message: String,
    pub usage_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackBatchRequest {
    pub license_key: String,
    pub events: Vec<BatchEvent>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTrackResponse {
    pub success: bool,
    pub message: String,
    pub tracked_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageStatsQuery {
    pub license_key: String,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
