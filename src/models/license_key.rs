use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Distinguishes an absent field (leave untouched) from an explicit `null`
/// (clear the column).
fn deserialize_optional_nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(Some(value))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseKey {
    pub id: String,
    pub user_id: String,
    pub key: String,
    pub key_version: String,
    pub key_format: String,
    pub key_metadata: Value,
    /// Stored for reporting; not enforced.
    pub start_date: Option<i64>,
    /// None = never expires
    pub expiry_date: Option<i64>,
    pub max_devices: i32,
    pub features: Vec<String>,
    pub is_active: bool,
    pub validation_count: i64,
    pub last_validated_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LicenseKey {
    /// Expired once `now` reaches the expiry instant.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry_date.is_some_and(|exp| exp <= now)
    }

    pub fn expiry_rfc3339(&self) -> Option<String> {
        self.expiry_date.and_then(to_rfc3339)
    }
}

pub(crate) fn to_rfc3339(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Caller-supplied overrides when issuing a key. Anything left `None` comes
/// from the project's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateOptions {
    pub max_devices: Option<i32>,
    pub features: Option<Vec<String>>,
    pub start_date: Option<i64>,
    pub expiry_date: Option<i64>,
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_devices
            && max < 1
        {
            return Err(AppError::BadRequest("max_devices must be at least 1".into()));
        }
        Ok(())
    }
}

/// Row values for a freshly generated key.
#[derive(Debug, Clone)]
pub struct NewLicenseKey {
    pub user_id: String,
    pub key: String,
    pub key_version: String,
    pub key_format: String,
    pub key_metadata: Value,
    pub start_date: Option<i64>,
    pub expiry_date: Option<i64>,
    pub max_devices: i32,
    pub features: Vec<String>,
}

/// Partial admin edit of a license key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLicenseKey {
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub expiry_date: Option<Option<i64>>,
    pub max_devices: Option<i32>,
    pub features: Option<Vec<String>>,
}

impl UpdateLicenseKey {
    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_devices
            && max < 1
        {
            return Err(AppError::BadRequest("max_devices must be at least 1".into()));
        }
        Ok(())
    }
}
