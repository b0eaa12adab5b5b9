use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationType {
    Activate,
    Validate,
}

impl ValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationType::Activate => "activate",
            ValidationType::Validate => "validate",
        }
    }
}

impl FromStr for ValidationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activate" => Ok(ValidationType::Activate),
            "validate" => Ok(ValidationType::Validate),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Error => "error",
        }
    }
}

impl FromStr for ResponseStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ResponseStatus::Success),
            "error" => Ok(ResponseStatus::Error),
            _ => Err(()),
        }
    }
}

/// Append-only log entry for an activate/validate call against an activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: String,
    pub activation_id: String,
    pub validation_type: ValidationType,
    pub device_info: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_data: Value,
    pub response_status: ResponseStatus,
    pub error_code: Option<String>,
    pub validated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewValidationRecord {
    pub validation_type: ValidationType,
    pub device_info: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_data: Value,
    pub response_status: ResponseStatus,
    pub error_code: Option<String>,
}
