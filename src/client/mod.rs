//! HTTP client for the license API.
//!
//! Every activate/validate call carries a freshly encrypted
//! [`DeviceFingerprint`]; the fingerprint never leaves the machine in
//! cleartext.
//!
//! ```rust,ignore
//! use licensor::client::LicenseClient;
//!
//! let client = LicenseClient::new("https://license.example.com", "project-secret")?;
//! let activated = client.activate("PFX-...", "user@example.com").await?;
//! let ok = client.is_valid("PFX-...", "user@example.com").await;
//! ```

pub mod device;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

pub use device::DeviceFingerprint;

use crate::crypto::{CodecError, DeviceCipher, KeyDerivation};
use crate::models::{
    ActivateResponse, BatchEvent, BatchTrackResponse, LicenseCheck, TrackBatchRequest,
    TrackUsageRequest, TrackUsageResponse, UsagePeriod, UsageStats, ValidateResponse,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("{message} ({code}, HTTP {status})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("failed to encrypt device info: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ClientError {
    /// The server's machine-readable error code, if the server produced one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// License summary as shown to an end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    pub is_valid: bool,
    pub expiry_date: Option<String>,
    pub features: Vec<String>,
    pub max_devices: i32,
    pub validation_count: i64,
}

impl From<ValidateResponse> for LicenseInfo {
    fn from(resp: ValidateResponse) -> Self {
        Self {
            is_valid: resp.success && resp.is_valid,
            expiry_date: resp.expiry_date,
            features: resp.features,
            max_devices: resp.max_devices,
            validation_count: resp.validation_count,
        }
    }
}

pub struct LicenseClient {
    http: HttpClient,
    base_url: String,
    cipher: DeviceCipher,
    device: DeviceFingerprint,
}

impl LicenseClient {
    /// Client for a project using the default (legacy) key derivation.
    pub fn new(base_url: &str, project_secret: &str) -> Result<Self> {
        Self::with_derivation(base_url, project_secret, KeyDerivation::default())
    }

    pub fn with_derivation(
        base_url: &str,
        project_secret: &str,
        derivation: KeyDerivation,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            http: HttpClient::new(),
            base_url: base_url.to_string(),
            cipher: DeviceCipher::new(project_secret, derivation),
            device: DeviceFingerprint::collect(),
        })
    }

    /// Replace the collected fingerprint (fixed device ids in tests, or an
    /// id persisted by the host application).
    pub fn with_device(mut self, device: DeviceFingerprint) -> Self {
        self.device = device;
        self
    }

    pub fn device(&self) -> &DeviceFingerprint {
        &self.device
    }

    pub fn device_id(&self) -> &str {
        &self.device.device_id
    }

    /// Bind this device to `license_key`.
    pub async fn activate(&self, license_key: &str, email: &str) -> Result<ActivateResponse> {
        let check = self.license_check(license_key, email)?;
        self.post("/api/license/activate", &check).await
    }

    /// Validate this device's binding.
    pub async fn validate(&self, license_key: &str, email: &str) -> Result<ValidateResponse> {
        let check = self.license_check(license_key, email)?;
        self.post("/api/license/validate", &check).await
    }

    /// `validate` collapsed to a yes/no. Any failure, including network
    /// errors, counts as not valid.
    pub async fn is_valid(&self, license_key: &str, email: &str) -> bool {
        match self.validate(license_key, email).await {
            Ok(resp) => resp.success && resp.is_valid,
            Err(e) => {
                tracing::debug!(error = %e, "License validation failed");
                false
            }
        }
    }

    pub async fn license_info(&self, license_key: &str, email: &str) -> Result<LicenseInfo> {
        Ok(self.validate(license_key, email).await?.into())
    }

    pub async fn track_usage(
        &self,
        license_key: &str,
        event_type: &str,
        event_name: &str,
        event_data: Option<Value>,
        metadata: Map<String, Value>,
    ) -> Result<TrackUsageResponse> {
        let req = TrackUsageRequest {
            license_key: license_key.to_string(),
            event_type: event_type.to_string(),
            event_name: event_name.to_string(),
            event_data,
            metadata: Some(metadata),
        };
        self.post("/api/license/track", &req).await
    }

    pub async fn track_usage_batch(
        &self,
        license_key: &str,
        events: Vec<BatchEvent>,
        metadata: Map<String, Value>,
    ) -> Result<BatchTrackResponse> {
        let req = TrackBatchRequest {
            license_key: license_key.to_string(),
            events,
            metadata: Some(metadata),
        };
        self.post("/api/license/track-batch", &req).await
    }

    pub async fn usage_stats(&self, license_key: &str, period: UsagePeriod) -> Result<UsageStats> {
        let response = self
            .http
            .get(format!("{}/api/license/usage-stats", self.base_url))
            .query(&[("license_key", license_key), ("period", period.as_str())])
            .send()
            .await?;

        handle_response(response).await
    }

    fn license_check(&self, license_key: &str, email: &str) -> Result<LicenseCheck> {
        let device = self.device.refreshed();
        Ok(LicenseCheck {
            license_key: license_key.to_string(),
            device_id: device.device_id.clone(),
            email: email.to_string(),
            encrypted_device_info: self.cipher.encrypt(&device)?,
        })
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        handle_response(response).await
    }
}

impl std::fmt::Debug for LicenseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseClient")
            .field("base_url", &self.base_url)
            .field("device_id", &self.device.device_id)
            .finish_non_exhaustive()
    }
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
        code: None,
        message: None,
    });

    Err(ClientError::Api {
        status: status.as_u16(),
        code: body.code.unwrap_or_else(|| "UNKNOWN".to_string()),
        message: body
            .message
            .unwrap_or_else(|| format!("Request failed: {}", status.as_u16())),
    })
}
