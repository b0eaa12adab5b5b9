use serde::{Deserialize, Serialize};

use crate::crypto::{DeviceCipher, KeyDerivation};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Shared with clients out of band. Keys the device-info cipher and
    /// signs v2 keys.
    #[serde(skip_serializing)]
    pub secret_key: String,
    /// Reserved column, never read.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    /// Registry identifier of the generator that issues and verifies keys.
    pub key_generator: String,
    pub key_derivation: KeyDerivation,
    pub default_max_devices: i32,
    pub default_features: Vec<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// Cipher for device-info payloads sent by this project's clients.
    pub fn cipher(&self) -> DeviceCipher {
        DeviceCipher::new(&self.secret_key, self.key_derivation)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub slug: String,
    /// Falls back to the configured default generator.
    pub key_generator: Option<String>,
    #[serde(default)]
    pub key_derivation: KeyDerivation,
    pub default_max_devices: Option<i32>,
    pub default_features: Option<Vec<String>>,
}

impl CreateProject {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Project name cannot be empty".into()));
        }
        if self.slug.is_empty()
            || !self
                .slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(AppError::BadRequest(
                "Project slug must be lowercase letters, digits and dashes".into(),
            ));
        }
        if let Some(max) = self.default_max_devices
            && max < 1
        {
            return Err(AppError::BadRequest(
                "default_max_devices must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
