mod activation;
mod api;
mod license_key;
mod project;
mod usage;
mod user;
mod validation;

pub use activation::*;
pub use api::*;
pub use license_key::*;
pub use project::*;
pub use usage::*;
pub use user::*;
pub use validation::*;

/// Decrypted device fingerprint. Free-form apart from `deviceId`.
pub type DeviceInfo = serde_json::Map<String, serde_json::Value>;

/// Field of [`DeviceInfo`] that must equal the claimed device id.
pub const DEVICE_ID_FIELD: &str = "deviceId";
