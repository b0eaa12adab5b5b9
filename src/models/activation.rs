use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Binding of a license key to one device. Rows are never deleted; a
/// deactivated device that comes back gets a new row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub id: String,
    pub license_key_id: String,
    pub device_id: String,
    pub device_info: Value,
    pub activated_at: i64,
    pub is_active: bool,
    pub updated_at: i64,
}
