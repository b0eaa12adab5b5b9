//! Device fingerprinting for the license client.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;

/// Hardware address reported by interfaces with no real MAC.
const NULL_MAC: &str = "00:00:00:00:00:00";

/// What a client sends (encrypted) to prove which machine it runs on.
///
/// The server only reads `deviceId`; the rest is stored with each
/// validation record for support purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    pub device_id: String,
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub runtime_version: String,
    pub timestamp: String,
}

impl DeviceFingerprint {
    /// Fingerprint the current machine.
    pub fn collect() -> Self {
        let hostname = local_hostname();
        let platform = std::env::consts::OS.to_string();
        let device_id = derive_device_id(first_hardware_address().as_deref(), &hostname, &platform);

        Self {
            device_id,
            hostname,
            platform,
            arch: std::env::consts::ARCH.to_string(),
            runtime_version: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Same machine, fresh timestamp.
    pub fn refreshed(&self) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ..self.clone()
        }
    }
}

/// SHA-256 of the hardware address, or of `{hostname}_{platform}` when the
/// machine exposes none.
pub fn derive_device_id(mac: Option<&str>, hostname: &str, platform: &str) -> String {
    match mac {
        Some(mac) => sha256_hex(mac),
        None => sha256_hex(format!("{}_{}", hostname, platform)),
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_usable_mac(mac: &str) -> bool {
    !mac.is_empty() && mac != NULL_MAC
}

#[cfg(target_os = "linux")]
fn first_hardware_address() -> Option<String> {
    let mut interfaces: Vec<_> = std::fs::read_dir("/sys/class/net")
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() != "lo")
        .collect();
    // read_dir order is unspecified; keep the choice stable across runs
    interfaces.sort_by_key(|entry| entry.file_name());

    interfaces.into_iter().find_map(|entry| {
        let mac = std::fs::read_to_string(entry.path().join("address")).ok()?;
        let mac = mac.trim().to_lowercase();
        is_usable_mac(&mac).then_some(mac)
    })
}

#[cfg(target_os = "macos")]
fn first_hardware_address() -> Option<String> {
    let output = std::process::Command::new("ifconfig").output().ok()?;
    let output = String::from_utf8_lossy(&output.stdout);

    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ether "))
        .map(|mac| mac.trim().to_lowercase())
        .find(|mac| is_usable_mac(mac))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn first_hardware_address() -> Option<String> {
    None
}
