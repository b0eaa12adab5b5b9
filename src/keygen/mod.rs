//! License key generators.
//!
//! Two algorithms exist and the set is closed: [`GeneratorKind::OpaqueHash`]
//! (v1) and [`GeneratorKind::SignedPayload`] (v2). A project names its
//! generator by registry identifier; the [`GeneratorRegistry`] maps that
//! identifier to a kind plus a key prefix and binds it to the project.

mod opaque_hash;
pub mod registry;
mod signed_payload;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use opaque_hash::OpaqueHash;
pub use registry::{GeneratorInfo, GeneratorRegistry, GeneratorSpec, RegistryBuilder, RegistryError};
pub use signed_payload::{KeyClaims, SignedPayload};

use crate::models::{DeviceInfo, User};

#[derive(Debug, Error)]
pub enum KeygenError {
    #[error("OS random source failed: {0}")]
    Entropy(#[from] rand::Error),

    #[error("failed to encode key payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("project secret cannot key HMAC")]
    Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratorKind {
    OpaqueHash,
    SignedPayload,
}

impl GeneratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::OpaqueHash => "opaque-hash",
            GeneratorKind::SignedPayload => "signed-payload",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            GeneratorKind::OpaqueHash => opaque_hash::VERSION,
            GeneratorKind::SignedPayload => signed_payload::VERSION,
        }
    }

    /// Human-readable shape of keys this kind issues under `prefix`.
    pub fn format(&self, prefix: &str) -> String {
        match self {
            GeneratorKind::OpaqueHash => OpaqueHash::format_for(prefix),
            GeneratorKind::SignedPayload => SignedPayload::format_for(prefix),
        }
    }

    fn pattern(&self, prefix: &str) -> String {
        match self {
            GeneratorKind::OpaqueHash => OpaqueHash::pattern_for(prefix),
            GeneratorKind::SignedPayload => SignedPayload::pattern_for(prefix),
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneratorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opaque-hash" => Ok(GeneratorKind::OpaqueHash),
            "signed-payload" => Ok(GeneratorKind::SignedPayload),
            _ => Err(()),
        }
    }
}

/// Output of [`KeyGenerator::generate`], persisted verbatim on the key row.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedKey {
    pub key: String,
    pub version: String,
    pub format: String,
    pub metadata: Value,
}

/// What can be read out of a key without a database lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "version")]
pub enum DecodedKey {
    #[serde(rename = "v1")]
    V1 {
        prefix: String,
        segments: Vec<String>,
        format: String,
    },
    #[serde(rename = "v2")]
    V2 {
        payload: KeyClaims,
        signature: String,
        format: String,
    },
}

/// A generator bound to one project.
#[derive(Debug, Clone)]
pub enum KeyGenerator {
    OpaqueHash(OpaqueHash),
    SignedPayload(SignedPayload),
}

impl KeyGenerator {
    pub fn kind(&self) -> GeneratorKind {
        match self {
            KeyGenerator::OpaqueHash(_) => GeneratorKind::OpaqueHash,
            KeyGenerator::SignedPayload(_) => GeneratorKind::SignedPayload,
        }
    }

    pub fn version(&self) -> &'static str {
        self.kind().version()
    }

    pub fn format(&self) -> String {
        match self {
            KeyGenerator::OpaqueHash(g) => g.format(),
            KeyGenerator::SignedPayload(g) => g.format(),
        }
    }

    pub fn generate(&self, user: &User) -> Result<GeneratedKey, KeygenError> {
        match self {
            KeyGenerator::OpaqueHash(g) => g.generate(),
            KeyGenerator::SignedPayload(g) => g.generate(user),
        }
    }

    /// Whether `key` is a key this generator could have issued. Never
    /// errors on malformed input. Neither algorithm currently looks at
    /// the device fingerprint.
    pub fn validate(&self, key: &str, _device_info: &DeviceInfo) -> bool {
        match self {
            KeyGenerator::OpaqueHash(g) => g.validate(key),
            KeyGenerator::SignedPayload(g) => g.validate(key),
        }
    }

    pub fn decode(&self, key: &str) -> Option<DecodedKey> {
        match self {
            KeyGenerator::OpaqueHash(g) => g.decode(key),
            KeyGenerator::SignedPayload(g) => g.decode(key),
        }
    }
}
