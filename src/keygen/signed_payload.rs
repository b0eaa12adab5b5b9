//! v2 keys: `PREFIX-{base64(claims json)}.{mac16}`.
//!
//! `mac16` is the first 16 hex digits of HMAC-SHA256 over the base64 text,
//! keyed with the project secret. A key verifies only under the project that
//! issued it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{DecodedKey, GeneratedKey, KeygenError};
use crate::models::{Project, User};

type HmacSha256 = Hmac<Sha256>;

pub const VERSION: &str = "v2";

/// Hex digits of the MAC kept in the key.
const MAC_LEN: usize = 16;

/// Random bytes mixed into every payload so two keys for the same user differ.
const NONCE_LEN: usize = 16;

/// Claims embedded in a v2 key. Readable by anyone holding the key; only the
/// MAC is secret-dependent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyClaims {
    pub project_id: String,
    pub project_slug: String,
    pub user_id: String,
    pub user_email: String,
    pub version: String,
    pub timestamp: i64,
    pub random: String,
}

#[derive(Clone)]
pub struct SignedPayload {
    prefix: String,
    pattern: Regex,
    project_id: String,
    project_slug: String,
    secret: String,
}

impl std::fmt::Debug for SignedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPayload")
            .field("prefix", &self.prefix)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl SignedPayload {
    pub(super) fn new(prefix: &str, pattern: Regex, project: &Project) -> Self {
        Self {
            prefix: prefix.to_string(),
            pattern,
            project_id: project.id.clone(),
            project_slug: project.slug.clone(),
            secret: project.secret_key.clone(),
        }
    }

    pub(super) fn pattern_for(prefix: &str) -> String {
        format!(
            r"^{}-([A-Za-z0-9+/=]+)\.([a-f0-9]{{{MAC_LEN}}})$",
            regex::escape(prefix)
        )
    }

    pub fn format(&self) -> String {
        Self::format_for(&self.prefix)
    }

    pub(super) fn format_for(prefix: &str) -> String {
        format!("{prefix}-{{BASE64_PAYLOAD}}.{{SIGNATURE}}")
    }

    /// Full lowercase-hex HMAC of `data` under the project secret.
    fn sign(&self, data: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(data.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn generate(&self, user: &User) -> Result<GeneratedKey, KeygenError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce)?;

        let claims = KeyClaims {
            project_id: self.project_id.clone(),
            project_slug: self.project_slug.clone(),
            user_id: user.id.clone(),
            user_email: user.email.clone(),
            version: VERSION.to_string(),
            timestamp: Utc::now().timestamp(),
            random: hex::encode(nonce),
        };

        let encoded = BASE64.encode(serde_json::to_vec(&claims).map_err(KeygenError::Payload)?);
        let signature = self.sign(&encoded).ok_or(KeygenError::Secret)?;
        let short = &signature[..MAC_LEN];

        Ok(GeneratedKey {
            key: format!("{}-{}.{}", self.prefix, encoded, short),
            version: VERSION.to_string(),
            format: self.format(),
            metadata: json!({
                "algorithm": "hmac-sha256",
                "payload": claims,
                "signature_length": MAC_LEN,
                "full_signature": signature,
                "generated_at": Utc::now().to_rfc3339(),
            }),
        })
    }

    pub fn validate(&self, key: &str) -> bool {
        let Some(caps) = self.pattern.captures(key) else {
            return false;
        };
        let (encoded, provided) = (&caps[1], &caps[2]);

        let Some(expected) = self.sign(encoded) else {
            return false;
        };
        let expected = &expected.as_bytes()[..MAC_LEN];
        if !bool::from(expected.ct_eq(provided.as_bytes())) {
            return false;
        }

        match decode_claims(encoded) {
            Some(claims) => claims.version == VERSION && claims.project_id == self.project_id,
            None => false,
        }
    }

    /// Extracts the claims without checking the MAC. Advisory only.
    pub fn decode(&self, key: &str) -> Option<DecodedKey> {
        let caps = self.pattern.captures(key)?;
        let claims = decode_claims(&caps[1])?;

        Some(DecodedKey::V2 {
            payload: claims,
            signature: caps[2].to_string(),
            format: self.format(),
        })
    }
}

fn decode_claims(encoded: &str) -> Option<KeyClaims> {
    let raw = BASE64.decode(encoded).ok()?;
    serde_json::from_slice(&raw).ok()
}
