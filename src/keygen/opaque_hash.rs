//! v1 keys: `PREFIX-AAAAAA-BBBBBB-CCCCCC-DDDDDD`.
//!
//! The segments are the first 24 hex digits of SHA-256 over 32 random bytes.
//! Nothing ties the key to a project or user, so verification is only a
//! shape check. Anyone who knows the prefix can mint a key that passes
//! [`OpaqueHash::validate`]; possession is enforced by the key existing in the
//! store, not by the key itself.

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use regex::Regex;
use serde_json::json;

use super::{DecodedKey, GeneratedKey, KeygenError};
use crate::crypto::sha256_hex;

pub const VERSION: &str = "v1";

const SEGMENTS: usize = 4;
const SEGMENT_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct OpaqueHash {
    prefix: String,
    pattern: Regex,
}

impl OpaqueHash {
    pub(super) fn new(prefix: &str, pattern: Regex) -> Self {
        Self {
            prefix: prefix.to_string(),
            pattern,
        }
    }

    pub(super) fn pattern_for(prefix: &str) -> String {
        format!(
            "^{}-[A-F0-9]{{{SEGMENT_LEN}}}(-[A-F0-9]{{{SEGMENT_LEN}}}){{{}}}$",
            regex::escape(prefix),
            SEGMENTS - 1
        )
    }

    pub fn format(&self) -> String {
        Self::format_for(&self.prefix)
    }

    pub(super) fn format_for(prefix: &str) -> String {
        let segment = "X".repeat(SEGMENT_LEN);
        let mut format = prefix.to_string();
        for _ in 0..SEGMENTS {
            format.push('-');
            format.push_str(&segment);
        }
        format
    }

    pub fn generate(&self) -> Result<GeneratedKey, KeygenError> {
        let mut seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut seed)?;

        let hash = sha256_hex(seed);
        let upper = hash.to_ascii_uppercase();

        let mut key = self.prefix.clone();
        for i in 0..SEGMENTS {
            key.push('-');
            key.push_str(&upper[i * SEGMENT_LEN..(i + 1) * SEGMENT_LEN]);
        }

        Ok(GeneratedKey {
            key,
            version: VERSION.to_string(),
            format: self.format(),
            metadata: json!({
                "algorithm": "sha256",
                "segments": SEGMENTS,
                "segment_length": SEGMENT_LEN,
                "hash": hash,
                "generated_at": Utc::now().to_rfc3339(),
            }),
        })
    }

    pub fn validate(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    pub fn decode(&self, key: &str) -> Option<DecodedKey> {
        if !self.validate(key) {
            return None;
        }

        let mut parts = key.split('-');
        let prefix = parts.next()?.to_string();
        let segments = parts.map(str::to_string).collect();

        Some(DecodedKey::V1 {
            prefix,
            segments,
            format: self.format(),
        })
    }
}
