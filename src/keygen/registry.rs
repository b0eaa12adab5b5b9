//! Identifier → generator mapping.
//!
//! Built once at startup with [`RegistryBuilder`], then frozen into a
//! [`GeneratorRegistry`] that is shared read-only (behind an `Arc`) with the
//! license service. There is no process-global registry.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use super::{GeneratorKind, KeyGenerator, OpaqueHash, SignedPayload};
use crate::models::Project;

/// Identifier of the built-in opaque-hash generator.
pub const BUILTIN_V1: &str = "pfx.v1";
/// Identifier of the built-in signed-payload generator.
pub const BUILTIN_V2: &str = "pfx.v2";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("static regex"));
static PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]{1,7}$").expect("static regex"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cannot register generator '{identifier}': {reason}")]
    DuplicateOrInvalidGenerator { identifier: String, reason: String },

    #[error("unknown key generator '{0}'")]
    UnknownGenerator(String),
}

impl RegistryError {
    fn invalid(identifier: &str, reason: impl Into<String>) -> Self {
        RegistryError::DuplicateOrInvalidGenerator {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }
}

/// Which algorithm an identifier maps to, and the prefix its keys carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSpec {
    pub kind: GeneratorKind,
    pub prefix: String,
}

impl GeneratorSpec {
    pub fn new(kind: GeneratorKind, prefix: impl Into<String>) -> Self {
        Self {
            kind,
            prefix: prefix.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    spec: GeneratorSpec,
    pattern: Regex,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorInfo {
    pub identifier: String,
    pub kind: GeneratorKind,
    pub version: &'static str,
    pub format: String,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<String, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded with `pfx.v1` and `pfx.v2`.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut builder = Self::new();
        builder.register(BUILTIN_V1, GeneratorSpec::new(GeneratorKind::OpaqueHash, "PFX"))?;
        builder.register(BUILTIN_V2, GeneratorSpec::new(GeneratorKind::SignedPayload, "PFX2"))?;
        Ok(builder)
    }

    pub fn register(&mut self, identifier: &str, spec: GeneratorSpec) -> Result<(), RegistryError> {
        if !IDENTIFIER_RE.is_match(identifier) {
            return Err(RegistryError::invalid(
                identifier,
                "identifier must match [a-z0-9._-]+",
            ));
        }
        if self.entries.contains_key(identifier) {
            return Err(RegistryError::invalid(identifier, "identifier already registered"));
        }
        if !PREFIX_RE.is_match(&spec.prefix) {
            return Err(RegistryError::invalid(
                identifier,
                format!("prefix '{}' must match [A-Z][A-Z0-9]{{1,7}}", spec.prefix),
            ));
        }

        let pattern = Regex::new(&spec.kind.pattern(&spec.prefix))
            .map_err(|e| RegistryError::invalid(identifier, e.to_string()))?;

        tracing::debug!(
            identifier,
            kind = %spec.kind,
            prefix = %spec.prefix,
            "Registered key generator"
        );
        self.entries
            .insert(identifier.to_string(), Entry { spec, pattern });
        Ok(())
    }

    pub fn build(self) -> GeneratorRegistry {
        GeneratorRegistry {
            entries: self.entries,
        }
    }
}

/// Frozen identifier → generator mapping.
#[derive(Debug, Clone)]
pub struct GeneratorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl GeneratorRegistry {
    pub fn get(&self, identifier: &str) -> Option<&GeneratorSpec> {
        self.entries.get(identifier).map(|e| &e.spec)
    }

    pub fn has(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Bind the generator registered under `identifier` to `project`.
    pub fn make(&self, identifier: &str, project: &Project) -> Result<KeyGenerator, RegistryError> {
        let entry = self
            .entries
            .get(identifier)
            .ok_or_else(|| RegistryError::UnknownGenerator(identifier.to_string()))?;

        Ok(match entry.spec.kind {
            GeneratorKind::OpaqueHash => {
                KeyGenerator::OpaqueHash(OpaqueHash::new(&entry.spec.prefix, entry.pattern.clone()))
            }
            GeneratorKind::SignedPayload => KeyGenerator::SignedPayload(SignedPayload::new(
                &entry.spec.prefix,
                entry.pattern.clone(),
                project,
            )),
        })
    }

    /// Registered identifiers, sorted.
    pub fn available(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn info(&self, identifier: &str) -> Option<GeneratorInfo> {
        let entry = self.entries.get(identifier)?;
        Some(GeneratorInfo {
            identifier: identifier.to_string(),
            kind: entry.spec.kind,
            version: entry.spec.kind.version(),
            format: entry.spec.kind.format(&entry.spec.prefix),
        })
    }
}
