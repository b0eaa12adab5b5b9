use std::env;

use crate::keygen::registry::BUILTIN_V1;
use crate::keygen::{GeneratorKind, GeneratorRegistry, GeneratorSpec, RegistryBuilder, RegistryError};

/// Values a new project gets when the caller leaves them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDefaults {
    pub key_generator: String,
    pub max_devices: i32,
    pub features: Vec<String>,
}

impl Default for ProjectDefaults {
    fn default() -> Self {
        Self {
            key_generator: BUILTIN_V1.to_string(),
            max_devices: 1,
            features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    pub project_defaults: ProjectDefaults,
    /// Extra generators registered next to the built-ins.
    pub custom_generators: Vec<(String, GeneratorSpec)>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LICENSOR_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let fallback = ProjectDefaults::default();
        let project_defaults = ProjectDefaults {
            key_generator: env::var("LICENSOR_DEFAULT_GENERATOR").unwrap_or(fallback.key_generator),
            max_devices: env::var("LICENSOR_DEFAULT_MAX_DEVICES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &i32| *n >= 1)
                .unwrap_or(fallback.max_devices),
            features: env::var("LICENSOR_DEFAULT_FEATURES")
                .map(|v| parse_list(&v))
                .unwrap_or(fallback.features),
        };

        let custom_generators = env::var("LICENSOR_CUSTOM_GENERATORS")
            .map(|v| parse_custom_generators(&v))
            .unwrap_or_default();

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "licensor.db".to_string()),
            dev_mode,
            project_defaults,
            custom_generators,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Built-ins plus configured custom generators, frozen.
    pub fn build_registry(&self) -> Result<GeneratorRegistry, RegistryError> {
        let mut builder = RegistryBuilder::with_builtins()?;
        for (identifier, spec) in &self.custom_generators {
            builder.register(identifier, spec.clone())?;
        }
        Ok(builder.build())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `id=kind:PREFIX,id=kind:PREFIX`. Malformed entries are skipped with
/// a warning; identifier and prefix rules are enforced at registration.
pub fn parse_custom_generators(value: &str) -> Vec<(String, GeneratorSpec)> {
    parse_list(value)
        .into_iter()
        .filter_map(|entry| {
            let parsed = entry.split_once('=').and_then(|(id, rest)| {
                let (kind, prefix) = rest.split_once(':')?;
                let kind: GeneratorKind = kind.trim().parse().ok()?;
                Some((id.trim().to_string(), GeneratorSpec::new(kind, prefix.trim())))
            });
            if parsed.is_none() {
                tracing::warn!(entry = %entry, "Ignoring malformed LICENSOR_CUSTOM_GENERATORS entry");
            }
            parsed
        })
        .collect()
}
