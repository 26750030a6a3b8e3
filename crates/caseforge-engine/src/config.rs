//! Configuration loading and typed config structures for the engine.
//!
//! The canonical configuration lives in `caseforge.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the
//! YAML structure and provides a loader that reads and validates the
//! file. API keys never live in the file: each backend names an
//! environment variable to read its key from.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use caseforge_llm::{BackendConfig, BackendType, ClientConfig};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A backend references an environment variable that is not set.
    #[error("backend '{alias}' api key env var {var} is not set")]
    MissingApiKey {
        /// The backend alias.
        alias: String,
        /// The environment variable named in the config.
        var: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// All sections have defaults so a missing file still yields a usable
/// (memory-store, scripted-model) configuration for dry runs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Model backend section.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Persistence backends.
    #[serde(default)]
    pub stores: StoresConfig,

    /// Pipeline knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Model backend configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmConfig {
    /// Alias used when a stage has no explicit routing.
    #[serde(default = "default_alias")]
    pub default_alias: String,
    /// Named backends, selectable per stage via the run input's
    /// `modelConfig`.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendEntry>,
    /// Per-call deadline in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Optional prompt template directory overriding the compiled-in
    /// templates.
    #[serde(default)]
    pub templates_dir: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_alias: default_alias(),
            backends: BTreeMap::new(),
            call_timeout_ms: default_call_timeout_ms(),
            templates_dir: None,
        }
    }
}

/// One named model backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendEntry {
    /// Backend type: `openai`, `anthropic`, or `scripted`.
    pub backend_type: BackendType,
    /// Base API URL.
    #[serde(default)]
    pub api_url: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model identifier.
    #[serde(default)]
    pub model: String,
    /// Dollars per million input tokens, for cost accounting.
    #[serde(default)]
    pub cost_per_m_input: Option<Decimal>,
    /// Dollars per million output tokens, for cost accounting.
    #[serde(default)]
    pub cost_per_m_output: Option<Decimal>,
}

/// Persistence backend selection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoresConfig {
    /// Draft store: `dragonfly` or `memory`.
    #[serde(default = "default_memory")]
    pub drafts: String,
    /// Dragonfly URL when `drafts: dragonfly`.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,
    /// Case store: `postgres` or `memory`.
    #[serde(default = "default_memory")]
    pub cases: String,
    /// `PostgreSQL` URL when `cases: postgres`.
    #[serde(default)]
    pub postgres_url: String,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            drafts: default_memory(),
            dragonfly_url: default_dragonfly_url(),
            cases: default_memory(),
            postgres_url: String::new(),
        }
    }
}

/// Pipeline knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    /// Retries per generative stage (1 retry = up to 2 attempts).
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
        }
    }
}

fn default_alias() -> String {
    String::from("default")
}

const fn default_call_timeout_ms() -> u64 {
    90_000
}

fn default_memory() -> String {
    String::from("memory")
}

fn default_dragonfly_url() -> String {
    String::from("redis://localhost:6379")
}

const fn default_retry_budget() -> u32 {
    1
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&contents)?)
    }

    /// Load from the given path, falling back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Build the model client configuration, resolving API keys from
    /// the environment.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut backends = BTreeMap::new();
        for (alias, entry) in &self.llm.backends {
            let api_key = match &entry.api_key_env {
                Some(var) => {
                    std::env::var(var).map_err(|_| ConfigError::MissingApiKey {
                        alias: alias.clone(),
                        var: var.clone(),
                    })?
                }
                None => String::new(),
            };
            backends.insert(
                alias.clone(),
                BackendConfig {
                    backend_type: entry.backend_type,
                    api_url: entry.api_url.clone(),
                    api_key,
                    model: entry.model.clone(),
                    cost_per_m_input: entry.cost_per_m_input,
                    cost_per_m_output: entry.cost_per_m_output,
                },
            );
        }

        // With no backends configured, fall back to a scripted default
        // so dry runs and tests can still construct a client.
        if backends.is_empty() {
            backends.insert(
                self.llm.default_alias.clone(),
                BackendConfig {
                    backend_type: BackendType::Scripted,
                    api_url: String::new(),
                    api_key: String::new(),
                    model: String::new(),
                    cost_per_m_input: None,
                    cost_per_m_output: None,
                },
            );
        }

        Ok(ClientConfig {
            backends,
            default_alias: self.llm.default_alias.clone(),
            call_timeout: Duration::from_millis(self.llm.call_timeout_ms),
            ..ClientConfig::default()
        })
    }
}
