//! Configuration loader for `enviro.toml`.
//!
//! ```toml
//! [store]
//! base_shard_name = "readings.csv"
//! max_rows_per_shard = 1500
//!
//! [remote]
//! gist_id = "aa5a315d61ae9438b18d"
//! token_env = "GITHUB_TOKEN"
//!
//! [ingest]
//! accepted_source = "enviro-garden"
//! username = "enviro"
//! password = "change-me"
//! required_metrics = ["temperature", "humidity"]
//!
//! [schema.aliases]
//! pm25 = "pm2_5"
//!
//! [server]
//! bind = "0.0.0.0:8050"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section except `[remote]` and `[ingest]` may be omitted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::ingest::IngestConfig;
use crate::schema::SchemaNormalizer;
use crate::store::StoreConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub gist_id: String,
    /// Inline token. Prefer `token_env` outside of local testing.
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaConfig {
    /// Legacy column name to canonical name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8050".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Error type for configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "failed to read config file: {}", msg),
            ConfigError::Parse(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    /// Load and validate configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.store.base_shard_name;
        if base.trim().is_empty() {
            return Err(ConfigError::Invalid("store.base_shard_name is empty".into()));
        }
        if base.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "store.base_shard_name {:?} must not contain '/'",
                base
            )));
        }
        if self.store.max_rows_per_shard == 0 {
            return Err(ConfigError::Invalid(
                "store.max_rows_per_shard must be at least 1".into(),
            ));
        }
        if self.remote.gist_id.trim().is_empty() {
            return Err(ConfigError::Invalid("remote.gist_id is empty".into()));
        }
        if self.ingest.accepted_source.trim().is_empty() {
            return Err(ConfigError::Invalid("ingest.accepted_source is empty".into()));
        }
        if self.ingest.username.is_empty() || self.ingest.password.is_empty() {
            return Err(ConfigError::Invalid(
                "ingest.username and ingest.password are required".into(),
            ));
        }
        Ok(())
    }

    /// Bearer token: the inline value, else the configured environment variable.
    pub fn remote_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.remote.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        std::env::var(&self.remote.token_env).map_err(|_| {
            ConfigError::Invalid(format!(
                "no remote.token and ${} is not set",
                self.remote.token_env
            ))
        })
    }

    /// Normalizer for this deployment: legacy rows belong to the accepted source.
    pub fn normalizer(&self) -> SchemaNormalizer {
        SchemaNormalizer::new(self.ingest.accepted_source.clone()).with_aliases(&self.schema.aliases)
    }

    #[cfg(feature = "gist")]
    pub fn gist(&self) -> Result<crate::remote::GistConfig, ConfigError> {
        Ok(crate::remote::GistConfig {
            api_url: self.remote.api_url.clone(),
            gist_id: self.remote.gist_id.clone(),
            token: self.remote_token()?,
            timeout: std::time::Duration::from_secs(self.remote.timeout_seconds),
        })
    }
}
