// Configuration module for the chat relay

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::proxy::registry::ModelTemplate;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.poe.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not found in environment variables")]
    MissingSecret(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("default model {0:?} has no template")]
    UnknownDefaultModel(String),

    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub proxy_api_key: String,

    #[serde(default)]
    pub upstream_api_key: String,

    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Extra or replacement templates, merged over the built-in ones.
    #[serde(default)]
    pub models: BTreeMap<String, ModelTemplate>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            proxy_api_key: String::new(),
            upstream_api_key: String::new(),
            upstream_url: default_upstream_url(),
            request_timeout_secs: default_request_timeout_secs(),
            default_model: default_model(),
            models: BTreeMap::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_model() -> String {
    crate::proxy::registry::DEFAULT_MODEL_ID.to_string()
}

impl AppConfig {
    /// Load configuration from `.env`, the optional `PROXY_CONFIG` file and
    /// the process environment, in increasing precedence.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }

        let file = std::env::var_os("PROXY_CONFIG").map(PathBuf::from);
        Self::load_from(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an explicit file and variable lookup.
    pub fn load_from<F>(file: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Config loaded from {:?}", path);
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PROXY_API_KEY") {
            self.proxy_api_key = v;
        }
        if let Some(v) = get("UPSTREAM_API_KEY") {
            self.upstream_api_key = v;
        }
        if let Some(v) = get("UPSTREAM_URL") {
            self.upstream_url = v;
        }
        if let Some(v) = get("HOST") {
            self.host = v;
        }
        if let Some(v) = get("DEFAULT_MODEL") {
            self.default_model = v;
        }
        if let Some(v) = get("PORT") {
            self.port = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "PORT", value: v })?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v
                .trim()
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "REQUEST_TIMEOUT_SECS",
                    value: v,
                })?;
        }
        Ok(())
    }

    /// Both secrets are required; the process must not serve without them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("PROXY_API_KEY"));
        }
        if self.upstream_api_key.is_empty() {
            return Err(ConfigError::MissingSecret("UPSTREAM_API_KEY"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request-timeout-secs",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
