//! Configuration loader and validator for the incentive pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    pub projection: Projection,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Roster document used when the CLI is not given `--roster`.
    pub roster_path: String,
}

/// Where seller metrics are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    Http {
        base_url: String,
        #[serde(default = "default_timeout_seconds")]
        timeout_seconds: u64,
    },
    Sqlite {
        database_url: String,
    },
}

/// Incentive projection service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Projection {
    pub base_url: String,
    pub flow: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Backend {
    /// Sqlite URL with the `DATABASE_URL` override applied; `None` for HTTP backends.
    pub fn resolved_database_url(&self) -> Option<String> {
        match self {
            Backend::Sqlite { database_url } => {
                Some(std::env::var("DATABASE_URL").unwrap_or_else(|_| database_url.clone()))
            }
            Backend::Http { .. } => None,
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.roster_path.trim().is_empty() {
        return Err(ConfigError::Invalid("app.roster_path must be non-empty"));
    }

    match &cfg.backend {
        Backend::Http {
            base_url,
            timeout_seconds,
        } => {
            if !is_http_url(base_url) {
                return Err(ConfigError::Invalid("backend.base_url must be an http(s) URL"));
            }
            if *timeout_seconds == 0 {
                return Err(ConfigError::Invalid("backend.timeout_seconds must be > 0"));
            }
        }
        Backend::Sqlite { database_url } => {
            if !database_url.starts_with("sqlite:") {
                return Err(ConfigError::Invalid(
                    "backend.database_url must start with sqlite:",
                ));
            }
        }
    }

    if !is_http_url(&cfg.projection.base_url) {
        return Err(ConfigError::Invalid("projection.base_url must be an http(s) URL"));
    }
    if cfg.projection.flow.trim().is_empty() {
        return Err(ConfigError::Invalid("projection.flow must be non-empty"));
    }
    if cfg.projection.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("projection.timeout_seconds must be > 0"));
    }

    Ok(())
}

fn is_http_url(raw: &str) -> bool {
    matches!(reqwest::Url::parse(raw), Ok(url) if url.scheme() == "http" || url.scheme() == "https")
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  roster_path: "./roster.yaml"

backend:
  kind: http
  base_url: "http://localhost:9002/"
  timeout_seconds: 30

# Offline alternative:
# backend:
#   kind: sqlite
#   database_url: "sqlite://./data/metrics.db"

projection:
  base_url: "http://localhost:3400/"
  flow: "incentiveProjection"
  timeout_seconds: 60
"#
}
