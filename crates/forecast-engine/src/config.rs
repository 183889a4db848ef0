use anyhow::{bail, Context, Result};
use forecast_core::Visibility;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Applied when a best prediction is saved without an explicit flag.
    pub default_visibility: Visibility,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:forecast.db".to_string(),
            max_connections: 5,
            default_visibility: Visibility::DEFAULT,
            log_format: LogFormat::Text,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got {:?}", raw))?,
            None => defaults.max_connections,
        };

        let default_visibility = match lookup("DEFAULT_PREDICTION_VISIBILITY") {
            Some(raw) => Visibility::parse(&raw).with_context(|| {
                format!(
                    "DEFAULT_PREDICTION_VISIBILITY must be 'public' or 'private', got {:?}",
                    raw
                )
            })?,
            None => defaults.default_visibility,
        };

        let log_format = match lookup("LOG_FORMAT").map(|v| v.trim().to_lowercase()) {
            None => defaults.log_format,
            Some(v) if v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => bail!("LOG_FORMAT must be 'text' or 'json', got {:?}", other),
        };

        let config = Self {
            database_url,
            max_connections,
            default_visibility,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL must not be empty");
        }
        if self.max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        Ok(())
    }
}
