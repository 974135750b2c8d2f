//! Runtime configuration
//!
//! Layered from built-in defaults, an optional TOML file and `HYPERDOC_*`
//! environment variables (`HYPERDOC_QUERY__MAX_LIMIT=100`), in that order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "HYPERDOC";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub links: LinksConfig,
    pub query: QueryConfig,
    pub log: LogConfig,
}

/// Link generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    /// Prefix for every generated URL
    pub base_url: String,
}

/// Filter, sort and paging limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Raw filter property carrying a language code
    pub language_key: String,
    /// Page size when the request names none
    pub default_limit: usize,
    pub max_limit: usize,
    /// Longest accepted include path, in segments
    pub max_include_depth: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            language_key: "langcode".to_string(),
            default_limit: 50,
            max_limit: 50,
            max_include_depth: 3,
        }
    }
}

/// Logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Directory for the daily rolling log file; unset disables it
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl Config {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default()).map_err(config_error)?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.default_limit == 0 {
            return Err(Error::Config("query.default_limit must be positive".into()));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(Error::Config(format!(
                "query.default_limit ({}) exceeds query.max_limit ({})",
                self.query.default_limit, self.query.max_limit
            )));
        }
        if self.query.max_include_depth == 0 {
            return Err(Error::Config("query.max_include_depth must be positive".into()));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}
