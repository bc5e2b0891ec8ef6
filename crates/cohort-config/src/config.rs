use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::enums::{Discipline, EvictionStrategy};
use crate::error::ConfigError;

/// Top-level configuration for a cohort host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
  pub cache: CacheConfig,
  pub work: WorkConfig,
  pub logging: LoggingConfig,
}

impl CohortConfig {
  /// Parse a configuration from JSON. Missing fields take their defaults.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Load a configuration file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&content)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub eviction: EvictionStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkConfig {
  /// Discipline applied to work built from this configuration.
  pub discipline: Discipline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
  pub filter: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
    }
  }
}
