//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read engine config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid engine config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows one operation may pull from backends; 0 is unlimited.
    pub size_limit: usize,
    /// Answer DN-only, unconstrained searches without merging attributes.
    pub dn_only_fast_path: bool,
    /// Treat a failed fetch of an optional source as "no rows".
    pub absorb_optional_failures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            size_limit: 0,
            dn_only_fast_path: true,
            absorb_optional_failures: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = EngineConfig::from_json(r#"{ "size_limit": 10 }"#).unwrap();
        assert_eq!(config.size_limit, 10);
        assert!(config.dn_only_fast_path);
        assert!(config.absorb_optional_failures);
    }
}
