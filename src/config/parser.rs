use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/svsd/supervisor.yaml";

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Load config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        self.parse_config(&content)
    }

    /// Loads the file if it exists. A missing file yields the defaults so a
    /// bare system still boots; a file that exists but does not parse is
    /// still an error.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        if !path.as_ref().exists() {
            tracing::warn!(
                path = %path.as_ref().display(),
                "Config file not found, using defaults"
            );
            return Ok(Config::default());
        }
        self.load_config(path)
    }

    /// Parse config from a string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("Failed to parse YAML config: {}", e)))?;

        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
