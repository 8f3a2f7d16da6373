//! Root configuration structure.

use super::{ServiceDefinition, Settings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root of `supervisor.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceDefinition>,
}

impl Config {
    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }
}
