//! Service definitions.
//!
//! A [`ServiceDefinition`] is the configuration-side view of a service. The
//! keys the supervisor core understands are typed fields; everything else is
//! kept verbatim and copied into the service's data store for the service
//! type to interpret.

use crate::registry::{DataStore, DataValue, Dependency, DependencyKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of the `services:` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Name of the service type ("daemon", "service", "runlevel", ...).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub need: Vec<String>,

    #[serde(rename = "use", default, skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<String>,

    /// `KEY=VALUE` entries exported to the service's processes, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Type-specific options (`daemon`, `start`, `respawn`, ...).
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl ServiceDefinition {
    /// Dependencies in declaration order: require, then need, then use.
    pub fn dependencies(&self) -> Vec<Dependency> {
        let require = self
            .require
            .iter()
            .map(|t| Dependency::new(DependencyKind::Require, t.as_str()));
        let need = self
            .need
            .iter()
            .map(|t| Dependency::new(DependencyKind::Need, t.as_str()));
        let uses = self
            .uses
            .iter()
            .map(|t| Dependency::new(DependencyKind::Use, t.as_str()));
        require.chain(need).chain(uses).collect()
    }

    /// Builds the data store a freshly parsed service starts with.
    pub fn to_data_store(&self, service_name: &str) -> DataStore {
        let mut data = DataStore::new();
        for dependency in self.dependencies() {
            data.add_dependency(dependency);
        }
        for entry in &self.env {
            if entry.contains('=') {
                data.push_env(entry.as_str());
            } else {
                tracing::warn!(
                    service = service_name,
                    entry = %entry,
                    "Ignoring env entry without '='"
                );
            }
        }
        for (key, value) in &self.options {
            match yaml_to_data(value) {
                Some(value) => data.set(key.as_str(), value),
                None => tracing::warn!(
                    service = service_name,
                    key = %key,
                    "Ignoring option with unsupported value"
                ),
            }
        }
        data
    }
}

fn yaml_to_data(value: &serde_yaml::Value) -> Option<DataValue> {
    use serde_yaml::Value;
    match value {
        Value::Bool(b) => Some(DataValue::Flag(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(DataValue::Int(i)),
            None => Some(DataValue::Text(n.to_string())),
        },
        Value::String(s) => Some(DataValue::Text(s.clone())),
        Value::Sequence(items) => items
            .iter()
            .map(scalar_text)
            .collect::<Option<Vec<_>>>()
            .map(DataValue::List),
        Value::Null | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
