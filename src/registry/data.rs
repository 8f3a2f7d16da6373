use crate::config::parse_duration_string;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Dependency strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Fails the dependent if the target does not exist.
    Require,
    /// Waits for the target; an absent target keeps the dependent waiting.
    Need,
    /// Only orders the start if the target happens to exist.
    Use,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Require => write!(f, "require"),
            DependencyKind::Need => write!(f, "need"),
            DependencyKind::Use => write!(f, "use"),
        }
    }
}

/// One entry of a service's dependency list. `target` may contain the
/// template variables `$NAME`, `$SERVICE` and `$CLASS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub target: String,
}

impl Dependency {
    pub fn new(kind: DependencyKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Flag(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

/// Key/value data attached to a service plus its ordered dependency list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStore {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, DataValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    env: Vec<String>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: DataValue) {
        self.values.insert(key.into(), value);
    }

    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, DataValue::Text(value.into()));
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, DataValue::Int(value));
    }

    pub fn set_flag(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, DataValue::Flag(value));
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<DataValue> {
        self.values.remove(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(DataValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(DataValue::Int(n)) => Some(*n),
            Some(DataValue::Text(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A flag is set when stored as `true` or as a non-zero number.
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(DataValue::Flag(b)) => *b,
            Some(DataValue::Int(n)) => *n != 0,
            Some(DataValue::Text(s)) => matches!(s.as_str(), "yes" | "true" | "on"),
            _ => false,
        }
    }

    /// Reads a duration given either as whole seconds or as a duration
    /// string ("30s", "1m", "500ms").
    pub fn duration(&self, key: &str) -> Option<Duration> {
        match self.values.get(key) {
            Some(DataValue::Int(n)) if *n >= 0 => Some(Duration::from_secs(*n as u64)),
            Some(DataValue::Text(s)) => parse_duration_string(s),
            _ => None,
        }
    }

    pub fn list(&self, key: &str) -> &[String] {
        match self.values.get(key) {
            Some(DataValue::List(items)) => items,
            _ => &[],
        }
    }

    pub fn add_dependency(&mut self, dependency: Dependency) {
        self.dependencies.push(dependency);
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn push_env(&mut self, entry: impl Into<String>) {
        self.env.push(entry.into());
    }

    /// Environment entries in declaration order, as `KEY=VALUE` strings.
    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let mut data = DataStore::new();
        data.set_text("daemon", "/usr/sbin/sshd -D");
        data.set_int("respawn_rate", 10);
        data.set_flag("respawn", true);
        data.set_text("term_timeout", "1m");

        assert_eq!(data.text("daemon"), Some("/usr/sbin/sshd -D"));
        assert_eq!(data.int("respawn_rate"), Some(10));
        assert!(data.flag("respawn"));
        assert!(!data.flag("missing"));
        assert_eq!(data.duration("term_timeout"), Some(Duration::from_secs(60)));
        assert_eq!(data.duration("respawn_rate"), Some(Duration::from_secs(10)));
        assert_eq!(data.text("respawn_rate"), None);
    }

    #[test]
    fn test_dependencies_keep_order() {
        let mut data = DataStore::new();
        data.add_dependency(Dependency::new(DependencyKind::Require, "a"));
        data.add_dependency(Dependency::new(DependencyKind::Use, "b"));
        data.add_dependency(Dependency::new(DependencyKind::Need, "c"));
        let targets: Vec<_> = data.dependencies().iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_serde_round_trip_keeps_values() {
        let mut data = DataStore::new();
        data.set_flag("respawn", true);
        data.set_int("pause", 3);
        data.push_env("A=1");
        let json = serde_json::to_string(&data).unwrap();
        let back: DataStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
