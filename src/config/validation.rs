use super::Config;
use crate::dependency::Graph;
use crate::error::{Error, Result};
use crate::registry::DependencyKind;

impl Config {
    /// Static checks run before boot.
    ///
    /// Every service needs a known type, `require` targets must be
    /// configured and the static dependency graph must be acyclic. Returns
    /// the start order on success. Dangling `need` and `use` targets are not
    /// errors: a need waits for the target and a use is optional.
    pub fn validate(&self, known_types: &[&str]) -> Result<Vec<String>> {
        for (name, service) in &self.services {
            match service.service_type.as_deref() {
                None => {
                    return Err(Error::Config(format!(
                        "Service '{}' has no type. Add one of: {}",
                        name,
                        known_types.join(", ")
                    )));
                }
                Some(service_type) if !known_types.contains(&service_type) => {
                    return Err(Error::Config(format!(
                        "Service '{}' has unknown type '{}'. Known types: {}",
                        name,
                        service_type,
                        known_types.join(", ")
                    )));
                }
                Some(_) => {}
            }
        }

        let (graph, dangling) = Graph::from_config(self);
        for missing in &dangling {
            match missing.kind {
                DependencyKind::Require => {
                    return Err(Error::Config(format!(
                        "Service '{}' requires '{}', which is not configured",
                        missing.service, missing.target
                    )));
                }
                DependencyKind::Need => tracing::warn!(
                    service = %missing.service,
                    target = %missing.target,
                    "Needed service is not configured; it will wait until one appears"
                ),
                DependencyKind::Use => {}
            }
        }

        graph.start_order()
    }
}
