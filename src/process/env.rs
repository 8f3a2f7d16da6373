use crate::dependency::NameParts;
use crate::registry::ServiceId;
use crate::supervisor::Supervisor;
use std::collections::BTreeMap;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

impl Supervisor {
    /// The environment a process of this service runs with.
    ///
    /// `SERVICE`, `NAME`, `CLASS`, `CONSOLE`, `RUNLEVEL` and `PREVLEVEL`
    /// plus the service's own `env` entries in declaration order, so a later
    /// duplicate wins. `PATH` gets a default unless the service sets one.
    pub fn service_environment(&self, id: ServiceId) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let Some(service) = self.registry.get(id) else {
            return env;
        };
        let parts = NameParts::of(service.name());

        env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
        env.insert("SERVICE".to_string(), parts.service.to_string());
        env.insert("NAME".to_string(), parts.name.to_string());
        env.insert("CLASS".to_string(), parts.class.to_string());
        env.insert("CONSOLE".to_string(), self.settings.console.clone());
        env.insert("RUNLEVEL".to_string(), self.runlevel.clone());
        env.insert("PREVLEVEL".to_string(), self.prev_runlevel.clone());

        for entry in service.data().env() {
            if let Some((key, value)) = entry.split_once('=') {
                env.insert(key.to_string(), value.to_string());
            }
        }
        env
    }
}
