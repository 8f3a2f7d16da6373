//! Service source backed by the `services:` section of the configuration.

use crate::config::ServiceDefinition;
use crate::error::Result;
use crate::event::{Event, HookResult, Payload, PARSE};
use crate::module::{check_api_version, Module};
use crate::registry::pattern::{is_pattern, service_matches};
use crate::registry::Service;
use crate::supervisor::Supervisor;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::Level;

pub const NAME: &str = "config";

type Definitions = Rc<BTreeMap<String, ServiceDefinition>>;

/// Answers `PARSE` from the configured service definitions.
pub struct ConfigSource {
    definitions: Definitions,
}

impl ConfigSource {
    pub fn new(definitions: BTreeMap<String, ServiceDefinition>) -> Self {
        Self {
            definitions: Rc::new(definitions),
        }
    }
}

impl Module for ConfigSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version(NAME, api_version)?;
        let definitions = Rc::clone(&self.definitions);
        sv.events()
            .register_hook(&PARSE, NAME, move |sv, event| parse(sv, event, &definitions))?;
        tracing::debug!(services = self.definitions.len(), "Service definitions available");
        Ok(())
    }
}

/// The configured name `requested` refers to: itself, or the single
/// definition a pattern matches.
fn lookup<'a>(
    definitions: &'a BTreeMap<String, ServiceDefinition>,
    requested: &str,
) -> Option<(&'a String, &'a ServiceDefinition)> {
    if let Some(found) = definitions.get_key_value(requested) {
        return Some(found);
    }
    if !is_pattern(requested) {
        return None;
    }
    let mut matches = definitions
        .iter()
        .filter(|(name, _)| service_matches(requested, name));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

fn parse(
    sv: &mut Supervisor,
    event: &mut Event,
    definitions: &BTreeMap<String, ServiceDefinition>,
) -> HookResult {
    let Payload::Parse { name, service } = &mut event.payload else {
        return HookResult::NotApplicable;
    };
    if service.is_some() {
        return HookResult::NotApplicable;
    }
    let Some((full_name, definition)) = lookup(definitions, name) else {
        return HookResult::NotApplicable;
    };

    let Some(type_name) = definition.service_type.as_deref() else {
        sv.report(Level::ERROR, format!("Service {} has no type", full_name));
        return HookResult::Fail;
    };
    let Some(service_type) = sv.registry().service_type(type_name) else {
        sv.report(
            Level::ERROR,
            format!("Service {} has unknown type '{}'", full_name, type_name),
        );
        return HookResult::Fail;
    };

    let record = Service::new(full_name.as_str())
        .with_type(service_type)
        .with_data(definition.to_data_store(full_name));
    match sv.admit(record) {
        Ok(id) => {
            *service = Some(id);
            HookResult::Handled
        }
        Err(err) => {
            sv.report(Level::ERROR, format!("Service {} refused: {}", full_name, err));
            HookResult::Fail
        }
    }
}
