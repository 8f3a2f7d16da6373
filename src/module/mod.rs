//! Extension modules.
//!
//! A [`Module`] extends the supervisor by registering states, service
//! types, process kinds, event types and hooks from its `init`. Modules are
//! loaded in dependency order and unloaded in reverse; everything a module
//! registered under its name on the event bus is dropped with it.

use crate::error::{Error, Result};
use crate::supervisor::Supervisor;
use tracing::Level;

/// Version of the extension contract. A module compiled against another
/// version refuses to initialise.
pub const API_VERSION: u32 = 1;

pub trait Module {
    fn name(&self) -> &'static str;

    /// Modules that must be loaded before this one.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()>;

    /// Undo what `init` registered besides hooks, which the loader removes.
    fn unload(&mut self, _sv: &mut Supervisor) {}
}

/// Fails unless `api_version` is the one this crate was built with.
pub fn check_api_version(module: &str, api_version: u32) -> Result<()> {
    if api_version == API_VERSION {
        Ok(())
    } else {
        Err(Error::Module {
            module: module.to_string(),
            reason: format!(
                "built for extension API {}, supervisor offers {}",
                API_VERSION, api_version
            ),
        })
    }
}

struct LoadedModule {
    module: Box<dyn Module>,
    marked_for_removal: bool,
}

/// The loaded modules, in load order.
#[derive(Default)]
pub struct ModuleSet {
    loaded: Vec<LoadedModule>,
}

impl ModuleSet {
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|m| m.module.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.loaded.iter().map(|m| m.module.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// A loaded module other than `name` itself that requires `name`.
    fn required_by(&self, name: &str) -> Option<&'static str> {
        self.loaded
            .iter()
            .map(|m| &m.module)
            .find(|m| m.name() != name && m.requires().iter().any(|r| *r == name))
            .map(|m| m.name())
    }
}

impl Supervisor {
    /// Loads a single module. Its requirements must already be loaded.
    pub fn load_module(&mut self, mut module: Box<dyn Module>) -> Result<()> {
        let name = module.name();
        if self.is_blacklisted(name) {
            return Err(Error::Module {
                module: name.to_string(),
                reason: "blacklisted".to_string(),
            });
        }
        if self.modules.is_loaded(name) {
            return Err(Error::Module {
                module: name.to_string(),
                reason: "already loaded".to_string(),
            });
        }
        if let Some(missing) = module
            .requires()
            .iter()
            .find(|required| !self.modules.is_loaded(required))
        {
            return Err(Error::Module {
                module: name.to_string(),
                reason: format!("requires module '{}', which is not loaded", missing),
            });
        }

        if let Err(err) = module.init(self, crate::module::API_VERSION) {
            self.bus.unregister_owner(name);
            self.unwatch_owner(name);
            return Err(err);
        }
        tracing::debug!(module = name, "Module loaded");
        self.modules.loaded.push(LoadedModule {
            module,
            marked_for_removal: false,
        });
        Ok(())
    }

    /// Loads a set of modules in dependency order: each round loads every
    /// module whose requirements are met, until a round makes no progress.
    /// Returns the names of the modules that were refused.
    pub fn load_modules(&mut self, candidates: Vec<Box<dyn Module>>) -> Vec<&'static str> {
        let mut pending = candidates;
        let mut refused = Vec::new();

        loop {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|m| {
                m.requires()
                    .iter()
                    .all(|required| self.modules.is_loaded(required))
            });
            if ready.is_empty() {
                pending = waiting;
                break;
            }
            for module in ready {
                let name = module.name();
                if let Err(err) = self.load_module(module) {
                    self.report(Level::WARN, format!("Module {} not loaded: {}", name, err));
                    refused.push(name);
                }
            }
            pending = waiting;
        }

        for module in pending {
            let missing: Vec<&str> = module
                .requires()
                .iter()
                .copied()
                .filter(|required| !self.modules.is_loaded(required))
                .collect();
            self.report(
                Level::WARN,
                format!(
                    "Module {} not loaded: missing {}",
                    module.name(),
                    missing.join(", ")
                ),
            );
            refused.push(module.name());
        }
        refused
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.names()
    }

    /// Asks for a module to be unloaded at the start of the next tick.
    pub fn mark_module_for_removal(&mut self, name: &str) -> bool {
        match self
            .modules
            .loaded
            .iter_mut()
            .find(|m| m.module.name() == name)
        {
            Some(loaded) => {
                loaded.marked_for_removal = true;
                true
            }
            None => false,
        }
    }

    /// Unloads marked modules that no other loaded module requires.
    pub(crate) fn unload_marked_modules(&mut self) {
        loop {
            let candidate = self
                .modules
                .loaded
                .iter()
                .filter(|m| m.marked_for_removal)
                .map(|m| m.module.name())
                .find(|name| self.modules.required_by(name).is_none());
            match candidate {
                Some(name) => self.unload_module(name),
                None => break,
            }
        }
        for loaded in self.modules.loaded.iter().filter(|m| m.marked_for_removal) {
            if let Some(user) = self.modules.required_by(loaded.module.name()) {
                tracing::debug!(
                    module = loaded.module.name(),
                    required_by = user,
                    "Module stays loaded while required"
                );
            }
        }
    }

    /// Unloads every module, most recently loaded first.
    pub fn unload_modules(&mut self) {
        while let Some(name) = self.modules.loaded.last().map(|m| m.module.name()) {
            self.unload_module(name);
        }
    }

    fn unload_module(&mut self, name: &str) {
        let Some(pos) = self
            .modules
            .loaded
            .iter()
            .position(|m| m.module.name() == name)
        else {
            return;
        };
        let mut loaded = self.modules.loaded.remove(pos);
        loaded.module.unload(self);
        let hooks = self.bus.unregister_owner(name);
        self.unwatch_owner(name);
        tracing::debug!(module = name, hooks, "Module unloaded");
    }
}
