use super::clock::Clock;
use super::Supervisor;
use crate::config::{Config, Settings};
use crate::error::Result;
use crate::module::Module;
use crate::modules;

/// Builder for a [`Supervisor`] with its modules loaded.
///
/// # Example
///
/// ```
/// use service_supervisor::config::Config;
/// use service_supervisor::supervisor::Supervisor;
///
/// let sv = Supervisor::builder()
///     .config(Config::default())
///     .builtin_modules(true)
///     .build()
///     .unwrap();
/// assert!(sv.module_names().contains(&"daemon"));
/// ```
pub struct SupervisorBuilder {
    config: Option<Config>,
    clock: Option<Box<dyn Clock>>,
    builtin_modules: bool,
    extra_modules: Vec<Box<dyn Module>>,
    blacklist: Vec<String>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            clock: None,
            builtin_modules: false,
            extra_modules: Vec::new(),
            blacklist: Vec::new(),
        }
    }

    /// Settings and service definitions. The definitions are served to
    /// `PARSE` by the built-in `config` module.
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.config.get_or_insert_with(Config::default).settings = settings;
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn builtin_modules(mut self, enabled: bool) -> Self {
        self.builtin_modules = enabled;
        self
    }

    pub fn module(mut self, module: Box<dyn Module>) -> Self {
        self.extra_modules.push(module);
        self
    }

    /// Names (or globs) refused at load time on top of the configured
    /// blacklist, as given by `-name` boot arguments.
    pub fn blacklist(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.blacklist.extend(names);
        self
    }

    /// Builds the supervisor and loads the modules. Modules that cannot be
    /// loaded are reported and skipped; only an empty result when modules
    /// were asked for is an error.
    pub fn build(self) -> Result<Supervisor> {
        let config = self.config.unwrap_or_default();
        let settings = config.settings.clone();
        let mut sv = match self.clock {
            Some(clock) => Supervisor::with_clock(settings, clock),
            None => Supervisor::new(settings),
        };
        for name in self.blacklist {
            sv.blacklist(name);
        }

        let mut candidates = Vec::new();
        if self.builtin_modules {
            candidates.extend(modules::builtin(config));
        }
        candidates.extend(self.extra_modules);
        let wanted = candidates.len();

        let refused = sv.load_modules(candidates);
        if wanted > 0 && refused.len() == wanted {
            return Err(crate::error::Error::Module {
                module: refused.join(", "),
                reason: "no module could be loaded".to_string(),
            });
        }
        Ok(sv)
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
