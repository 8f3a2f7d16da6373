use super::{Supervisor, SystemState};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use tracing::Level;

/// Options taken from the boot arguments (the kernel command line when
/// running as pid 1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootOptions {
    /// `runlevel=<name>`
    pub runlevel: Option<String>,
    /// `+name`: started in addition to the runlevel.
    pub extra_services: Vec<String>,
    /// `-name`: never loaded.
    pub blacklist: Vec<String>,
    /// `hot_reload`: restore the state snapshot instead of booting.
    pub hot_reload: bool,
}

impl BootOptions {
    /// Parses boot arguments. Anything unrecognised belongs to someone else
    /// (the kernel, the bootloader) and is ignored.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(runlevel) = arg.strip_prefix("runlevel=") {
                if !runlevel.is_empty() {
                    options.runlevel = Some(runlevel.to_string());
                }
            } else if let Some(name) = arg.strip_prefix('+').filter(|n| !n.is_empty()) {
                options.extra_services.push(name.to_string());
            } else if let Some(name) = arg.strip_prefix('-').filter(|n| valid_name(n)) {
                options.blacklist.push(name.to_string());
            } else if arg == "hot_reload" {
                options.hot_reload = true;
            }
        }
        options
    }
}

/// Boot-argument service names never start with a dash, which keeps
/// `--flag` style arguments out of the blacklist.
fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('-')
}

impl Supervisor {
    /// Boots the system: applies the options, then either restores a hot
    /// reload snapshot or loads and starts the runlevel service plus any
    /// extra services.
    pub fn boot(&mut self, options: &BootOptions) -> Result<()> {
        for name in &options.blacklist {
            self.blacklist(name.clone());
        }
        if let Some(runlevel) = &options.runlevel {
            self.set_runlevel(runlevel.clone());
        }

        if options.hot_reload {
            let path = self.settings.dump_path.clone();
            let snapshot = Snapshot::read(&path)?;
            let restored = self.restore(&snapshot);
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %err, "Could not remove snapshot");
            }
            self.set_system_state(SystemState::Up);
            self.report(
                Level::INFO,
                format!("Hot reload restored {} services", restored),
            );
            return Ok(());
        }

        self.set_system_state(SystemState::Starting);
        let mut started = 0;
        let runlevel = self.runlevel.clone();
        for name in std::iter::once(&runlevel).chain(&options.extra_services) {
            match self.load_service(name).and_then(|id| self.start_service(id)) {
                Ok(()) => started += 1,
                Err(err) => self.report(Level::ERROR, format!("Could not start {}: {}", name, err)),
            }
        }
        if started == 0 {
            return Err(Error::ServiceNotFound(runlevel));
        }
        Ok(())
    }
}
