use super::parse_duration_string;
use crate::supervisor::SystemState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TICK_CEILING: Duration = Duration::from_secs(30);
const DEFAULT_DOWN_GRACE: Duration = Duration::from_secs(60);

/// What the system does once every service has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownAction {
    #[default]
    Poweroff,
    Halt,
    Reboot,
    /// Leave the scheduler loop without touching the machine. Useful when
    /// not running as pid 1.
    Exit,
}

impl ShutdownAction {
    pub fn system_state(self) -> SystemState {
        match self {
            ShutdownAction::Poweroff => SystemState::Poweroff,
            ShutdownAction::Halt => SystemState::Halt,
            ShutdownAction::Reboot => SystemState::Reboot,
            ShutdownAction::Exit => SystemState::Exit,
        }
    }
}

impl fmt::Display for ShutdownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownAction::Poweroff => write!(f, "poweroff"),
            ShutdownAction::Halt => write!(f, "halt"),
            ShutdownAction::Reboot => write!(f, "reboot"),
            ShutdownAction::Exit => write!(f, "exit"),
        }
    }
}

/// Supervisor-wide settings, the `settings:` section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Runlevel service started at boot.
    pub runlevel: String,

    /// Exported to children as `CONSOLE`.
    pub console: String,

    /// Longest the scheduler sleeps when nothing is due.
    pub tick_ceiling: String,

    /// How long a Down service lingers before its record is freed.
    pub down_grace: String,

    pub shutdown_action: ShutdownAction,

    /// Where the hot-reload snapshot is written.
    pub dump_path: PathBuf,

    /// Service and module names (or globs) that are never loaded.
    pub blacklist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runlevel: "default".to_string(),
            console: "/dev/console".to_string(),
            tick_ceiling: "30s".to_string(),
            down_grace: "60s".to_string(),
            shutdown_action: ShutdownAction::default(),
            dump_path: PathBuf::from("/run/svsd.state.json"),
            blacklist: Vec::new(),
        }
    }
}

impl Settings {
    pub fn tick_ceiling(&self) -> Duration {
        duration_or(&self.tick_ceiling, "tick_ceiling", DEFAULT_TICK_CEILING)
    }

    pub fn down_grace(&self) -> Duration {
        duration_or(&self.down_grace, "down_grace", DEFAULT_DOWN_GRACE)
    }
}

fn duration_or(raw: &str, key: &str, default: Duration) -> Duration {
    parse_duration_string(raw).unwrap_or_else(|| {
        tracing::warn!(key, value = raw, "Invalid duration in settings, using default");
        default
    })
}
