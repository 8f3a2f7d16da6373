use super::ServiceId;
use crate::error::{Error, Result};
use crate::supervisor::Supervisor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Callback attached to a state.
pub type StateFn = fn(&mut Supervisor, ServiceId);

/// Coarse classification of a detailed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoughState {
    New,
    Up,
    Down,
    Failed,
    Starting,
    Stopping,
    Waiting,
}

impl RoughState {
    /// States that keep the system from shutting down.
    pub fn keeps_running(self) -> bool {
        matches!(
            self,
            RoughState::Up | RoughState::Starting | RoughState::Stopping | RoughState::Waiting
        )
    }

    /// States a service can be started from.
    pub fn is_startable(self) -> bool {
        matches!(self, RoughState::New | RoughState::Down)
    }
}

impl fmt::Display for RoughState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoughState::New => write!(f, "new"),
            RoughState::Up => write!(f, "up"),
            RoughState::Down => write!(f, "down"),
            RoughState::Failed => write!(f, "failed"),
            RoughState::Starting => write!(f, "starting"),
            RoughState::Stopping => write!(f, "stopping"),
            RoughState::Waiting => write!(f, "waiting"),
        }
    }
}

/// A detailed service state.
///
/// States are `'static` definitions, usually declared as `static` items next
/// to the service type that uses them, and compared by identity:
///
/// ```
/// use service_supervisor::registry::{RoughState, StateDef};
///
/// static IDLE: StateDef = StateDef::new("Idle", "Nothing to do", RoughState::Down);
/// assert_eq!(IDLE.rough, RoughState::Down);
/// ```
pub struct StateDef {
    pub name: &'static str,
    pub description: &'static str,
    pub rough: RoughState,
    /// Runs on every scheduler pass while this state is current.
    pub on_interrupt: Option<StateFn>,
    /// Runs once, right after a service commits to this state.
    pub on_enter: Option<StateFn>,
    /// Runs when the alarm set while in this state elapses.
    pub on_alarm: Option<StateFn>,
    /// The service is parked here until its own start dependencies are up.
    /// Dependents in such a state do not hold back a dependency's stop.
    pub awaits_start_deps: bool,
}

impl StateDef {
    pub const fn new(name: &'static str, description: &'static str, rough: RoughState) -> Self {
        Self {
            name,
            description,
            rough,
            on_interrupt: None,
            on_enter: None,
            on_alarm: None,
            awaits_start_deps: false,
        }
    }

    pub const fn on_interrupt(mut self, f: StateFn) -> Self {
        self.on_interrupt = Some(f);
        self
    }

    pub const fn on_enter(mut self, f: StateFn) -> Self {
        self.on_enter = Some(f);
        self
    }

    pub const fn on_alarm(mut self, f: StateFn) -> Self {
        self.on_alarm = Some(f);
        self
    }

    pub const fn awaiting_start_deps(mut self) -> Self {
        self.awaits_start_deps = true;
        self
    }
}

impl PartialEq for StateDef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for StateDef {}

impl fmt::Debug for StateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.rough)
    }
}

impl fmt::Display for StateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub static NEW: StateDef = StateDef::new("New", "Service record created, not started yet", RoughState::New);
pub static RESET: StateDef = StateDef::new(
    "Reset",
    "Failure cleared, the service may be started again",
    RoughState::Down,
);
pub static REQUIRED_DEPENDENCY_NOT_FOUND: StateDef = StateDef::new(
    "RequiredDependencyNotFound",
    "A required dependency does not exist",
    RoughState::Failed,
);
pub static DEPENDENCY_FAILED: StateDef = StateDef::new(
    "DependencyFailed",
    "A dependency failed while this service was starting",
    RoughState::Failed,
);

/// States owned by the registry itself.
pub static CORE_STATES: [&StateDef; 4] = [
    &NEW,
    &RESET,
    &REQUIRED_DEPENDENCY_NOT_FOUND,
    &DEPENDENCY_FAILED,
];

/// Name-keyed table of every registered state.
#[derive(Debug, Default)]
pub struct StateTable {
    states: BTreeMap<&'static str, &'static StateDef>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, state: &'static StateDef) -> Result<()> {
        if self.states.contains_key(state.name) {
            return Err(Error::DuplicateState(state.name.to_string()));
        }
        self.states.insert(state.name, state);
        Ok(())
    }

    pub fn unregister(&mut self, state: &'static StateDef) -> bool {
        match self.states.get(state.name) {
            Some(existing) if *existing == state => {
                self.states.remove(state.name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'static StateDef> {
        self.states.get(name).copied()
    }

    pub fn contains(&self, state: &'static StateDef) -> bool {
        self.get(state.name).is_some_and(|s| s == state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static StateDef> + '_ {
        self.states.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static IDLE: StateDef = StateDef::new("Idle", "idle", RoughState::Down);
    static IDLE_AGAIN: StateDef = StateDef::new("Idle", "another idle", RoughState::Down);

    #[test]
    fn test_duplicate_state_name_is_hard_error() {
        let mut table = StateTable::new();
        table.register(&IDLE).unwrap();
        let err = table.register(&IDLE_AGAIN).unwrap_err();
        assert!(matches!(err, Error::DuplicateState(name) if name == "Idle"));
        assert_eq!(table.get("Idle"), Some(&IDLE));
    }

    #[test]
    fn test_states_compare_by_identity() {
        assert_eq!(&IDLE, &IDLE);
        assert_ne!(&IDLE, &IDLE_AGAIN);
    }

    #[test]
    fn test_unregister_only_removes_same_definition() {
        let mut table = StateTable::new();
        table.register(&IDLE).unwrap();
        assert!(!table.unregister(&IDLE_AGAIN));
        assert!(table.unregister(&IDLE));
        assert!(table.is_empty());
    }

    #[test]
    fn test_keeps_running() {
        assert!(RoughState::Up.keeps_running());
        assert!(RoughState::Waiting.keeps_running());
        assert!(!RoughState::Down.keeps_running());
        assert!(!RoughState::Failed.keeps_running());
        assert!(!RoughState::New.keeps_running());
    }
}
