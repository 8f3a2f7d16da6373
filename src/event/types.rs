use std::fmt;

/// A named occurrence extensions can hook into.
///
/// Event types are `'static` definitions; the bus keys them by name, so two
/// definitions with the same name cannot both be registered.
pub struct EventType {
    pub name: &'static str,
    pub description: &'static str,
}

impl EventType {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for EventType {}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventType").field(&self.name).finish()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub static PARSE: EventType = EventType::new(
    "PARSE",
    "Resolve a service name into a registered service record",
);
pub static ADDITIONAL_PARSE: EventType = EventType::new(
    "ADDITIONAL_PARSE",
    "A freshly parsed service may be amended or rejected",
);
pub static DEP_ON: EventType = EventType::new(
    "DEP_ON",
    "Assert a dependency between two services that is not listed statically",
);
pub static START_DEP_MET: EventType = EventType::new(
    "START_DEP_MET",
    "All start dependencies are up; a hook may still veto the start",
);
pub static STOP_DEP_MET: EventType = EventType::new(
    "STOP_DEP_MET",
    "No dependent is running any more; a hook may still veto the stop",
);
pub static UP_MET: EventType = EventType::new(
    "UP_MET",
    "A service is about to be declared up; a hook may veto",
);
pub static LAUNCH: EventType = EventType::new(
    "LAUNCH",
    "Runs in the forked child and is expected to exec the program",
);
pub static AFTER_FORK: EventType = EventType::new(
    "AFTER_FORK",
    "Runs in the forked child before LAUNCH; failure terminates the child",
);
pub static HANDLE_KILLED: EventType = EventType::new(
    "HANDLE_KILLED",
    "A supervised process exited and has been reaped",
);
pub static BUFFERED_OUTPUT: EventType = EventType::new(
    "BUFFERED_OUTPUT",
    "A complete line of output was read from a supervised process",
);
pub static SIGNAL: EventType = EventType::new("SIGNAL", "The supervisor received a signal");
pub static MAIN: EventType = EventType::new("MAIN", "Once per scheduler tick");
pub static STATE_CHANGE: EventType = EventType::new(
    "STATE_CHANGE",
    "A service committed a new state",
);
pub static IS_CHANGE: EventType = EventType::new(
    "IS_CHANGE",
    "The rough classification of a service changed",
);
pub static SYSTEM_CHANGE: EventType = EventType::new(
    "SYSTEM_CHANGE",
    "The system state changed",
);
pub static ERROR_MESSAGE: EventType = EventType::new(
    "ERROR_MESSAGE",
    "A diagnostic is about to be printed; a hook may redirect it",
);
pub static FD_READY: EventType = EventType::new(
    "FD_READY",
    "A descriptor registered with watch_fd is readable",
);

/// Event types every supervisor registers at construction.
pub static BUILTIN_EVENT_TYPES: [&EventType; 17] = [
    &PARSE,
    &ADDITIONAL_PARSE,
    &DEP_ON,
    &START_DEP_MET,
    &STOP_DEP_MET,
    &UP_MET,
    &LAUNCH,
    &AFTER_FORK,
    &HANDLE_KILLED,
    &BUFFERED_OUTPUT,
    &SIGNAL,
    &MAIN,
    &STATE_CHANGE,
    &IS_CHANGE,
    &SYSTEM_CHANGE,
    &ERROR_MESSAGE,
    &FD_READY,
];
