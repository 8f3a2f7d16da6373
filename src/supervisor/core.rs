use super::clock::{Clock, SystemClock};
use super::signals::SignalPipe;
use super::SystemState;
use crate::config::Settings;
use crate::event::{Event, EventBus, HookResult, Payload, ERROR_MESSAGE};
use crate::module::ModuleSet;
use crate::registry::{pattern, Registry, Service, ServiceId, StateDef, StateLock};
use chrono::{DateTime, Utc};
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::Level;

/// A descriptor an extension asked the scheduler to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WatchedFd {
    pub fd: RawFd,
    pub owner: &'static str,
}

/// The supervisor context.
///
/// Single-threaded: every operation takes `&mut self`, and hooks receive the
/// supervisor itself, so extension code can call back into any operation.
///
/// # Example
///
/// ```
/// use service_supervisor::config::Settings;
/// use service_supervisor::registry::Service;
/// use service_supervisor::supervisor::{Supervisor, SystemState};
///
/// let mut sv = Supervisor::new(Settings::default());
/// let id = sv.admit(Service::new("net/lo")).unwrap();
/// assert_eq!(sv.find("net/lo"), Some(id));
/// assert_eq!(sv.system_state(), SystemState::Starting);
/// ```
pub struct Supervisor {
    pub(crate) settings: Settings,
    pub(crate) registry: Registry,
    pub(crate) bus: EventBus,
    pub(crate) modules: ModuleSet,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) now: DateTime<Utc>,
    pub(crate) last_monotonic: Duration,
    pub(crate) next_alarm: Option<DateTime<Utc>>,
    pub(crate) system_state: SystemState,
    pub(crate) shutdown_action: SystemState,
    pub(crate) runlevel: String,
    pub(crate) prev_runlevel: String,
    pub(crate) blacklist: Vec<String>,
    pub(crate) watched: Vec<WatchedFd>,
    pub(crate) signal_pipe: Option<SignalPipe>,
    reporting: bool,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self::with_clock(settings, Box::new(SystemClock::new()))
    }

    pub fn with_clock(settings: Settings, clock: Box<dyn Clock>) -> Self {
        let now = clock.wall();
        let last_monotonic = clock.monotonic();
        Self {
            runlevel: settings.runlevel.clone(),
            blacklist: settings.blacklist.clone(),
            shutdown_action: settings.shutdown_action.system_state(),
            settings,
            registry: Registry::new(),
            bus: EventBus::with_builtin_types(),
            modules: ModuleSet::default(),
            clock,
            now,
            last_monotonic,
            next_alarm: None,
            system_state: SystemState::Starting,
            prev_runlevel: String::new(),
            watched: Vec::new(),
            signal_pipe: None,
            reporting: false,
        }
    }

    pub fn builder() -> super::SupervisorBuilder {
        super::SupervisorBuilder::new()
    }

    /// Wall time as of the start of the current tick.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable registry access, for extensions registering states, types
    /// and process kinds.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        self.registry.get(id)
    }

    pub fn service_mut(&mut self, id: ServiceId) -> Option<&mut Service> {
        self.registry.get_mut(id)
    }

    pub fn find(&self, name: &str) -> Option<ServiceId> {
        self.registry.find(name)
    }

    /// Current state of a service, `None` for a stale handle.
    pub fn state_of(&self, id: ServiceId) -> Option<&'static StateDef> {
        self.registry.get(id).map(Service::current)
    }

    pub fn system_state(&self) -> SystemState {
        self.system_state
    }

    /// The terminal state the system moves to once everything is down.
    pub fn shutdown_action(&self) -> SystemState {
        self.shutdown_action
    }

    pub fn runlevel(&self) -> &str {
        &self.runlevel
    }

    pub fn prev_runlevel(&self) -> &str {
        &self.prev_runlevel
    }

    pub fn set_runlevel(&mut self, runlevel: impl Into<String>) {
        let runlevel = runlevel.into();
        if runlevel != self.runlevel {
            self.prev_runlevel = std::mem::replace(&mut self.runlevel, runlevel);
        }
    }

    /// Whether `name` (service or module) is excluded by the blacklist.
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist
            .iter()
            .any(|entry| entry == name || pattern::service_matches(entry, name))
    }

    pub fn blacklist(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.blacklist.contains(&name) {
            self.blacklist.push(name);
        }
    }

    // ---- state requests -------------------------------------------------

    /// Requests a transition; see [`Registry::request_state`].
    pub fn request_state(&mut self, id: ServiceId, state: &'static StateDef) -> bool {
        self.registry.request_state(id, state, self.now)
    }

    pub fn lock_state(&mut self, id: ServiceId) -> Option<StateLock> {
        self.registry.lock_state(id)
    }

    pub fn unlock_state(&mut self, lock: StateLock) -> bool {
        self.registry.unlock_state(lock, self.now)
    }

    /// Locks every service in `ids`, runs `f`, then releases the locks so
    /// all transitions requested inside `f` commit together.
    pub fn batch<R>(&mut self, ids: &[ServiceId], f: impl FnOnce(&mut Supervisor) -> R) -> R {
        let locks: Vec<StateLock> = ids
            .iter()
            .filter_map(|&id| self.registry.lock_state(id))
            .collect();
        let result = f(self);
        for lock in locks {
            self.registry.unlock_state(lock, self.now);
        }
        result
    }

    // ---- fd watches -----------------------------------------------------

    /// Asks the scheduler to dispatch `FD_READY` whenever `fd` is readable.
    pub fn watch_fd(&mut self, fd: RawFd, owner: &'static str) {
        if !self.watched.iter().any(|w| w.fd == fd) {
            self.watched.push(WatchedFd { fd, owner });
        }
    }

    pub fn unwatch_fd(&mut self, fd: RawFd) -> bool {
        let before = self.watched.len();
        self.watched.retain(|w| w.fd != fd);
        before != self.watched.len()
    }

    pub(crate) fn unwatch_owner(&mut self, owner: &str) {
        self.watched.retain(|w| w.owner != owner);
    }

    // ---- diagnostics ----------------------------------------------------

    /// Reports a diagnostic. Extensions see it as `ERROR_MESSAGE`; when none
    /// handles it, it goes to the log at the given level. A report raised
    /// while a report is being dispatched goes straight to the log.
    pub fn report(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        if !self.reporting {
            self.reporting = true;
            let mut event = Event::new(&ERROR_MESSAGE, Payload::Message { level, message });
            let answer = self.dispatch(&mut event);
            self.reporting = false;
            if answer == HookResult::Handled {
                return;
            }
            if let Payload::Message { level, message } = event.payload {
                log_at(level, &message);
            }
            return;
        }
        log_at(level, &message);
    }
}

fn log_at(level: Level, message: &str) {
    if level == Level::ERROR {
        tracing::error!("{}", message);
    } else if level == Level::WARN {
        tracing::warn!("{}", message);
    } else if level == Level::INFO {
        tracing::info!("{}", message);
    } else if level == Level::DEBUG {
        tracing::debug!("{}", message);
    } else {
        tracing::trace!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HookResult;
    use crate::registry::{RoughState, NEW};
    use std::cell::RefCell;
    use std::rc::Rc;

    static UP: StateDef = StateDef::new("TestUp", "up", RoughState::Up);
    static DOWN: StateDef = StateDef::new("TestDown", "down", RoughState::Down);

    fn supervisor() -> Supervisor {
        let mut sv = Supervisor::new(Settings::default());
        sv.registry_mut().register_states(&[&UP, &DOWN]).unwrap();
        sv
    }

    #[test]
    fn test_request_state_commits_when_unlocked() {
        let mut sv = supervisor();
        let id = sv.admit(Service::new("a")).unwrap();
        assert_eq!(sv.state_of(id), Some(&NEW));
        assert!(sv.request_state(id, &UP));
        assert_eq!(sv.state_of(id), Some(&UP));
    }

    #[test]
    fn test_batch_commits_on_release() {
        let mut sv = supervisor();
        let a = sv.admit(Service::new("a")).unwrap();
        let b = sv.admit(Service::new("b")).unwrap();

        sv.batch(&[a, b], |sv| {
            assert!(!sv.request_state(a, &UP));
            assert!(!sv.request_state(b, &DOWN));
            assert_eq!(sv.state_of(a), Some(&NEW));
        });
        assert_eq!(sv.state_of(a), Some(&UP));
        assert_eq!(sv.state_of(b), Some(&DOWN));
    }

    #[test]
    fn test_report_is_consumed_by_handler() {
        let mut sv = supervisor();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        sv.events()
            .register_hook(&ERROR_MESSAGE, "test", move |_, event| {
                if let Payload::Message { message, .. } = &event.payload {
                    sink.borrow_mut().push(message.clone());
                }
                HookResult::Handled
            })
            .unwrap();

        sv.report(Level::WARN, "disk is on fire");
        assert_eq!(*seen.borrow(), vec!["disk is on fire".to_string()]);
    }

    #[test]
    fn test_report_from_message_hook_does_not_recurse() {
        let mut sv = supervisor();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        sv.events()
            .register_hook(&ERROR_MESSAGE, "echo", move |sv, _| {
                *counter.borrow_mut() += 1;
                sv.report(Level::INFO, "nested");
                HookResult::Ok
            })
            .unwrap();

        sv.report(Level::ERROR, "outer");
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_failing_hooks_are_reported() {
        use crate::event::{MAIN, STATE_CHANGE, SYSTEM_CHANGE};

        let mut sv = supervisor();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        sv.events()
            .register_hook(&ERROR_MESSAGE, "test", move |_, event| {
                if let Payload::Message { message, .. } = &event.payload {
                    sink.borrow_mut().push(message.clone());
                }
                HookResult::Handled
            })
            .unwrap();
        for event in [&MAIN, &STATE_CHANGE, &SYSTEM_CHANGE] {
            sv.events()
                .register_hook(event, "broken", |_, _| HookResult::Fail)
                .unwrap();
        }

        let id = sv.admit(Service::new("a")).unwrap();
        assert!(sv.request_state(id, &UP));
        sv.set_system_state(SystemState::Up);
        sv.poll_once();

        let seen = seen.borrow();
        for expected in [
            "Handling system change starting -> up failed",
            "A main loop hook failed",
            "Handling state change of a failed",
        ] {
            assert!(seen.iter().any(|m| m == expected), "{:?}", seen);
        }
        // The pass still ran to the end.
        assert_eq!(sv.state_of(id), Some(&UP));
        assert_eq!(sv.system_state(), SystemState::Up);
    }

    #[test]
    fn test_blacklist_matches_patterns() {
        let mut sv = supervisor();
        sv.blacklist("debug/*");
        sv.blacklist("sshd");
        assert!(sv.is_blacklisted("debug/shell"));
        assert!(sv.is_blacklisted("sshd"));
        assert!(!sv.is_blacklisted("net/eth0"));
    }

    #[test]
    fn test_set_runlevel_keeps_previous() {
        let mut sv = supervisor();
        sv.set_runlevel("single");
        assert_eq!(sv.runlevel(), "single");
        assert_eq!(sv.prev_runlevel(), "default");
    }
}
