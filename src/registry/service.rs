use super::data::{DataStore, Dependency, DependencyKind};
use super::lock::LockCounter;
use super::service_type::ServiceType;
use super::state::{RoughState, StateDef, NEW};
use crate::process::{ProcessKind, ProcessRecord};
use chrono::{DateTime, TimeDelta, Utc};
use nix::unistd::Pid;
use std::fmt;

/// Generational handle to a service in the registry. A handle whose service
/// was freed never resolves again, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// A state together with the moment it was entered.
#[derive(Debug, Clone, Copy)]
pub struct StateStamp {
    pub state: &'static StateDef,
    pub since: DateTime<Utc>,
}

/// A supervised service.
#[derive(Debug)]
pub struct Service {
    name: String,
    service_type: Option<&'static ServiceType>,
    current: StateStamp,
    last: StateStamp,
    next: Option<&'static StateDef>,
    last_rough: RoughState,
    rough_since: DateTime<Utc>,
    notified_rough: RoughState,
    pub(crate) lock: LockCounter,
    pub(crate) dependency_cache: usize,
    processes: Vec<ProcessRecord>,
    data: DataStore,
    alarm: Option<DateTime<Utc>>,
    restarting: bool,
}

impl Service {
    /// A fresh record in state `New`. Timestamps are set on registration.
    pub fn new(name: impl Into<String>) -> Self {
        let stamp = StateStamp {
            state: &NEW,
            since: DateTime::<Utc>::UNIX_EPOCH,
        };
        Self {
            name: name.into(),
            service_type: None,
            current: stamp,
            last: stamp,
            next: None,
            last_rough: RoughState::New,
            rough_since: stamp.since,
            notified_rough: RoughState::New,
            lock: LockCounter::default(),
            dependency_cache: 0,
            processes: Vec::new(),
            data: DataStore::new(),
            alarm: None,
            restarting: false,
        }
    }

    pub fn with_type(mut self, service_type: &'static ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn with_data(mut self, data: DataStore) -> Self {
        self.data = data;
        self
    }

    /// Starts the record in `state` instead of `New`; used when restoring a
    /// snapshot.
    pub fn with_state(mut self, state: &'static StateDef) -> Self {
        self.current.state = state;
        self.last.state = state;
        self.last_rough = state.rough;
        self.notified_rough = state.rough;
        self
    }

    pub fn require(mut self, target: impl Into<String>) -> Self {
        self.data
            .add_dependency(Dependency::new(DependencyKind::Require, target));
        self
    }

    pub fn need(mut self, target: impl Into<String>) -> Self {
        self.data
            .add_dependency(Dependency::new(DependencyKind::Need, target));
        self
    }

    pub fn uses(mut self, target: impl Into<String>) -> Self {
        self.data
            .add_dependency(Dependency::new(DependencyKind::Use, target));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> Option<&'static ServiceType> {
        self.service_type
    }

    pub fn current(&self) -> &'static StateDef {
        self.current.state
    }

    pub fn current_since(&self) -> DateTime<Utc> {
        self.current.since
    }

    pub fn last(&self) -> &'static StateDef {
        self.last.state
    }

    pub fn last_since(&self) -> DateTime<Utc> {
        self.last.since
    }

    /// The transition waiting for the state lock to be released.
    pub fn next(&self) -> Option<&'static StateDef> {
        self.next
    }

    pub fn rough(&self) -> RoughState {
        self.current.state.rough
    }

    pub fn last_rough(&self) -> RoughState {
        self.last_rough
    }

    pub fn rough_since(&self) -> DateTime<Utc> {
        self.rough_since
    }

    pub fn lock_depth(&self) -> u32 {
        self.lock.depth()
    }

    pub fn dependency_cache(&self) -> usize {
        self.dependency_cache
    }

    pub fn alarm(&self) -> Option<DateTime<Utc>> {
        self.alarm
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    pub fn set_restarting(&mut self, restarting: bool) {
        self.restarting = restarting;
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DataStore {
        &mut self.data
    }

    pub fn processes(&self) -> &[ProcessRecord] {
        &self.processes
    }

    pub fn process(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.processes
            .iter()
            .find(|p| !p.is_free() && p.pid() == Some(pid))
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut ProcessRecord> {
        self.processes
            .iter_mut()
            .find(|p| !p.is_free() && p.pid() == Some(pid))
    }

    /// The live process of `kind`, if one is attached.
    pub fn process_of_kind(&self, kind: &'static ProcessKind) -> Option<&ProcessRecord> {
        self.processes
            .iter()
            .find(|p| !p.is_free() && p.kind() == kind)
    }

    pub fn process_of_kind_mut(
        &mut self,
        kind: &'static ProcessKind,
    ) -> Option<&mut ProcessRecord> {
        self.processes
            .iter_mut()
            .find(|p| !p.is_free() && p.kind() == kind)
    }

    pub fn has_live_processes(&self) -> bool {
        self.processes.iter().any(|p| !p.is_free())
    }

    pub(crate) fn attach(&mut self, process: ProcessRecord) {
        self.processes.push(process);
    }

    pub(crate) fn processes_mut(&mut self) -> &mut Vec<ProcessRecord> {
        &mut self.processes
    }

    /// Drops process records marked free. Returns how many were dropped.
    pub(crate) fn reclaim_processes(&mut self) -> usize {
        let before = self.processes.len();
        self.processes.retain(|p| !p.is_free());
        before - self.processes.len()
    }

    pub(crate) fn set_alarm(&mut self, deadline: Option<DateTime<Utc>>) {
        self.alarm = deadline;
    }

    pub(crate) fn set_next(&mut self, next: Option<&'static StateDef>) {
        self.next = next;
    }

    pub(crate) fn stamp(&mut self, now: DateTime<Utc>) {
        self.current.since = now;
        self.last.since = now;
        self.rough_since = now;
    }

    pub(crate) fn notified_rough(&self) -> RoughState {
        self.notified_rough
    }

    pub(crate) fn set_notified_rough(&mut self, rough: RoughState) {
        self.notified_rough = rough;
    }

    /// Moves the pending `next` state into `current`. Returns false when
    /// nothing was pending.
    pub(crate) fn commit(&mut self, now: DateTime<Utc>) -> bool {
        let Some(next) = self.next.take() else {
            return false;
        };
        if next == self.current.state {
            return false;
        }

        self.last = self.current;
        self.current = StateStamp {
            state: next,
            since: now,
        };
        if next.rough != self.last.state.rough {
            self.last_rough = self.last.state.rough;
            self.rough_since = now;
        }
        self.alarm = None;
        self.dependency_cache = 0;
        true
    }

    pub(crate) fn shift_timestamps(&mut self, delta: TimeDelta) {
        self.current.since += delta;
        self.last.since += delta;
        self.rough_since += delta;
        if let Some(alarm) = self.alarm.as_mut() {
            *alarm += delta;
        }
        for process in &mut self.processes {
            process.shift_timestamps(delta);
        }
    }
}
