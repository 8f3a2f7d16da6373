//! Service registry and state engine.
//!
//! The registry owns every [`Service`] record plus the tables of states,
//! service types and process kinds. Services live in a generational arena
//! addressed by [`ServiceId`]; all lookups return `None` on a miss because a
//! miss is the normal outcome for a dependency that has not been loaded yet.
//!
//! ## Commit protocol
//!
//! [`Registry::request_state`] records the requested state as `next` and, if
//! the service's [`LockCounter`] is zero, commits it right away: the current
//! state moves to `last`, the rough history is updated, the alarm is
//! cancelled and the service is queued on the changed list that the
//! scheduler drains once per pass. While a [`StateLock`] is held the commit
//! waits for the matching [`Registry::unlock_state`].

mod data;
mod lock;
pub mod pattern;
mod service;
mod service_type;
mod state;

pub use data::*;
pub use lock::*;
pub use service::*;
pub use service_type::*;
pub use state::*;

use crate::error::{Error, Result};
use crate::process::ProcessKind;
use chrono::{DateTime, TimeDelta, Utc};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

struct Slot {
    generation: u32,
    service: Option<Service>,
}

pub struct Registry {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    by_name: HashMap<String, ServiceId>,
    changed: VecDeque<ServiceId>,
    states: StateTable,
    service_types: BTreeMap<&'static str, &'static ServiceType>,
    process_kinds: BTreeMap<&'static str, &'static ProcessKind>,
}

impl Registry {
    /// An empty registry with the core states registered.
    pub fn new() -> Self {
        let mut states = StateTable::new();
        for state in CORE_STATES.iter().copied() {
            // The table is empty and core names are distinct.
            let _ = states.register(state);
        }
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_name: HashMap::new(),
            changed: VecDeque::new(),
            states,
            service_types: BTreeMap::new(),
            process_kinds: BTreeMap::new(),
        }
    }

    // ---- tables ---------------------------------------------------------

    pub fn states(&self) -> &StateTable {
        &self.states
    }

    pub fn register_state(&mut self, state: &'static StateDef) -> Result<()> {
        self.states.register(state)
    }

    pub fn register_states(&mut self, states: &[&'static StateDef]) -> Result<()> {
        for state in states {
            self.states.register(state)?;
        }
        Ok(())
    }

    pub fn unregister_state(&mut self, state: &'static StateDef) -> bool {
        self.states.unregister(state)
    }

    pub fn state_by_name(&self, name: &str) -> Option<&'static StateDef> {
        self.states.get(name)
    }

    pub fn register_service_type(&mut self, service_type: &'static ServiceType) -> Result<()> {
        if self.service_types.contains_key(service_type.name) {
            return Err(Error::DuplicateServiceType(service_type.name.to_string()));
        }
        self.service_types.insert(service_type.name, service_type);
        Ok(())
    }

    pub fn unregister_service_type(&mut self, service_type: &'static ServiceType) -> bool {
        match self.service_types.get(service_type.name) {
            Some(existing) if *existing == service_type => {
                self.service_types.remove(service_type.name);
                true
            }
            _ => false,
        }
    }

    pub fn service_type(&self, name: &str) -> Option<&'static ServiceType> {
        self.service_types.get(name).copied()
    }

    pub fn service_types(&self) -> impl Iterator<Item = &'static ServiceType> + '_ {
        self.service_types.values().copied()
    }

    pub fn register_process_kind(&mut self, kind: &'static ProcessKind) -> Result<()> {
        if self.process_kinds.contains_key(kind.name) {
            return Err(Error::DuplicateProcessKind(kind.name.to_string()));
        }
        self.process_kinds.insert(kind.name, kind);
        Ok(())
    }

    pub fn unregister_process_kind(&mut self, kind: &'static ProcessKind) -> bool {
        match self.process_kinds.get(kind.name) {
            Some(existing) if *existing == kind => {
                self.process_kinds.remove(kind.name);
                true
            }
            _ => false,
        }
    }

    pub fn process_kind(&self, name: &str) -> Option<&'static ProcessKind> {
        self.process_kinds.get(name).copied()
    }

    // ---- arena ----------------------------------------------------------

    /// Adds a service. Fails with [`Error::ServiceExists`] if the name is
    /// taken; the rejected record is dropped.
    pub fn register(&mut self, mut service: Service, now: DateTime<Utc>) -> Result<ServiceId> {
        if self.by_name.contains_key(service.name()) {
            return Err(Error::ServiceExists(service.name().to_string()));
        }
        service.stamp(now);
        let name = service.name().to_string();

        let id = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.service = Some(service);
                ServiceId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    service: Some(service),
                });
                ServiceId {
                    index,
                    generation: 0,
                }
            }
        };

        self.by_name.insert(name.clone(), id);
        tracing::debug!(service = %name, id = %id, "Registered service");
        Ok(id)
    }

    /// Removes a service and returns its record.
    pub fn remove(&mut self, id: ServiceId) -> Option<Service> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let service = slot.service.take()?;
        self.by_name.remove(service.name());
        self.free_slots.push(id.index);
        self.changed.retain(|queued| *queued != id);
        Some(service)
    }

    pub fn get(&self, id: ServiceId) -> Option<&Service> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.service.as_ref())
    }

    pub fn get_mut(&mut self, id: ServiceId) -> Option<&mut Service> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.service.as_mut())
    }

    pub fn contains(&self, id: ServiceId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Handles of every registered service, in slot order.
    pub fn ids(&self) -> Vec<ServiceId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServiceId, &Service)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.service.as_ref().map(|service| {
                (
                    ServiceId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    service,
                )
            })
        })
    }

    pub fn name_of(&self, id: ServiceId) -> Option<&str> {
        self.get(id).map(Service::name)
    }

    // ---- lookups --------------------------------------------------------

    pub fn find_exact(&self, name: &str) -> Option<ServiceId> {
        self.by_name.get(name).copied()
    }

    /// Finds the single service whose name matches `pattern` (see
    /// [`pattern::service_matches`]). Ambiguous patterns find nothing.
    pub fn find_by_pattern(&self, pattern: &str) -> Option<ServiceId> {
        if let Some(id) = self.find_exact(pattern) {
            return Some(id);
        }
        let mut matches = self
            .iter()
            .filter(|(_, service)| pattern::service_matches(pattern, service.name()));
        let (id, _) = matches.next()?;
        if matches.next().is_some() {
            tracing::debug!(pattern, "Pattern matches more than one service");
            return None;
        }
        Some(id)
    }

    /// Exact name first, then a pattern match.
    pub fn find(&self, name: &str) -> Option<ServiceId> {
        self.find_exact(name).or_else(|| {
            if pattern::is_pattern(name) {
                self.find_by_pattern(name)
            } else {
                None
            }
        })
    }

    /// The service owning the live process `pid`.
    pub fn find_by_pid(&self, pid: Pid) -> Option<ServiceId> {
        self.iter()
            .find(|(_, service)| service.process(pid).is_some())
            .map(|(id, _)| id)
    }

    pub fn count_where(&self, mut predicate: impl FnMut(&Service) -> bool) -> usize {
        self.iter().filter(|(_, s)| predicate(s)).count()
    }

    // ---- state engine ---------------------------------------------------

    /// Requests a transition. Returns true if it was committed right away.
    ///
    /// Requesting the current state cancels any pending transition.
    pub fn request_state(
        &mut self,
        id: ServiceId,
        state: &'static StateDef,
        now: DateTime<Utc>,
    ) -> bool {
        let registered = self.states.contains(state);
        let Some(service) = self.get_mut(id) else {
            return false;
        };
        if service.current() == state {
            service.set_next(None);
            return false;
        }
        if !registered {
            tracing::warn!(
                service = %service.name(),
                state = state.name,
                "Transition to a state that is not registered"
            );
        }
        service.set_next(Some(state));
        if service.lock.is_held() {
            return false;
        }
        self.commit(id, now)
    }

    pub fn lock_state(&mut self, id: ServiceId) -> Option<StateLock> {
        let service = self.get_mut(id)?;
        service.lock.acquire();
        Some(StateLock::new(id))
    }

    /// Releases a lock. The release that brings the counter to zero commits
    /// any pending transition; returns whether a change happened.
    pub fn unlock_state(&mut self, lock: StateLock, now: DateTime<Utc>) -> bool {
        let id = lock.service();
        let Some(service) = self.get_mut(id) else {
            return false;
        };
        if service.lock.release() {
            self.commit(id, now)
        } else {
            false
        }
    }

    fn commit(&mut self, id: ServiceId, now: DateTime<Utc>) -> bool {
        let Some(service) = self.get_mut(id) else {
            return false;
        };
        let from = service.current();
        if !service.commit(now) {
            return false;
        }
        tracing::debug!(
            service = %service.name(),
            from = from.name,
            to = service.current().name,
            "State committed"
        );
        if !self.changed.contains(&id) {
            self.changed.push_back(id);
        }
        true
    }

    pub fn pop_changed(&mut self) -> Option<ServiceId> {
        self.changed.pop_front()
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    // ---- housekeeping ---------------------------------------------------

    /// Frees services that have been down for longer than `grace` with no
    /// live process, no lock and no pending notification. Returns the
    /// names of the freed services.
    pub fn clean_down(&mut self, now: DateTime<Utc>, grace: Duration) -> Vec<String> {
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
        let expired: Vec<ServiceId> = self
            .iter()
            .filter(|(id, service)| {
                service.rough() == RoughState::Down
                    && service.next().is_none()
                    && !service.lock.is_held()
                    && !service.has_live_processes()
                    && !self.changed.contains(id)
                    && now.signed_duration_since(service.rough_since()) >= grace
            })
            .map(|(id, _)| id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.remove(id))
            .map(|service| {
                tracing::debug!(service = %service.name(), "Freed long-down service");
                service.name().to_string()
            })
            .collect()
    }

    /// Drops free process records on every service.
    pub fn reclaim_processes(&mut self) -> usize {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.service.as_mut())
            .map(Service::reclaim_processes)
            .sum()
    }

    /// Shifts every stored timestamp and alarm by `delta`.
    pub fn shift_timestamps(&mut self, delta: TimeDelta) {
        for service in self.slots.iter_mut().filter_map(|slot| slot.service.as_mut()) {
            service.shift_timestamps(delta);
        }
    }

    /// The earliest pending alarm over all services.
    pub fn next_alarm(&self) -> Option<DateTime<Utc>> {
        self.iter().filter_map(|(_, s)| s.alarm()).min()
    }

    /// Services whose alarm is due at `now`.
    pub fn due_alarms(&self, now: DateTime<Utc>) -> Vec<ServiceId> {
        self.iter()
            .filter(|(_, s)| s.alarm().is_some_and(|deadline| deadline <= now))
            .map(|(id, _)| id)
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
