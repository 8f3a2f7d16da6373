use super::Supervisor;
use crate::event::{HookResult, Payload, IS_CHANGE, STATE_CHANGE};
use crate::registry::{RoughState, ServiceId, DEPENDENCY_FAILED};
use tracing::Level;

/// Upper bound on notifications handled in one drain of the changed list.
const MAX_CHANGES_PER_DRAIN: usize = 10_000;

impl Supervisor {
    /// Drains the changed list. For each committed transition:
    /// `STATE_CHANGE`, then (if the rough state moved) the core reaction and
    /// `IS_CHANGE`, then the new state's entry handler.
    pub(crate) fn process_changes(&mut self) {
        let mut budget = MAX_CHANGES_PER_DRAIN;
        while let Some(id) = self.registry.pop_changed() {
            self.notify_change(id);
            budget -= 1;
            if budget == 0 {
                self.report(
                    Level::WARN,
                    "Too many state changes in one pass, continuing next tick",
                );
                break;
            }
        }
    }

    fn report_hook_failure(&mut self, what: &str, id: ServiceId) {
        let name = self.registry.name_of(id).unwrap_or("<freed>").to_string();
        self.report(Level::WARN, format!("Handling {} of {} failed", what, name));
    }

    fn notify_change(&mut self, id: ServiceId) {
        if !self.registry.contains(id) {
            return;
        }
        if self.emit(&STATE_CHANGE, Payload::Service(id)) == HookResult::Fail {
            self.report_hook_failure("state change", id);
        }

        // A STATE_CHANGE hook may have dropped the service.
        let Some(service) = self.registry.get_mut(id) else {
            return;
        };
        let state = service.current();
        let rough = service.rough();
        let rough_changed = rough != service.notified_rough();
        if rough_changed {
            service.set_notified_rough(rough);
        }

        if rough_changed {
            self.on_rough_change(id, rough);
            if self.emit(&IS_CHANGE, Payload::Service(id)) == HookResult::Fail {
                self.report_hook_failure("status change", id);
            }
        }

        let still_there = self
            .registry
            .get(id)
            .is_some_and(|service| service.current() == state);
        if still_there {
            if let Some(on_enter) = state.on_enter {
                on_enter(self, id);
            }
        }
    }

    fn on_rough_change(&mut self, id: ServiceId, rough: RoughState) {
        match rough {
            RoughState::Up => self.check_system_up(),
            RoughState::Failed => {
                if let Some(service) = self.registry.get(id) {
                    let message = format!(
                        "Service {} failed ({})",
                        service.name(),
                        service.current().description
                    );
                    self.report(Level::WARN, message);
                }
                self.fail_starting_dependents(id);
                self.check_system_up();
            }
            RoughState::Down => {
                let restarting = self
                    .registry
                    .get_mut(id)
                    .map(|service| {
                        let flag = service.is_restarting();
                        service.set_restarting(false);
                        flag
                    })
                    .unwrap_or(false);
                if restarting {
                    if let Err(err) = self.start_service(id) {
                        self.report(Level::WARN, format!("Restart of {} failed: {}", id, err));
                    }
                }
                self.check_system_up();
            }
            _ => {}
        }
    }

    /// Marks every direct dependent that is still starting as failed.
    fn fail_starting_dependents(&mut self, failed: ServiceId) {
        for other in self.registry.ids() {
            if other == failed {
                continue;
            }
            let starting = self
                .registry
                .get(other)
                .is_some_and(|s| s.rough() == RoughState::Starting);
            if starting && self.depends_on(other, failed) {
                self.request_state(other, &DEPENDENCY_FAILED);
            }
        }
    }

    /// Runs the interrupt handler of every service's current state.
    pub(crate) fn run_state_handlers(&mut self) {
        for id in self.registry.ids() {
            let Some(state) = self.registry.get(id).map(|s| s.current()) else {
                continue;
            };
            if let Some(on_interrupt) = state.on_interrupt {
                on_interrupt(self, id);
            }
        }
    }
}
