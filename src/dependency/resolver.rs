use super::expand_target;
use crate::event::{HookResult, Payload, DEP_ON, START_DEP_MET, STOP_DEP_MET};
use crate::registry::{pattern, DependencyKind, RoughState, ServiceId, REQUIRED_DEPENDENCY_NOT_FOUND};
use crate::supervisor::Supervisor;
use std::collections::HashMap;
use tracing::Level;

/// Hop limit of [`Supervisor::depends_on_deep`].
pub const MAX_DEPENDENCY_DEPTH: usize = 10;

/// Outcome of a dependency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepStatus {
    /// Everything is in place.
    Ready,
    /// Something is still on its way; ask again later.
    NotYet,
    /// It will never work out without outside help.
    PermanentFailure,
}

fn is_active(rough: RoughState) -> bool {
    matches!(
        rough,
        RoughState::Up | RoughState::Starting | RoughState::Waiting
    )
}

impl Supervisor {
    /// Whether `service` depends directly on `check`: through its
    /// Require/Need/Use list (templates expanded, patterns matched), or
    /// because a `DEP_ON` hook handled the question.
    pub fn depends_on(&mut self, service: ServiceId, check: ServiceId) -> bool {
        if service == check {
            return false;
        }
        let (Some(dependent), Some(target)) = (self.registry.get(service), self.registry.get(check))
        else {
            return false;
        };
        let target_name = target.name();
        let listed = dependent.data().dependencies().iter().any(|dependency| {
            let wanted = expand_target(&dependency.target, dependent.name());
            wanted == target_name
                || (pattern::is_pattern(&wanted) && pattern::service_matches(&wanted, target_name))
        });
        if listed {
            return true;
        }

        match self.emit(&DEP_ON, Payload::DependsOn { service, check }) {
            HookResult::Handled => true,
            HookResult::Fail => {
                tracing::warn!(%service, %check, "DEP_ON hook failed, assuming no dependency");
                false
            }
            HookResult::Ok | HookResult::NotApplicable => false,
        }
    }

    /// Transitive [`Supervisor::depends_on`], following at most
    /// [`MAX_DEPENDENCY_DEPTH`] hops.
    pub fn depends_on_deep(&mut self, service: ServiceId, check: ServiceId) -> bool {
        let mut explored = HashMap::new();
        self.depends_on_within(service, check, MAX_DEPENDENCY_DEPTH, &mut explored)
    }

    /// `explored` holds the hops each service was already searched with. A
    /// service searched with at least as many hops left cannot reach `check`
    /// this time either.
    fn depends_on_within(
        &mut self,
        service: ServiceId,
        check: ServiceId,
        hops: usize,
        explored: &mut HashMap<ServiceId, usize>,
    ) -> bool {
        if hops == 0 {
            if let Some(name) = self.registry.name_of(service) {
                let name = name.to_string();
                self.report(
                    Level::WARN,
                    format!("Dependency chain of {} is too deep, stopping the search", name),
                );
            }
            return false;
        }
        if explored.get(&service).is_some_and(|&searched| searched >= hops) {
            return false;
        }
        explored.insert(service, hops);

        if self.depends_on(service, check) {
            return true;
        }
        for other in self.registry.ids() {
            if other == service || other == check {
                continue;
            }
            if self.depends_on(service, other)
                && self.depends_on_within(other, check, hops - 1, explored)
            {
                return true;
            }
        }
        false
    }

    /// Checks and advances the start dependencies of a service.
    ///
    /// Entries are verified in order; `dependency_cache` remembers how many
    /// were already found up so they are not checked again. A Down target
    /// is started. A missing Require target fails the service.
    pub fn start_dependencies(&mut self, id: ServiceId) -> DepStatus {
        let Some(service) = self.registry.get(id) else {
            return DepStatus::PermanentFailure;
        };
        let name = service.name().to_string();
        let dependencies = service.data().dependencies().to_vec();
        let skip = service.dependency_cache();

        for (index, dependency) in dependencies.iter().enumerate().skip(skip) {
            let target_name = expand_target(&dependency.target, &name);
            let Some(target) = self.registry.find(&target_name) else {
                match dependency.kind {
                    DependencyKind::Use => {
                        self.set_dependency_cache(id, index + 1);
                        continue;
                    }
                    DependencyKind::Require => {
                        self.report(
                            Level::ERROR,
                            format!("{} requires {}, which does not exist", name, target_name),
                        );
                        self.request_state(id, &REQUIRED_DEPENDENCY_NOT_FOUND);
                        return DepStatus::PermanentFailure;
                    }
                    DependencyKind::Need => return DepStatus::NotYet,
                }
            };

            let rough = self
                .registry
                .get(target)
                .map_or(RoughState::Failed, |t| t.rough());
            match rough {
                RoughState::Up => self.set_dependency_cache(id, index + 1),
                RoughState::Failed => {
                    self.set_dependency_cache(id, 0);
                    tracing::debug!(service = %name, dependency = %target_name, "Dependency failed");
                    return DepStatus::PermanentFailure;
                }
                RoughState::Down => {
                    if let Err(err) = self.start_service(target) {
                        tracing::debug!(service = %name, dependency = %target_name, error = %err, "Could not start dependency");
                    }
                    return DepStatus::NotYet;
                }
                RoughState::New
                | RoughState::Starting
                | RoughState::Stopping
                | RoughState::Waiting => return DepStatus::NotYet,
            }
        }

        if self.emit(&START_DEP_MET, Payload::Service(id)) == HookResult::Fail {
            return DepStatus::NotYet;
        }
        self.set_dependency_cache(id, 0);
        DepStatus::Ready
    }

    /// Whether a service may stop: nothing that is active or still stopping
    /// depends on it, and no `STOP_DEP_MET` hook objects.
    ///
    /// Dependents whose current state is still waiting for their own start
    /// dependencies do not hold the service up.
    pub fn stop_dependencies_check(&mut self, id: ServiceId, verbose: bool) -> DepStatus {
        if !self.registry.contains(id) {
            return DepStatus::PermanentFailure;
        }
        for other in self.registry.ids() {
            if other == id {
                continue;
            }
            let Some(state) = self.registry.get(other).map(|s| s.current()) else {
                continue;
            };
            let holds = is_active(state.rough) || state.rough == RoughState::Stopping;
            if !holds || state.awaits_start_deps {
                continue;
            }
            if self.depends_on(other, id) {
                if verbose {
                    let dependent = self.registry.name_of(other).unwrap_or_default();
                    let service = self.registry.name_of(id).unwrap_or_default();
                    tracing::info!(%service, %dependent, "Waiting for dependent to stop");
                }
                return DepStatus::NotYet;
            }
        }

        if self.emit(&STOP_DEP_MET, Payload::Service(id)) == HookResult::Fail {
            return DepStatus::NotYet;
        }
        DepStatus::Ready
    }

    /// Every other service whose dependency closure includes `id`.
    pub fn dependents_of(&mut self, id: ServiceId) -> Vec<ServiceId> {
        let mut dependents = Vec::new();
        for other in self.registry.ids() {
            if other != id && self.depends_on_deep(other, id) {
                dependents.push(other);
            }
        }
        dependents
    }

    /// Stops every active service that depends on `id`.
    pub fn stop_cascade(&mut self, id: ServiceId) {
        for dependent in self.active_dependents(id) {
            if let Err(err) = self.stop_service(dependent) {
                tracing::debug!(%dependent, error = %err, "Cascade stop failed");
            }
        }
    }

    /// Restarts every active service that depends on `id`: each is marked
    /// restarting and stopped, and starts again once it is down.
    pub fn restart_cascade(&mut self, id: ServiceId) {
        for dependent in self.active_dependents(id) {
            if let Some(service) = self.registry.get_mut(dependent) {
                service.set_restarting(true);
            }
            if let Err(err) = self.stop_service(dependent) {
                tracing::debug!(%dependent, error = %err, "Cascade restart failed");
            }
        }
    }

    fn active_dependents(&mut self, id: ServiceId) -> Vec<ServiceId> {
        self.dependents_of(id)
            .into_iter()
            .filter(|&other| {
                self.registry
                    .get(other)
                    .is_some_and(|s| is_active(s.rough()))
            })
            .collect()
    }

    fn set_dependency_cache(&mut self, id: ServiceId, value: usize) {
        if let Some(service) = self.registry.get_mut(id) {
            service.dependency_cache = value;
        }
    }
}
