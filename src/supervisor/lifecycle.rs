use super::{Supervisor, SystemState};
use crate::dependency::expand_target;
use crate::error::{Error, Result};
use crate::event::{Event, HookResult, Payload, ADDITIONAL_PARSE, PARSE, SYSTEM_CHANGE, UP_MET};
use crate::registry::{DependencyKind, RoughState, Service, ServiceId, RESET};
use tracing::Level;

impl Supervisor {
    /// Registers a service record and refuses it if it would close a
    /// dependency cycle with an already known service.
    pub fn admit(&mut self, service: Service) -> Result<ServiceId> {
        let name = service.name().to_string();
        if self.is_blacklisted(&name) {
            return Err(Error::Blacklisted(name));
        }
        let id = self.registry.register(service, self.now)?;

        for other in self.registry.ids() {
            if other == id {
                continue;
            }
            if self.depends_on_deep(id, other) && self.depends_on_deep(other, id) {
                let other_name = self.registry.name_of(other).unwrap_or_default().to_string();
                self.registry.remove(id);
                return Err(Error::CircularDependency(vec![
                    name.clone(),
                    other_name,
                    name,
                ]));
            }
        }
        Ok(id)
    }

    /// Finds a service by name or pattern, parsing it through the service
    /// source when it is not known yet.
    pub fn load_service(&mut self, name: &str) -> Result<ServiceId> {
        if let Some(id) = self.registry.find(name) {
            return Ok(id);
        }
        if self.is_blacklisted(name) {
            return Err(Error::Blacklisted(name.to_string()));
        }

        let mut event = Event::new(
            &PARSE,
            Payload::Parse {
                name: name.to_string(),
                service: None,
            },
        );
        let answer = self.dispatch(&mut event);
        let parsed = match event.payload {
            Payload::Parse { service, .. } => service,
            _ => None,
        };
        let id = match (answer, parsed) {
            (HookResult::Fail, _) => {
                if let Some(id) = parsed {
                    self.registry.remove(id);
                }
                return Err(Error::Parse(format!("Service source failed to parse '{}'", name)));
            }
            (_, Some(id)) if self.registry.contains(id) => id,
            _ => return Err(Error::ServiceNotFound(name.to_string())),
        };

        if self.emit(&ADDITIONAL_PARSE, Payload::Service(id)) == HookResult::Fail {
            self.registry.remove(id);
            return Err(Error::Parse(format!(
                "Additional parsing of '{}' failed",
                name
            )));
        }
        tracing::debug!(service = name, "Loaded service");
        Ok(id)
    }

    /// Starts a service through its type. Starting something already
    /// starting or up is a no-op.
    pub fn start_service(&mut self, id: ServiceId) -> Result<()> {
        let service = self.registry.get(id).ok_or_else(|| stale(id))?;
        let name = service.name().to_string();
        match service.rough() {
            RoughState::Up | RoughState::Starting | RoughState::Waiting => return Ok(()),
            RoughState::Failed => return Err(Error::ServiceFailed(name)),
            _ => {}
        }
        if !self.system_state.accepts_starts() {
            return Err(Error::NotAcceptingStarts(name, self.system_state.to_string()));
        }
        let service_type = service
            .service_type()
            .ok_or_else(|| Error::Untyped(name.clone()))?;

        tracing::debug!(service = %name, service_type = service_type.name, "Starting service");
        (service_type.start)(self, id)
    }

    /// Stops a service through its type. Services that are not running are
    /// left alone.
    pub fn stop_service(&mut self, id: ServiceId) -> Result<()> {
        let service = self.registry.get(id).ok_or_else(|| stale(id))?;
        if matches!(
            service.rough(),
            RoughState::Down | RoughState::New | RoughState::Failed | RoughState::Stopping
        ) {
            return Ok(());
        }
        let service_type = service
            .service_type()
            .ok_or_else(|| Error::Untyped(service.name().to_string()))?;

        tracing::debug!(service = %service.name(), "Stopping service");
        (service_type.stop)(self, id)
    }

    /// Restarts a service. Without a type-specific restart the service is
    /// marked restarting and stopped; it is started again once it is down.
    pub fn restart_service(&mut self, id: ServiceId) -> Result<()> {
        let service = self.registry.get(id).ok_or_else(|| stale(id))?;
        let service_type = service
            .service_type()
            .ok_or_else(|| Error::Untyped(service.name().to_string()))?;
        if let Some(restart) = service_type.restart {
            return restart(self, id);
        }
        match service.rough() {
            RoughState::Down | RoughState::New => self.start_service(id),
            RoughState::Failed => Err(Error::ServiceFailed(service.name().to_string())),
            _ => {
                if let Some(service) = self.registry.get_mut(id) {
                    service.set_restarting(true);
                }
                self.stop_service(id)
            }
        }
    }

    /// Clears a failure so the service may be started again.
    pub fn reset_service(&mut self, id: ServiceId) -> Result<()> {
        let service = self.registry.get(id).ok_or_else(|| stale(id))?;
        if service.rough() != RoughState::Failed {
            return Ok(());
        }
        self.request_state(id, &RESET);
        Ok(())
    }

    /// Loads and starts the Require/Need targets of a service, and starts
    /// Use targets that are already known.
    pub fn launch_dependencies(&mut self, id: ServiceId) {
        let Some(service) = self.registry.get(id) else {
            return;
        };
        let name = service.name().to_string();
        let dependencies = service.data().dependencies().to_vec();

        for dependency in dependencies {
            let target = expand_target(&dependency.target, &name);
            let found = match (self.registry.find(&target), dependency.kind) {
                (Some(found), _) => Some(found),
                (None, DependencyKind::Use) => None,
                (None, _) => match self.load_service(&target) {
                    Ok(found) => Some(found),
                    Err(err) => {
                        tracing::debug!(service = %name, target = %target, error = %err, "Dependency not loaded");
                        None
                    }
                },
            };
            let Some(found) = found else { continue };
            if self
                .registry
                .get(found)
                .is_some_and(|s| s.rough().is_startable())
            {
                if let Err(err) = self.start_service(found) {
                    tracing::debug!(service = %name, target = %target, error = %err, "Dependency not started");
                }
            }
        }
    }

    /// Asks the `UP_MET` hooks whether the service may be considered up.
    pub fn up_check(&mut self, id: ServiceId) -> bool {
        self.emit(&UP_MET, Payload::Service(id)) != HookResult::Fail
    }

    /// Stops every running service, committing all stop requests together.
    pub fn stop_all(&mut self) {
        let running: Vec<ServiceId> = self
            .registry
            .iter()
            .filter(|(_, s)| {
                matches!(
                    s.rough(),
                    RoughState::Up | RoughState::Starting | RoughState::Waiting
                )
            })
            .map(|(id, _)| id)
            .collect();

        self.batch(&running, |sv| {
            for &id in &running {
                if let Err(err) = sv.stop_service(id) {
                    sv.report(Level::WARN, format!("Could not stop {}: {}", id, err));
                }
            }
        });
    }

    /// Brings the system down: stop everything, then perform `action` once
    /// nothing is left running. Called again while already going down it
    /// only changes the final action.
    pub fn shutdown(&mut self, action: SystemState) {
        self.shutdown_action = action;
        if self.system_state.is_going_down() || self.system_state.is_terminal() {
            return;
        }
        self.report(Level::INFO, format!("Shutting down ({})", action));
        self.set_system_state(SystemState::Stopping);
        self.stop_all();
    }

    /// Leaves the scheduler loop at once so the binary can re-execute itself
    /// with a state snapshot. Services keep running.
    pub fn request_hot_reload(&mut self) {
        self.set_system_state(SystemState::Execve);
    }

    pub fn set_system_state(&mut self, to: SystemState) {
        let from = self.system_state;
        if from == to {
            return;
        }
        self.system_state = to;
        tracing::info!(%from, %to, "System state changed");
        if self.emit(&SYSTEM_CHANGE, Payload::System { from, to }) == HookResult::Fail {
            self.report(
                Level::WARN,
                format!("Handling system change {} -> {} failed", from, to),
            );
        }
    }

    /// Moves the system from Starting to Up once nothing is starting or
    /// waiting any more.
    pub(crate) fn check_system_up(&mut self) {
        if self.system_state != SystemState::Starting {
            return;
        }
        let busy = self.registry.count_where(|s| {
            matches!(s.rough(), RoughState::Starting | RoughState::Waiting)
        });
        if busy == 0 {
            self.set_system_state(SystemState::Up);
            self.report(Level::INFO, "System is up");
        }
    }

    /// Drives the system toward its shutdown action when nothing keeps it
    /// running.
    pub(crate) fn check_keep_running(&mut self) {
        let running = self.registry.count_where(|s| s.rough().keeps_running());
        match self.system_state {
            SystemState::Starting | SystemState::Up if running == 0 => {
                self.report(Level::INFO, "No services left running");
                let action = self.shutdown_action;
                self.shutdown(action);
            }
            SystemState::Stopping if running == 0 => {
                self.set_system_state(SystemState::AllServicesExited);
            }
            SystemState::AllServicesExited => {
                let action = self.shutdown_action;
                self.set_system_state(action);
            }
            _ => {}
        }
    }
}

fn stale(id: ServiceId) -> Error {
    Error::ServiceNotFound(id.to_string())
}
