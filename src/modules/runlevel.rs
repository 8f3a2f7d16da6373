//! Process-less service types: `virtual` groups other services and is up
//! once its dependencies are; `runlevel` does the same and becomes the
//! current runlevel when started.

use super::common::{advance_start, advance_stop, register_states, still_in, unregister_states};
use crate::error::{Error, Result};
use crate::module::{check_api_version, Module};
use crate::registry::{RoughState, ServiceId, ServiceType, StateDef};
use crate::supervisor::Supervisor;

pub const NAME: &str = "runlevel";

pub static VIRTUAL_TYPE: ServiceType = ServiceType {
    name: "virtual",
    description: "A group of services, up when its dependencies are",
    start: start_virtual,
    stop: stop_virtual,
    restart: None,
};

pub static RUNLEVEL_TYPE: ServiceType = ServiceType {
    name: "runlevel",
    description: "A runlevel, up when every service in it is",
    start: start_runlevel,
    stop: stop_virtual,
    restart: None,
};

pub static VIRTUAL_START_MARKED: StateDef =
    StateDef::new("VirtualStartMarked", "Marked to start", RoughState::Starting)
        .on_enter(start_marked);
pub static VIRTUAL_WAITING_FOR_START_DEP: StateDef = StateDef::new(
    "VirtualWaitingForStartDep",
    "Waiting for member services",
    RoughState::Starting,
)
.on_interrupt(waiting_for_start_dep)
.awaiting_start_deps();
pub static VIRTUAL_UP: StateDef =
    StateDef::new("VirtualUp", "Every member service is up", RoughState::Up);
pub static VIRTUAL_STOP_MARKED: StateDef =
    StateDef::new("VirtualStopMarked", "Marked to stop", RoughState::Stopping)
        .on_enter(stop_marked);
pub static VIRTUAL_WAITING_FOR_STOP_DEP: StateDef = StateDef::new(
    "VirtualWaitingForStopDep",
    "Waiting for dependents to stop",
    RoughState::Stopping,
)
.on_interrupt(waiting_for_stop_dep);
pub static VIRTUAL_DOWN: StateDef = StateDef::new("VirtualDown", "Stopped", RoughState::Down);
pub static VIRTUAL_START_DEPS_FAILED: StateDef = StateDef::new(
    "VirtualStartDepsFailed",
    "A member service failed",
    RoughState::Failed,
);

static STATES: [&StateDef; 7] = [
    &VIRTUAL_START_MARKED,
    &VIRTUAL_WAITING_FOR_START_DEP,
    &VIRTUAL_UP,
    &VIRTUAL_STOP_MARKED,
    &VIRTUAL_WAITING_FOR_STOP_DEP,
    &VIRTUAL_DOWN,
    &VIRTUAL_START_DEPS_FAILED,
];

#[derive(Debug, Default)]
pub struct RunlevelModule;

impl Module for RunlevelModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version(NAME, api_version)?;
        register_states(sv, &STATES)?;
        sv.registry_mut().register_service_type(&VIRTUAL_TYPE)?;
        sv.registry_mut().register_service_type(&RUNLEVEL_TYPE)?;
        Ok(())
    }

    fn unload(&mut self, sv: &mut Supervisor) {
        sv.registry_mut().unregister_service_type(&RUNLEVEL_TYPE);
        sv.registry_mut().unregister_service_type(&VIRTUAL_TYPE);
        unregister_states(sv, &STATES);
    }
}

fn start_virtual(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let service = sv
        .service_mut(id)
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    if service.current() == &VIRTUAL_WAITING_FOR_STOP_DEP {
        sv.request_state(id, &VIRTUAL_UP);
        return Ok(());
    }
    if service.current().rough == RoughState::Stopping {
        service.set_restarting(true);
        return Ok(());
    }
    sv.request_state(id, &VIRTUAL_START_MARKED);
    Ok(())
}

fn start_runlevel(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let name = sv
        .service(id)
        .map(|s| s.name().to_string())
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    sv.set_runlevel(name);
    start_virtual(sv, id)
}

fn stop_virtual(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let current = sv
        .state_of(id)
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    if current.rough == RoughState::Starting {
        sv.request_state(id, &VIRTUAL_DOWN);
        return Ok(());
    }
    sv.request_state(id, &VIRTUAL_STOP_MARKED);
    Ok(())
}

fn start_marked(sv: &mut Supervisor, id: ServiceId) {
    sv.launch_dependencies(id);
    if still_in(sv, id, &VIRTUAL_START_MARKED) {
        sv.request_state(id, &VIRTUAL_WAITING_FOR_START_DEP);
    }
}

fn waiting_for_start_dep(sv: &mut Supervisor, id: ServiceId) {
    advance_start(
        sv,
        id,
        &VIRTUAL_WAITING_FOR_START_DEP,
        &VIRTUAL_UP,
        &VIRTUAL_START_DEPS_FAILED,
    );
}

fn stop_marked(sv: &mut Supervisor, id: ServiceId) {
    sv.stop_cascade(id);
    if still_in(sv, id, &VIRTUAL_STOP_MARKED) {
        sv.request_state(id, &VIRTUAL_WAITING_FOR_STOP_DEP);
    }
}

fn waiting_for_stop_dep(sv: &mut Supervisor, id: ServiceId) {
    advance_stop(sv, id, &VIRTUAL_WAITING_FOR_STOP_DEP, &VIRTUAL_DOWN);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::Service;

    fn supervisor() -> Supervisor {
        let mut sv = Supervisor::new(Settings::default());
        sv.load_modules(vec![Box::new(RunlevelModule)]);
        sv
    }

    #[test]
    fn test_runlevel_start_switches_runlevel() {
        let mut sv = supervisor();
        let id = sv.admit(Service::new("multi").with_type(&RUNLEVEL_TYPE)).unwrap();
        sv.start_service(id).unwrap();
        assert_eq!(sv.runlevel(), "multi");
        assert_eq!(sv.prev_runlevel(), "default");

        sv.poll_once();
        assert_eq!(sv.state_of(id), Some(&VIRTUAL_UP));
    }

    #[test]
    fn test_virtual_waits_for_members() {
        let mut sv = supervisor();
        let member = sv.admit(Service::new("member").with_type(&VIRTUAL_TYPE)).unwrap();
        let group = sv
            .admit(Service::new("group").with_type(&VIRTUAL_TYPE).need("member"))
            .unwrap();
        sv.start_service(group).unwrap();
        sv.poll_once();

        assert_eq!(sv.state_of(member), Some(&VIRTUAL_UP));
        assert_eq!(sv.state_of(group), Some(&VIRTUAL_UP));
    }

    #[test]
    fn test_stop_while_starting_goes_down() {
        let mut sv = supervisor();
        let id = sv.admit(Service::new("group").with_type(&VIRTUAL_TYPE)).unwrap();
        sv.request_state(id, &VIRTUAL_WAITING_FOR_START_DEP);
        sv.stop_service(id).unwrap();
        assert_eq!(sv.state_of(id), Some(&VIRTUAL_DOWN));
    }
}
