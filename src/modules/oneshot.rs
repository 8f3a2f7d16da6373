//! The `service` type: a `start` command run to completion on start and a
//! `stop` command run on stop. A service without a `start` command is up as
//! soon as its dependencies are.

use super::common::{advance_start, advance_stop, register_states, still_in, unregister_states};
use crate::error::{Error, Result};
use crate::module::{check_api_version, Module};
use crate::process::{ExitStatus, ProcessKind};
use crate::registry::{RoughState, ServiceId, ServiceType, StateDef};
use crate::supervisor::Supervisor;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::Level;

pub const NAME: &str = "oneshot";

pub static START_PROCESS: ProcessKind = ProcessKind::new("start").on_killed(start_exited);
pub static STOP_PROCESS: ProcessKind = ProcessKind::new("stop").on_killed(stop_exited);

pub static ONESHOT_TYPE: ServiceType = ServiceType {
    name: "service",
    description: "Runs a start command once, and a stop command when stopped",
    start: start_oneshot,
    stop: stop_oneshot,
    restart: None,
};

pub static SERVICE_START_MARKED: StateDef =
    StateDef::new("ServiceStartMarked", "Marked to start", RoughState::Starting)
        .on_enter(start_marked);
pub static SERVICE_WAITING_FOR_START_DEP: StateDef = StateDef::new(
    "ServiceWaitingForStartDep",
    "Waiting for start dependencies",
    RoughState::Starting,
)
.on_interrupt(waiting_for_start_dep)
.awaiting_start_deps();
pub static SERVICE_START_DEPS_MET: StateDef = StateDef::new(
    "ServiceStartDepsMet",
    "Start dependencies are up, running start",
    RoughState::Starting,
)
.on_enter(run_start);
pub static SERVICE_START_RUN: StateDef =
    StateDef::new("ServiceStartRun", "Start command running", RoughState::Starting)
        .on_enter(arm_start_timeout)
        .on_alarm(start_timed_out);
pub static SERVICE_DONE: StateDef =
    StateDef::new("ServiceDone", "Started successfully", RoughState::Up);
pub static SERVICE_STOP_MARKED: StateDef =
    StateDef::new("ServiceStopMarked", "Marked to stop", RoughState::Stopping)
        .on_enter(stop_marked);
pub static SERVICE_WAITING_FOR_STOP_DEP: StateDef = StateDef::new(
    "ServiceWaitingForStopDep",
    "Waiting for dependents to stop",
    RoughState::Stopping,
)
.on_interrupt(waiting_for_stop_dep);
pub static SERVICE_STOP_DEPS_MET: StateDef = StateDef::new(
    "ServiceStopDepsMet",
    "No dependent is running, running stop",
    RoughState::Stopping,
)
.on_enter(run_stop);
pub static SERVICE_STOP_RUN: StateDef =
    StateDef::new("ServiceStopRun", "Stop command running", RoughState::Stopping);
pub static SERVICE_STOPPED: StateDef =
    StateDef::new("ServiceStopped", "Stopped", RoughState::Down);
pub static SERVICE_START_DEPS_FAILED: StateDef = StateDef::new(
    "ServiceStartDepsFailed",
    "A start dependency failed",
    RoughState::Failed,
);
pub static SERVICE_FAIL_START_RCODE: StateDef = StateDef::new(
    "ServiceFailStartRcode",
    "The start command exited with a non-zero code",
    RoughState::Failed,
);
pub static SERVICE_FAIL_START_SIGNAL: StateDef = StateDef::new(
    "ServiceFailStartSignal",
    "The start command was killed by a signal",
    RoughState::Failed,
);
pub static SERVICE_FAIL_START_LAUNCH: StateDef = StateDef::new(
    "ServiceFailStartLaunch",
    "The start command could not be launched",
    RoughState::Failed,
);
pub static SERVICE_FAIL_STOPPING: StateDef = StateDef::new(
    "ServiceFailStopping",
    "The stop command failed",
    RoughState::Failed,
);

static STATES: [&StateDef; 15] = [
    &SERVICE_START_MARKED,
    &SERVICE_WAITING_FOR_START_DEP,
    &SERVICE_START_DEPS_MET,
    &SERVICE_START_RUN,
    &SERVICE_DONE,
    &SERVICE_STOP_MARKED,
    &SERVICE_WAITING_FOR_STOP_DEP,
    &SERVICE_STOP_DEPS_MET,
    &SERVICE_STOP_RUN,
    &SERVICE_STOPPED,
    &SERVICE_START_DEPS_FAILED,
    &SERVICE_FAIL_START_RCODE,
    &SERVICE_FAIL_START_SIGNAL,
    &SERVICE_FAIL_START_LAUNCH,
    &SERVICE_FAIL_STOPPING,
];

#[derive(Debug, Default)]
pub struct OneshotModule;

impl Module for OneshotModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &[super::exec::NAME]
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version(NAME, api_version)?;
        register_states(sv, &STATES)?;
        sv.registry_mut().register_process_kind(&START_PROCESS)?;
        sv.registry_mut().register_process_kind(&STOP_PROCESS)?;
        sv.registry_mut().register_service_type(&ONESHOT_TYPE)?;
        Ok(())
    }

    fn unload(&mut self, sv: &mut Supervisor) {
        sv.registry_mut().unregister_service_type(&ONESHOT_TYPE);
        sv.registry_mut().unregister_process_kind(&STOP_PROCESS);
        sv.registry_mut().unregister_process_kind(&START_PROCESS);
        unregister_states(sv, &STATES);
    }
}

fn start_oneshot(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let service = sv
        .service_mut(id)
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    if service.current().rough == RoughState::Stopping {
        service.set_restarting(true);
        return Ok(());
    }
    sv.request_state(id, &SERVICE_START_MARKED);
    Ok(())
}

fn stop_oneshot(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let current = sv
        .state_of(id)
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    if current == &SERVICE_START_MARKED || current == &SERVICE_WAITING_FOR_START_DEP {
        sv.request_state(id, &SERVICE_STOPPED);
        return Ok(());
    }
    sv.request_state(id, &SERVICE_STOP_MARKED);
    Ok(())
}

fn start_marked(sv: &mut Supervisor, id: ServiceId) {
    sv.launch_dependencies(id);
    if still_in(sv, id, &SERVICE_START_MARKED) {
        sv.request_state(id, &SERVICE_WAITING_FOR_START_DEP);
    }
}

fn waiting_for_start_dep(sv: &mut Supervisor, id: ServiceId) {
    advance_start(
        sv,
        id,
        &SERVICE_WAITING_FOR_START_DEP,
        &SERVICE_START_DEPS_MET,
        &SERVICE_START_DEPS_FAILED,
    );
}

fn has_command(sv: &Supervisor, id: ServiceId, kind: &'static ProcessKind) -> bool {
    sv.service(id)
        .is_some_and(|s| s.data().get(kind.name).is_some())
}

fn run_start(sv: &mut Supervisor, id: ServiceId) {
    if !has_command(sv, id, &START_PROCESS) {
        sv.request_state(id, &SERVICE_DONE);
        return;
    }
    match sv.spawn(id, &START_PROCESS) {
        Ok(_) => {
            sv.request_state(id, &SERVICE_START_RUN);
        }
        Err(err) => {
            sv.report(Level::ERROR, format!("Could not run start of {}: {}", id, err));
            sv.request_state(id, &SERVICE_FAIL_START_LAUNCH);
        }
    }
}

fn arm_start_timeout(sv: &mut Supervisor, id: ServiceId) {
    if let Some(timeout) = sv.service(id).and_then(|s| s.data().duration("start_timeout")) {
        sv.set_alarm(id, timeout);
    }
}

fn start_timed_out(sv: &mut Supervisor, id: ServiceId) {
    if let Some(name) = sv.service(id).map(|s| s.name().to_string()) {
        sv.report(Level::WARN, format!("Start of {} timed out, killing it", name));
    }
    if let Err(err) = sv.signal_process(id, &START_PROCESS, Signal::SIGKILL) {
        sv.report(Level::ERROR, format!("Could not kill start of {}: {}", id, err));
    }
}

fn start_exited(sv: &mut Supervisor, id: ServiceId, pid: Pid) {
    let Some(service) = sv.service(id) else {
        return;
    };
    if service.current() != &SERVICE_START_RUN {
        return;
    }
    let next = match service.process(pid).and_then(|p| p.exit_status()) {
        Some(ExitStatus::Exited(0)) => &SERVICE_DONE,
        Some(ExitStatus::Exited(_)) | None => &SERVICE_FAIL_START_RCODE,
        Some(ExitStatus::Signaled(_)) => &SERVICE_FAIL_START_SIGNAL,
    };
    sv.request_state(id, next);
}

fn stop_marked(sv: &mut Supervisor, id: ServiceId) {
    sv.stop_cascade(id);
    if still_in(sv, id, &SERVICE_STOP_MARKED) {
        sv.request_state(id, &SERVICE_WAITING_FOR_STOP_DEP);
    }
}

fn waiting_for_stop_dep(sv: &mut Supervisor, id: ServiceId) {
    advance_stop(sv, id, &SERVICE_WAITING_FOR_STOP_DEP, &SERVICE_STOP_DEPS_MET);
}

fn run_stop(sv: &mut Supervisor, id: ServiceId) {
    if !has_command(sv, id, &STOP_PROCESS) {
        sv.request_state(id, &SERVICE_STOPPED);
        return;
    }
    match sv.spawn(id, &STOP_PROCESS) {
        Ok(_) => {
            sv.request_state(id, &SERVICE_STOP_RUN);
        }
        Err(err) => {
            sv.report(Level::ERROR, format!("Could not run stop of {}: {}", id, err));
            sv.request_state(id, &SERVICE_FAIL_STOPPING);
        }
    }
}

fn stop_exited(sv: &mut Supervisor, id: ServiceId, pid: Pid) {
    let Some(service) = sv.service(id) else {
        return;
    };
    if service.current() != &SERVICE_STOP_RUN {
        return;
    }
    let success = service
        .process(pid)
        .and_then(|p| p.exit_status())
        .is_some_and(ExitStatus::success);
    if !success {
        let name = service.name().to_string();
        sv.report(Level::WARN, format!("Stop command of {} failed", name));
    }
    sv.request_state(id, if success { &SERVICE_STOPPED } else { &SERVICE_FAIL_STOPPING });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::modules::exec::ExecModule;
    use crate::registry::Service;

    fn supervisor() -> Supervisor {
        let mut sv = Supervisor::new(Settings::default());
        sv.load_modules(vec![Box::new(ExecModule), Box::new(OneshotModule)]);
        sv
    }

    #[test]
    fn test_service_without_commands_goes_up_and_down() {
        let mut sv = supervisor();
        let id = sv.admit(Service::new("mounts").with_type(&ONESHOT_TYPE)).unwrap();
        sv.start_service(id).unwrap();
        sv.poll_once();
        assert_eq!(sv.state_of(id), Some(&SERVICE_DONE));

        sv.stop_service(id).unwrap();
        sv.poll_once();
        assert_eq!(sv.state_of(id), Some(&SERVICE_STOPPED));
    }

    #[test]
    fn test_start_exit_codes() {
        let mut sv = supervisor();
        for (name, status, expected) in [
            ("ok", ExitStatus::Exited(0), &SERVICE_DONE),
            ("bad", ExitStatus::Exited(2), &SERVICE_FAIL_START_RCODE),
            ("sig", ExitStatus::Signaled(9), &SERVICE_FAIL_START_SIGNAL),
        ] {
            let id = sv.admit(Service::new(name).with_type(&ONESHOT_TYPE)).unwrap();
            sv.request_state(id, &SERVICE_START_RUN);
            let pid = Pid::from_raw(3_000_000 + status.code().unwrap_or(100));
            sv.attach_process(id, &START_PROCESS, pid).unwrap();
            sv.reap(pid, status);
            assert_eq!(sv.state_of(id), Some(expected), "{}", name);
        }
    }

    #[test]
    fn test_stop_exit_codes() {
        let mut sv = supervisor();
        let id = sv.admit(Service::new("svc").with_type(&ONESHOT_TYPE)).unwrap();
        sv.request_state(id, &SERVICE_STOP_RUN);
        let pid = Pid::from_raw(3_100_000);
        sv.attach_process(id, &STOP_PROCESS, pid).unwrap();
        sv.reap(pid, ExitStatus::Exited(1));
        assert_eq!(sv.state_of(id), Some(&SERVICE_FAIL_STOPPING));
    }

    #[test]
    fn test_stop_before_start_dependencies_are_met() {
        let mut sv = supervisor();
        let id = sv.admit(Service::new("svc").with_type(&ONESHOT_TYPE)).unwrap();
        sv.request_state(id, &SERVICE_WAITING_FOR_START_DEP);
        sv.stop_service(id).unwrap();
        assert_eq!(sv.state_of(id), Some(&SERVICE_STOPPED));
    }
}
