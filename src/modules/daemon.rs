//! The `daemon` service type: one long-running process per service.
//!
//! Start: marked, wait for start dependencies, launch, up check, running.
//! Stop: marked, wait until no dependent is active, SIGTERM, SIGKILL after
//! `term_timeout` (repeated every two seconds), stopped. An exit while
//! running either respawns the daemon or settles the service according to
//! the exit status.

use super::common::{advance_start, advance_stop, register_states, still_in, unregister_states};
use crate::error::{Error, Result};
use crate::module::{check_api_version, Module};
use crate::process::{ExitStatus, ProcessKind};
use crate::registry::{RoughState, ServiceId, ServiceType, StateDef};
use crate::supervisor::{Supervisor, SystemState};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::time::Duration;
use tracing::Level;

pub const NAME: &str = "daemon";

/// Data key holding the wall time (ms since the epoch) of the last respawn.
pub const LAST_RESPAWN_KEY: &str = "internal_last_respawn";

const DEFAULT_RESPAWN_PAUSE: Duration = Duration::from_secs(1);
const DEFAULT_RESPAWN_RATE: Duration = Duration::from_secs(10);
const DEFAULT_TERM_TIMEOUT: Duration = Duration::from_secs(30);
const KILL_REPEAT: Duration = Duration::from_secs(2);

pub static DAEMON_PROCESS: ProcessKind = ProcessKind::new("daemon").on_killed(daemon_exited);

pub static DAEMON_TYPE: ServiceType = ServiceType {
    name: "daemon",
    description: "A long-running background process",
    start: start_daemon,
    stop: stop_daemon,
    restart: None,
};

pub static DAEMON_START_MARKED: StateDef =
    StateDef::new("DaemonStartMarked", "Marked to start", RoughState::Starting)
        .on_enter(start_marked);
pub static DAEMON_WAITING_FOR_START_DEP: StateDef = StateDef::new(
    "DaemonWaitingForStartDep",
    "Waiting for start dependencies",
    RoughState::Starting,
)
.on_interrupt(waiting_for_start_dep)
.awaiting_start_deps();
pub static DAEMON_START_DEPS_MET: StateDef = StateDef::new(
    "DaemonStartDepsMet",
    "Start dependencies are up, launching",
    RoughState::Starting,
)
.on_enter(launch);
pub static DAEMON_RUNNING: StateDef =
    StateDef::new("DaemonRunning", "The daemon is running", RoughState::Up);
pub static DAEMON_STOP_MARKED: StateDef =
    StateDef::new("DaemonStopMarked", "Marked to stop", RoughState::Stopping)
        .on_enter(stop_marked);
pub static DAEMON_WAITING_FOR_STOP_DEP: StateDef = StateDef::new(
    "DaemonWaitingForStopDep",
    "Waiting for dependents to stop",
    RoughState::Stopping,
)
.on_interrupt(waiting_for_stop_dep);
pub static DAEMON_STOP_DEPS_MET: StateDef = StateDef::new(
    "DaemonStopDepsMet",
    "No dependent is running, terminating",
    RoughState::Stopping,
)
.on_enter(terminate);
pub static DAEMON_TERM: StateDef =
    StateDef::new("DaemonTerm", "SIGTERM sent, waiting for exit", RoughState::Stopping)
        .on_enter(arm_term_timeout)
        .on_alarm(term_timed_out);
pub static DAEMON_KILL: StateDef =
    StateDef::new("DaemonKill", "SIGKILL sent, waiting for exit", RoughState::Stopping)
        .on_enter(arm_kill_repeat)
        .on_alarm(kill_again);
pub static DAEMON_STOPPED: StateDef =
    StateDef::new("DaemonStopped", "The daemon is not running", RoughState::Down);
pub static DAEMON_WAIT_RESPAWN_TIMEOUT: StateDef = StateDef::new(
    "DaemonWaitRespawnTimeout",
    "Pausing before a respawn",
    RoughState::Waiting,
)
.on_enter(arm_respawn_pause)
.on_alarm(respawn);
pub static DAEMON_START_DEPS_FAILED: StateDef = StateDef::new(
    "DaemonStartDepsFailed",
    "A start dependency failed",
    RoughState::Failed,
);
pub static DAEMON_FAIL_START_RCODE: StateDef = StateDef::new(
    "DaemonFailStartRcode",
    "The daemon exited with a non-zero code",
    RoughState::Failed,
);
pub static DAEMON_FAIL_START_SIGNAL: StateDef = StateDef::new(
    "DaemonFailStartSignal",
    "The daemon crashed with a segmentation fault",
    RoughState::Failed,
);
pub static DAEMON_FAIL_START_LAUNCH: StateDef = StateDef::new(
    "DaemonFailStartLaunch",
    "The daemon could not be launched",
    RoughState::Failed,
);
pub static DAEMON_FAIL_STOPPING: StateDef = StateDef::new(
    "DaemonFailStopping",
    "The daemon did not stop cleanly",
    RoughState::Failed,
);
pub static DAEMON_UP_CHECK_FAILED: StateDef = StateDef::new(
    "DaemonUpCheckFailed",
    "An up check vetoed the daemon",
    RoughState::Failed,
)
.on_enter(terminate_quietly);
pub static DAEMON_RESPAWN_RATE_EXCEEDED: StateDef = StateDef::new(
    "DaemonRespawnRateExceeded",
    "The daemon died again too soon after a respawn",
    RoughState::Failed,
);

static STATES: [&StateDef; 18] = [
    &DAEMON_START_MARKED,
    &DAEMON_WAITING_FOR_START_DEP,
    &DAEMON_START_DEPS_MET,
    &DAEMON_RUNNING,
    &DAEMON_STOP_MARKED,
    &DAEMON_WAITING_FOR_STOP_DEP,
    &DAEMON_STOP_DEPS_MET,
    &DAEMON_TERM,
    &DAEMON_KILL,
    &DAEMON_STOPPED,
    &DAEMON_WAIT_RESPAWN_TIMEOUT,
    &DAEMON_START_DEPS_FAILED,
    &DAEMON_FAIL_START_RCODE,
    &DAEMON_FAIL_START_SIGNAL,
    &DAEMON_FAIL_START_LAUNCH,
    &DAEMON_FAIL_STOPPING,
    &DAEMON_UP_CHECK_FAILED,
    &DAEMON_RESPAWN_RATE_EXCEEDED,
];

#[derive(Debug, Default)]
pub struct DaemonModule;

impl Module for DaemonModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &[super::exec::NAME]
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version(NAME, api_version)?;
        register_states(sv, &STATES)?;
        sv.registry_mut().register_process_kind(&DAEMON_PROCESS)?;
        sv.registry_mut().register_service_type(&DAEMON_TYPE)?;
        Ok(())
    }

    fn unload(&mut self, sv: &mut Supervisor) {
        sv.registry_mut().unregister_service_type(&DAEMON_TYPE);
        sv.registry_mut().unregister_process_kind(&DAEMON_PROCESS);
        unregister_states(sv, &STATES);
    }
}

fn start_daemon(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let service = sv
        .service_mut(id)
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    let current = service.current();
    if current == &DAEMON_WAITING_FOR_STOP_DEP {
        // Nothing was signalled yet; the daemon simply keeps running.
        sv.request_state(id, &DAEMON_RUNNING);
        return Ok(());
    }
    if current.rough == RoughState::Stopping {
        service.set_restarting(true);
        return Ok(());
    }
    sv.request_state(id, &DAEMON_START_MARKED);
    Ok(())
}

fn stop_daemon(sv: &mut Supervisor, id: ServiceId) -> Result<()> {
    let service = sv
        .service(id)
        .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
    let current = service.current();
    if current == &DAEMON_WAITING_FOR_START_DEP
        || current == &DAEMON_START_MARKED
        || current == &DAEMON_WAIT_RESPAWN_TIMEOUT
    {
        sv.request_state(id, &DAEMON_STOPPED);
        return Ok(());
    }
    sv.request_state(id, &DAEMON_STOP_MARKED);
    Ok(())
}

fn start_marked(sv: &mut Supervisor, id: ServiceId) {
    sv.launch_dependencies(id);
    if still_in(sv, id, &DAEMON_START_MARKED) {
        sv.request_state(id, &DAEMON_WAITING_FOR_START_DEP);
    }
}

fn waiting_for_start_dep(sv: &mut Supervisor, id: ServiceId) {
    advance_start(
        sv,
        id,
        &DAEMON_WAITING_FOR_START_DEP,
        &DAEMON_START_DEPS_MET,
        &DAEMON_START_DEPS_FAILED,
    );
}

fn launch(sv: &mut Supervisor, id: ServiceId) {
    let Some(name) = sv.service(id).map(|s| s.name().to_string()) else {
        return;
    };
    let has_command = sv
        .service(id)
        .is_some_and(|s| s.data().get(DAEMON_PROCESS.name).is_some());
    if !has_command {
        sv.report(Level::ERROR, format!("{} has no daemon command", name));
        sv.request_state(id, &DAEMON_FAIL_START_LAUNCH);
        return;
    }

    if let Err(err) = sv.spawn(id, &DAEMON_PROCESS) {
        sv.report(Level::ERROR, format!("Could not launch {}: {}", name, err));
        sv.request_state(id, &DAEMON_FAIL_START_LAUNCH);
        return;
    }
    if !sv.up_check(id) {
        sv.report(Level::WARN, format!("{} failed its up check", name));
        sv.request_state(id, &DAEMON_UP_CHECK_FAILED);
        return;
    }
    sv.request_state(id, &DAEMON_RUNNING);
}

fn stop_marked(sv: &mut Supervisor, id: ServiceId) {
    sv.stop_cascade(id);
    if still_in(sv, id, &DAEMON_STOP_MARKED) {
        sv.request_state(id, &DAEMON_WAITING_FOR_STOP_DEP);
    }
}

fn waiting_for_stop_dep(sv: &mut Supervisor, id: ServiceId) {
    advance_stop(sv, id, &DAEMON_WAITING_FOR_STOP_DEP, &DAEMON_STOP_DEPS_MET);
}

fn terminate(sv: &mut Supervisor, id: ServiceId) {
    match sv.signal_process(id, &DAEMON_PROCESS, Signal::SIGTERM) {
        Ok(true) => {
            sv.request_state(id, &DAEMON_TERM);
        }
        Ok(false) => {
            sv.request_state(id, &DAEMON_STOPPED);
        }
        Err(err) => {
            sv.report(Level::ERROR, format!("Could not stop {}: {}", id, err));
            sv.request_state(id, &DAEMON_FAIL_STOPPING);
        }
    }
}

fn terminate_quietly(sv: &mut Supervisor, id: ServiceId) {
    if let Err(err) = sv.signal_process(id, &DAEMON_PROCESS, Signal::SIGTERM) {
        tracing::debug!(service = %id, error = %err, "Could not terminate vetoed daemon");
    }
}

fn arm_term_timeout(sv: &mut Supervisor, id: ServiceId) {
    let timeout = sv
        .service(id)
        .and_then(|s| s.data().duration("term_timeout"))
        .unwrap_or(DEFAULT_TERM_TIMEOUT);
    sv.set_alarm(id, timeout);
}

fn term_timed_out(sv: &mut Supervisor, id: ServiceId) {
    if let Some(name) = sv.service(id).map(|s| s.name().to_string()) {
        sv.report(
            Level::WARN,
            format!("{} ignored SIGTERM, sending SIGKILL", name),
        );
    }
    match sv.signal_process(id, &DAEMON_PROCESS, Signal::SIGKILL) {
        Ok(true) => {
            sv.request_state(id, &DAEMON_KILL);
        }
        Ok(false) => {
            sv.request_state(id, &DAEMON_STOPPED);
        }
        Err(err) => {
            sv.report(Level::ERROR, format!("Could not kill {}: {}", id, err));
            sv.request_state(id, &DAEMON_FAIL_STOPPING);
        }
    }
}

fn arm_kill_repeat(sv: &mut Supervisor, id: ServiceId) {
    sv.set_alarm(id, KILL_REPEAT);
}

fn kill_again(sv: &mut Supervisor, id: ServiceId) {
    match sv.signal_process(id, &DAEMON_PROCESS, Signal::SIGKILL) {
        Ok(true) => sv.set_alarm(id, KILL_REPEAT),
        Ok(false) => {
            sv.request_state(id, &DAEMON_STOPPED);
        }
        Err(err) => {
            sv.report(Level::ERROR, format!("Could not kill {}: {}", id, err));
            sv.request_state(id, &DAEMON_FAIL_STOPPING);
        }
    }
}

fn arm_respawn_pause(sv: &mut Supervisor, id: ServiceId) {
    let pause = sv
        .service(id)
        .and_then(|s| s.data().duration("respawn_pause"))
        .unwrap_or(DEFAULT_RESPAWN_PAUSE);
    sv.set_alarm(id, pause);
}

fn respawn(sv: &mut Supervisor, id: ServiceId) {
    sv.request_state(id, &DAEMON_STOPPED);
    if let Err(err) = sv.start_service(id) {
        sv.report(Level::WARN, format!("Could not respawn {}: {}", id, err));
    }
}

/// What to do about a daemon that exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitOutcome {
    Respawn,
    TooSoon,
    Settle(&'static StateDef),
    Ignore,
}

fn daemon_exited(sv: &mut Supervisor, id: ServiceId, pid: Pid) {
    let outcome = exit_outcome(sv, id, pid);
    let Some(name) = sv.service(id).map(|s| s.name().to_string()) else {
        return;
    };
    match outcome {
        ExitOutcome::Respawn => {
            let now = sv.now().timestamp_millis();
            if let Some(service) = sv.service_mut(id) {
                service.data_mut().set_int(LAST_RESPAWN_KEY, now);
            }
            sv.report(Level::INFO, format!("Respawning {}", name));
            sv.request_state(id, &DAEMON_WAIT_RESPAWN_TIMEOUT);
        }
        ExitOutcome::TooSoon => {
            sv.report(
                Level::ERROR,
                format!("{} died again too soon after a respawn, giving up", name),
            );
            sv.request_state(id, &DAEMON_RESPAWN_RATE_EXCEEDED);
        }
        ExitOutcome::Settle(state) => {
            sv.request_state(id, state);
        }
        ExitOutcome::Ignore => {}
    }
}

fn exit_outcome(sv: &Supervisor, id: ServiceId, pid: Pid) -> ExitOutcome {
    let Some(service) = sv.service(id) else {
        return ExitOutcome::Ignore;
    };
    let current = service.current();
    if matches!(current.rough, RoughState::Failed | RoughState::Down) {
        return ExitOutcome::Ignore;
    }
    let data = service.data();

    if current == &DAEMON_RUNNING && data.flag("respawn") && sv.system_state() == SystemState::Up {
        let rate = data
            .duration("respawn_rate")
            .unwrap_or(DEFAULT_RESPAWN_RATE);
        let now = sv.now().timestamp_millis();
        let too_soon = data
            .int(LAST_RESPAWN_KEY)
            .is_some_and(|last| (now - last) < rate.as_millis() as i64);
        return if too_soon {
            ExitOutcome::TooSoon
        } else {
            ExitOutcome::Respawn
        };
    }

    let stopping = current.rough == RoughState::Stopping;
    let state = match service.process(pid).and_then(|p| p.exit_status()) {
        Some(status) if status.signal() == Some(Signal::SIGSEGV) => &DAEMON_FAIL_START_SIGNAL,
        Some(ExitStatus::Exited(0)) | Some(ExitStatus::Signaled(_)) | None => &DAEMON_STOPPED,
        Some(ExitStatus::Exited(_)) if data.flag("daemon_fail_ok") => &DAEMON_STOPPED,
        Some(ExitStatus::Exited(_)) if stopping && data.flag("daemon_stops_badly") => {
            &DAEMON_STOPPED
        }
        Some(ExitStatus::Exited(_)) if stopping => &DAEMON_FAIL_STOPPING,
        Some(ExitStatus::Exited(_)) => &DAEMON_FAIL_START_RCODE,
    };
    ExitOutcome::Settle(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::modules::exec::ExecModule;
    use crate::registry::Service;
    use crate::supervisor::{ManualClock, SystemState};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicI32, Ordering};

    static NEXT_PID: AtomicI32 = AtomicI32::new(4_000_000);

    fn supervisor() -> (Supervisor, crate::supervisor::ClockHandle) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let handle = clock.handle();
        let mut sv = Supervisor::with_clock(Settings::default(), Box::new(clock));
        sv.load_modules(vec![Box::new(ExecModule), Box::new(DaemonModule)]);
        (sv, handle)
    }

    /// A daemon that is already running under a fake pid.
    fn running(sv: &mut Supervisor, name: &str, configure: impl FnOnce(&mut Service)) -> (ServiceId, Pid) {
        let mut service = Service::new(name).with_type(&DAEMON_TYPE);
        service.data_mut().set_text("daemon", "exec sleep 1000");
        configure(&mut service);
        let id = sv.admit(service).unwrap();
        sv.request_state(id, &DAEMON_RUNNING);
        let pid = Pid::from_raw(NEXT_PID.fetch_add(1, Ordering::Relaxed));
        sv.attach_process(id, &DAEMON_PROCESS, pid).unwrap();
        sv.set_system_state(SystemState::Up);
        (id, pid)
    }

    #[test]
    fn test_clean_exit_stops() {
        let (mut sv, _) = supervisor();
        let (id, pid) = running(&mut sv, "clean", |_| {});
        sv.reap(pid, ExitStatus::Exited(0));
        assert_eq!(sv.state_of(id), Some(&DAEMON_STOPPED));
    }

    #[test]
    fn test_non_zero_exit_fails_unless_allowed() {
        let (mut sv, _) = supervisor();
        let (failing, pid) = running(&mut sv, "failing", |_| {});
        sv.reap(pid, ExitStatus::Exited(3));
        assert_eq!(sv.state_of(failing), Some(&DAEMON_FAIL_START_RCODE));

        let (tolerated, pid) = running(&mut sv, "tolerated", |s| {
            s.data_mut().set_flag("daemon_fail_ok", true)
        });
        sv.reap(pid, ExitStatus::Exited(3));
        assert_eq!(sv.state_of(tolerated), Some(&DAEMON_STOPPED));
    }

    #[test]
    fn test_segfault_fails_with_signal_state() {
        let (mut sv, _) = supervisor();
        let (id, pid) = running(&mut sv, "crashy", |_| {});
        sv.reap(pid, ExitStatus::Signaled(Signal::SIGSEGV as i32));
        assert_eq!(sv.state_of(id), Some(&DAEMON_FAIL_START_SIGNAL));
    }

    #[test]
    fn test_other_signal_stops() {
        let (mut sv, _) = supervisor();
        let (id, pid) = running(&mut sv, "killed", |_| {});
        sv.reap(pid, ExitStatus::Signaled(Signal::SIGKILL as i32));
        assert_eq!(sv.state_of(id), Some(&DAEMON_STOPPED));
    }

    #[test]
    fn test_stopping_with_bad_exit() {
        let (mut sv, _) = supervisor();
        let (strict, pid) = running(&mut sv, "strict", |_| {});
        sv.request_state(strict, &DAEMON_TERM);
        sv.reap(pid, ExitStatus::Exited(1));
        assert_eq!(sv.state_of(strict), Some(&DAEMON_FAIL_STOPPING));

        let (lenient, pid) = running(&mut sv, "lenient", |s| {
            s.data_mut().set_flag("daemon_stops_badly", true)
        });
        sv.request_state(lenient, &DAEMON_TERM);
        sv.reap(pid, ExitStatus::Exited(1));
        assert_eq!(sv.state_of(lenient), Some(&DAEMON_STOPPED));
    }

    #[test]
    fn test_respawn_then_rate_limit() {
        let (mut sv, clock) = supervisor();
        let (id, pid) = running(&mut sv, "flappy", |s| s.data_mut().set_flag("respawn", true));

        sv.reap(pid, ExitStatus::Exited(1));
        assert_eq!(sv.state_of(id), Some(&DAEMON_WAIT_RESPAWN_TIMEOUT));
        assert!(sv.service(id).unwrap().data().int(LAST_RESPAWN_KEY).is_some());

        // Pretend the respawned daemon came up and died again five seconds
        // later, inside the default ten second window.
        clock.advance(Duration::from_secs(5));
        sv.poll_once();
        sv.request_state(id, &DAEMON_RUNNING);
        let pid = Pid::from_raw(NEXT_PID.fetch_add(1, Ordering::Relaxed));
        sv.attach_process(id, &DAEMON_PROCESS, pid).unwrap();
        sv.reap(pid, ExitStatus::Exited(1));
        assert_eq!(sv.state_of(id), Some(&DAEMON_RESPAWN_RATE_EXCEEDED));
    }

    #[test]
    fn test_no_respawn_while_shutting_down() {
        let (mut sv, _) = supervisor();
        let (id, pid) = running(&mut sv, "svc", |s| s.data_mut().set_flag("respawn", true));
        sv.set_system_state(SystemState::Stopping);
        sv.reap(pid, ExitStatus::Exited(0));
        assert_eq!(sv.state_of(id), Some(&DAEMON_STOPPED));
    }

    #[test]
    fn test_start_while_waiting_for_stop_deps_returns_to_running() {
        let (mut sv, _) = supervisor();
        let (id, _) = running(&mut sv, "svc", |_| {});
        sv.request_state(id, &DAEMON_WAITING_FOR_STOP_DEP);
        sv.start_service(id).unwrap();
        assert_eq!(sv.state_of(id), Some(&DAEMON_RUNNING));
    }

    #[test]
    fn test_stop_while_waiting_for_start_deps_goes_straight_down() {
        let (mut sv, _) = supervisor();
        let id = sv.admit(Service::new("svc").with_type(&DAEMON_TYPE)).unwrap();
        sv.request_state(id, &DAEMON_WAITING_FOR_START_DEP);
        sv.stop_service(id).unwrap();
        assert_eq!(sv.state_of(id), Some(&DAEMON_STOPPED));
    }

    #[test]
    fn test_missing_command_fails_launch() {
        let (mut sv, _) = supervisor();
        let id = sv.admit(Service::new("empty").with_type(&DAEMON_TYPE)).unwrap();
        sv.start_service(id).unwrap();
        sv.poll_once();
        assert_eq!(sv.state_of(id), Some(&DAEMON_FAIL_START_LAUNCH));
    }

    #[test]
    fn test_module_registers_type_and_kind() {
        let (sv, _) = supervisor();
        assert!(sv.registry().service_type("daemon").is_some());
        assert!(sv.registry().process_kind("daemon").is_some());
        assert!(sv.registry().state_by_name("DaemonRunning").is_some());
    }
}
