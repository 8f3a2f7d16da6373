use super::{ExitStatus, ProcessKind, ProcessRecord};
use crate::error::{validate_pid, Error, Result};
use crate::event::{Event, HookResult, Payload, BUFFERED_OUTPUT, HANDLE_KILLED};
use crate::registry::ServiceId;
use crate::supervisor::Supervisor;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

impl Supervisor {
    /// Collects every child that has exited, without blocking.
    pub fn reap_children(&mut self) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(status) => {
                    if let Some((pid, exit)) = ExitStatus::from_wait(status) {
                        self.reap(pid, exit);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    tracing::warn!(%errno, "waitpid failed");
                    break;
                }
            }
        }
    }

    /// Handles the exit of `pid`: records the status, drains what is left
    /// in its pipes, lets `HANDLE_KILLED` hooks or the kind's handler react
    /// and finally frees the record.
    pub fn reap(&mut self, pid: Pid, status: ExitStatus) {
        let Some(id) = self.registry.find_by_pid(pid) else {
            tracing::debug!(pid = pid.as_raw(), %status, "Reaped a child no service owns");
            return;
        };
        let Some(service) = self.registry.get_mut(id) else {
            return;
        };
        let name = service.name().to_string();
        let Some(record) = service.process_mut(pid) else {
            return;
        };
        record.set_exit_status(status);
        let kind = record.kind();

        self.drain_process(id, pid);
        tracing::debug!(service = %name, kind = kind.name, pid = pid.as_raw(), %status, "Process exited");

        let answer = self.emit(&HANDLE_KILLED, Payload::Process { service: id, pid });
        if answer != HookResult::Handled {
            if let Some(on_killed) = kind.on_killed {
                on_killed(self, id, pid);
            }
        }
        self.free_process(id, pid);
    }

    /// Reads whatever is available on one pipe of a process and passes the
    /// complete lines on.
    pub(crate) fn drain_output(&mut self, id: ServiceId, pid: Pid, pipe: usize) {
        self.drain_pipe(id, pid, pipe, false);
    }

    /// Drains every pipe of an exited process, including unterminated
    /// trailing output.
    fn drain_process(&mut self, id: ServiceId, pid: Pid) {
        let pipes = self
            .registry
            .get(id)
            .and_then(|s| s.process(pid))
            .map_or(0, |p| p.pipes().len());
        for index in 0..pipes {
            self.drain_pipe(id, pid, index, true);
        }
    }

    fn drain_pipe(&mut self, id: ServiceId, pid: Pid, index: usize, flush: bool) {
        let Some(service) = self.registry.get_mut(id) else {
            return;
        };
        let name = service.name().to_string();
        let Some(pipe) = service
            .process_mut(pid)
            .and_then(|record| record.pipes_mut().get_mut(index))
        else {
            return;
        };
        if !pipe.is_readable() {
            return;
        }

        let outcome = pipe.read_available();
        let Some(buffer) = pipe.buffer_mut() else {
            return;
        };
        let mut lines = buffer.take_lines();
        if flush || outcome.eof {
            lines.extend(buffer.take_rest());
        }
        if outcome.discarded > 0 {
            if buffer.compactions() == 1 {
                tracing::warn!(
                    service = %name,
                    discarded = outcome.discarded,
                    "Output without line breaks exceeded the buffer, dropping the oldest bytes"
                );
            } else {
                tracing::debug!(service = %name, discarded = outcome.discarded, "Output buffer compacted");
            }
        }

        for line in lines {
            self.deliver_line(id, pid, &name, line);
        }
    }

    fn deliver_line(&mut self, id: ServiceId, pid: Pid, name: &str, line: String) {
        let mut event = Event::new(
            &BUFFERED_OUTPUT,
            Payload::Output {
                service: id,
                pid,
                line,
            },
        );
        if self.dispatch(&mut event) == HookResult::Handled {
            return;
        }
        if let Payload::Output { line, .. } = event.payload {
            tracing::info!(target: "svsd::output", service = %name, pid = pid.as_raw(), "{}", line);
        }
    }

    /// Marks a process record free and closes its pipes. The record itself
    /// is dropped at the next reclaim pass.
    pub fn free_process(&mut self, id: ServiceId, pid: Pid) -> bool {
        match self.registry.get_mut(id).and_then(|s| s.process_mut(pid)) {
            Some(record) => {
                record.mark_free();
                true
            }
            None => false,
        }
    }

    /// Adopts a process that is already running, such as a daemon carried
    /// over a hot reload.
    pub fn attach_process(
        &mut self,
        id: ServiceId,
        kind: &'static ProcessKind,
        pid: Pid,
    ) -> Result<()> {
        let now = self.now;
        let service = self
            .registry
            .get_mut(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
        if service.process_of_kind(kind).is_some() {
            return Err(Error::ProcessExists {
                service: service.name().to_string(),
                kind: kind.name.to_string(),
            });
        }
        service.attach(ProcessRecord::adopted(kind, pid, now));
        Ok(())
    }

    /// Sends `signal` to the live process of `kind`. Returns false when
    /// there is none; a process that turns out to be gone is freed.
    pub fn signal_process(
        &mut self,
        id: ServiceId,
        kind: &'static ProcessKind,
        signal: Signal,
    ) -> Result<bool> {
        let Some(service) = self.registry.get(id) else {
            return Ok(false);
        };
        let Some(raw) = service.process_of_kind(kind).and_then(|p| p.pid()) else {
            return Ok(false);
        };
        let name = service.name().to_string();
        let pid = validate_pid(raw.as_raw(), &name)?;

        match kill(pid, signal) {
            Ok(()) => {
                tracing::debug!(service = %name, pid = pid.as_raw(), %signal, "Signal sent");
                Ok(true)
            }
            Err(Errno::ESRCH) => {
                self.free_process(id, pid);
                Ok(false)
            }
            Err(errno) => Err(errno.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::Service;
    use std::cell::RefCell;
    use std::rc::Rc;

    static WORKER: ProcessKind = ProcessKind::new("worker");

    fn record_kill(_: &mut Supervisor, _: ServiceId, pid: Pid) {
        KILLED.with(|k| k.borrow_mut().push(pid));
    }

    static WATCHED: ProcessKind = ProcessKind::new("watched").on_killed(record_kill);

    thread_local! {
        static KILLED: RefCell<Vec<Pid>> = const { RefCell::new(Vec::new()) };
    }

    #[test]
    fn test_attach_then_reap_runs_kind_handler_and_frees() {
        let mut sv = Supervisor::new(Settings::default());
        let id = sv.admit(Service::new("svc")).unwrap();
        let pid = Pid::from_raw(999_999);
        sv.attach_process(id, &WATCHED, pid).unwrap();
        assert!(sv.attach_process(id, &WATCHED, pid).is_err());

        KILLED.with(|k| k.borrow_mut().clear());
        sv.reap(pid, ExitStatus::Exited(3));

        assert_eq!(KILLED.with(|k| k.borrow().clone()), vec![pid]);
        let service = sv.service(id).unwrap();
        assert!(service.process(pid).is_none());
        assert!(!service.has_live_processes());
    }

    #[test]
    fn test_handle_killed_hook_replaces_kind_handler() {
        let mut sv = Supervisor::new(Settings::default());
        let id = sv.admit(Service::new("svc")).unwrap();
        let pid = Pid::from_raw(999_998);
        sv.attach_process(id, &WATCHED, pid).unwrap();

        let statuses = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&statuses);
        sv.events()
            .register_hook(&HANDLE_KILLED, "test", move |sv, event| {
                if let Payload::Process { service, pid } = event.payload {
                    let status = sv
                        .service(service)
                        .and_then(|s| s.process(pid))
                        .and_then(|p| p.exit_status());
                    sink.borrow_mut().push(status);
                }
                HookResult::Handled
            })
            .unwrap();

        KILLED.with(|k| k.borrow_mut().clear());
        sv.reap(pid, ExitStatus::Signaled(9));
        assert_eq!(*statuses.borrow(), vec![Some(ExitStatus::Signaled(9))]);
        assert!(KILLED.with(|k| k.borrow().is_empty()));
    }

    #[test]
    fn test_reap_of_unknown_pid_is_ignored() {
        let mut sv = Supervisor::new(Settings::default());
        sv.reap(Pid::from_raw(999_997), ExitStatus::Exited(0));
    }

    #[test]
    fn test_signal_process_without_process() {
        let mut sv = Supervisor::new(Settings::default());
        let id = sv.admit(Service::new("svc")).unwrap();
        assert!(!sv.signal_process(id, &WORKER, Signal::SIGTERM).unwrap());
    }

    #[test]
    fn test_signal_process_refuses_init() {
        let mut sv = Supervisor::new(Settings::default());
        let id = sv.admit(Service::new("svc")).unwrap();
        sv.attach_process(id, &WORKER, Pid::from_raw(1)).unwrap();
        assert!(matches!(
            sv.signal_process(id, &WORKER, Signal::SIGTERM),
            Err(Error::InvalidPid { pid: 1, .. })
        ));
    }
}
