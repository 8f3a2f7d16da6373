use super::{Pipe, ProcessKind, ProcessRecord};
use crate::error::{Error, Result};
use crate::event::{Event, HookResult, Payload, AFTER_FORK, LAUNCH};
use crate::registry::ServiceId;
use crate::supervisor::Supervisor;
use nix::libc;
use nix::sys::signal::{sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{fork, getpid, ForkResult, Pid};

/// Exit code of a child that could not be set up or launched.
const EXIT_SETUP_FAILED: i32 = 126;
const EXIT_NOT_LAUNCHED: i32 = 127;

impl Supervisor {
    /// Forks a process of `kind` for a service.
    ///
    /// The child gets stdout and stderr connected to a buffered pipe, runs
    /// the `AFTER_FORK` hooks and then asks `LAUNCH` to replace it with the
    /// real program. A child nobody launched exits with 127.
    pub fn spawn(&mut self, id: ServiceId, kind: &'static ProcessKind) -> Result<Pid> {
        let now = self.now;
        let service = self
            .registry
            .get_mut(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
        let name = service.name().to_string();
        if service.process_of_kind(kind).is_some() {
            return Err(Error::ProcessExists {
                service: name,
                kind: kind.name.to_string(),
            });
        }

        let mut record = ProcessRecord::new(kind, now);
        let mut output = Pipe::buffered_output(&[1, 2]);
        output.open()?;
        record.add_pipe(output);
        service.attach(record);
        let index = service.processes().len() - 1;

        // SAFETY: the supervisor is single-threaded, so the child starts
        // with a consistent copy of every lock and allocator.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => self.run_child(id, kind, index),
            Ok(ForkResult::Parent { child }) => {
                if let Some(record) = self
                    .registry
                    .get_mut(id)
                    .and_then(|s| s.processes_mut().get_mut(index))
                {
                    record.set_pid(child);
                    for pipe in record.pipes_mut() {
                        if let Err(err) = pipe.finish_parent() {
                            tracing::warn!(service = %name, error = %err, "Could not prepare output pipe");
                        }
                    }
                }
                tracing::debug!(service = %name, kind = kind.name, pid = child.as_raw(), "Process spawned");
                Ok(child)
            }
            Err(errno) => {
                if let Some(service) = self.registry.get_mut(id) {
                    service.processes_mut().remove(index);
                }
                Err(Error::Spawn {
                    service: name,
                    kind: kind.name.to_string(),
                    reason: errno.to_string(),
                })
            }
        }
    }

    fn run_child(&mut self, id: ServiceId, kind: &'static ProcessKind, index: usize) -> ! {
        let wired = match self
            .registry
            .get_mut(id)
            .and_then(|s| s.processes_mut().get_mut(index))
        {
            Some(record) => record.pipes_mut().iter_mut().all(|pipe| pipe.wire_child().is_ok()),
            None => false,
        };
        if !wired || reset_signals().is_err() {
            exit_child(EXIT_SETUP_FAILED);
        }

        let pid = getpid();
        if self.emit(&AFTER_FORK, Payload::Process { service: id, pid }) == HookResult::Fail {
            exit_child(EXIT_SETUP_FAILED);
        }

        let mut launch = Event::new(
            &LAUNCH,
            Payload::Launch {
                service: id,
                kind,
                exec_name: kind.name.to_string(),
            },
        );
        match self.dispatch(&mut launch) {
            HookResult::Handled => exit_child(0),
            _ => exit_child(EXIT_NOT_LAUNCHED),
        }
    }
}

/// Gives the child default signal dispositions and an empty mask. The
/// supervisor ignores SIGPIPE and handles the signals it owns; neither may
/// leak into services.
fn reset_signals() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in Signal::iterator().filter(|s| !matches!(s, Signal::SIGKILL | Signal::SIGSTOP)) {
        // SAFETY: installing SIG_DFL runs no code in the child.
        unsafe { sigaction(signal, &default) }?;
    }
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
}

fn exit_child(code: i32) -> ! {
    // SAFETY: _exit skips atexit handlers and stdio flushing, which belong
    // to the parent.
    unsafe { libc::_exit(code) }
}
