use super::{signals, Supervisor, SystemState};
use crate::event::{HookResult, Payload, FD_READY, MAIN, SIGNAL};
use crate::registry::ServiceId;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;
use tracing::Level;

/// How many rounds of state interrupt handlers run per tick before the
/// rest is deferred to the next tick.
pub const MAX_INTERRUPT_ROUNDS: usize = 100;

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Signal,
    Output {
        service: ServiceId,
        pid: Pid,
        pipe: usize,
    },
    Watch(RawFd),
}

impl Supervisor {
    /// Runs the scheduler until the system reaches a terminal state and
    /// returns that state.
    pub fn run(&mut self) -> SystemState {
        while !self.system_state.is_terminal() {
            self.tick();
        }
        tracing::info!(state = %self.system_state, "Scheduler stopped");
        self.system_state
    }

    /// One scheduler pass, then sleep until something is due or a
    /// descriptor becomes ready.
    pub fn tick(&mut self) {
        self.run_pass();
        if self.system_state.is_terminal() {
            return;
        }
        let timeout = self.sleep_timeout();
        self.wait_for_events(timeout);
    }

    /// One scheduler pass, then handle whatever is ready without sleeping.
    pub fn poll_once(&mut self) {
        self.run_pass();
        if !self.system_state.is_terminal() {
            self.wait_for_events(Duration::ZERO);
        }
    }

    fn run_pass(&mut self) {
        self.refresh_clock();
        self.process_alarms();
        self.process_signals();
        self.unload_marked_modules();
        if self.emit(&MAIN, Payload::None) == HookResult::Fail {
            self.report(Level::WARN, "A main loop hook failed");
        }
        self.check_keep_running();
        if self.system_state.is_terminal() {
            return;
        }
        self.collect_garbage();
        self.process_interrupts();
    }

    /// Reclaims free process records and frees services that have been down
    /// for longer than the grace period.
    fn collect_garbage(&mut self) {
        let reclaimed = self.registry.reclaim_processes();
        if reclaimed > 0 {
            tracing::trace!(reclaimed, "Reclaimed process records");
        }
        let grace = self.settings.down_grace();
        for name in self.registry.clean_down(self.now, grace) {
            tracing::debug!(service = %name, "Service record freed");
        }
    }

    /// Notifies committed changes, then runs state interrupt handlers until
    /// no handler causes a further change.
    fn process_interrupts(&mut self) {
        self.process_changes();
        for _ in 0..MAX_INTERRUPT_ROUNDS {
            self.run_state_handlers();
            if !self.registry.has_changes() {
                return;
            }
            self.process_changes();
        }
        self.report(
            Level::WARN,
            "State handlers are still changing services, continuing next tick",
        );
    }

    pub(crate) fn process_signals(&mut self) {
        for signal in signals::take_pending() {
            match signal {
                Signal::SIGCHLD => self.reap_children(),
                Signal::SIGALRM => self.process_alarms(),
                _ => {}
            }
            match self.emit(&SIGNAL, Payload::Signal(signal)) {
                HookResult::Fail => {
                    self.report(Level::WARN, format!("Handling of {} failed", signal))
                }
                HookResult::NotApplicable if signal != Signal::SIGCHLD => {
                    tracing::debug!(%signal, "Signal not handled by any module")
                }
                _ => {}
            }
        }
    }

    fn sleep_timeout(&self) -> Duration {
        if self.registry.has_changes() || self.shutdown_pending() {
            return Duration::ZERO;
        }
        let ceiling = self.settings.tick_ceiling();
        match self.next_alarm {
            Some(deadline) => deadline
                .signed_duration_since(self.now)
                .to_std()
                .map_or(Duration::ZERO, |until| until.min(ceiling)),
            None => ceiling,
        }
    }

    /// Whether the next pass moves the system closer to its shutdown action
    /// without waiting for anything.
    fn shutdown_pending(&self) -> bool {
        self.system_state == SystemState::AllServicesExited
            || self
                .registry
                .count_where(|s| s.rough().keeps_running())
                == 0
    }

    /// Waits on the signal pipe, every readable process pipe and every
    /// watched descriptor, then services the ready ones.
    fn wait_for_events(&mut self, timeout: Duration) {
        let mut sources: Vec<(Readiness, RawFd)> = Vec::new();
        if let Some(pipe) = &self.signal_pipe {
            sources.push((Readiness::Signal, pipe.fd()));
        }
        for (service, record) in self.registry.iter() {
            for process in record.processes().iter().filter(|p| !p.is_free()) {
                let Some(pid) = process.pid() else { continue };
                for (index, pipe) in process.pipes().iter().enumerate() {
                    if let (true, Some(fd)) = (pipe.is_readable(), pipe.parent_fd()) {
                        sources.push((
                            Readiness::Output {
                                service,
                                pid,
                                pipe: index,
                            },
                            fd,
                        ));
                    }
                }
            }
        }
        for watch in &self.watched {
            sources.push((Readiness::Watch(watch.fd), watch.fd));
        }

        if sources.is_empty() {
            if !timeout.is_zero() {
                std::thread::sleep(timeout);
            }
            return;
        }

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let ready: Vec<Readiness> = {
            let mut fds: Vec<PollFd> = sources
                .iter()
                .map(|(_, fd)| {
                    // SAFETY: every descriptor is owned by a pipe, a process
                    // record or an extension that outlives this call; nothing
                    // is closed until poll returns.
                    let fd = unsafe { BorrowedFd::borrow_raw(*fd) };
                    PollFd::new(fd, PollFlags::POLLIN)
                })
                .collect();
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) | Err(Errno::EINTR) => return,
                Ok(_) => {}
                Err(errno) => {
                    tracing::warn!(%errno, "poll failed");
                    return;
                }
            }
            let wanted = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
            fds.iter()
                .zip(&sources)
                .filter(|(fd, _)| fd.revents().is_some_and(|r| r.intersects(wanted)))
                .map(|(_, (source, _))| *source)
                .collect()
        };

        for source in ready {
            match source {
                Readiness::Signal => {
                    if let Some(pipe) = &self.signal_pipe {
                        pipe.drain();
                    }
                }
                Readiness::Output { service, pid, pipe } => {
                    self.drain_output(service, pid, pipe);
                }
                Readiness::Watch(fd) => {
                    if self.emit(&FD_READY, Payload::Fd(fd)) == HookResult::Fail {
                        self.report(Level::WARN, format!("Handling readiness of fd {} failed", fd));
                    }
                }
            }
        }
    }

    /// Installs the signal handlers and starts polling the wake-up pipe.
    pub fn install_signal_handlers(&mut self) -> crate::error::Result<()> {
        self.signal_pipe = Some(signals::install()?);
        Ok(())
    }
}
