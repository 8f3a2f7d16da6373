//! Process and pipe supervision.
//!
//! A service owns its [`ProcessRecord`]s; each record owns its [`Pipe`]s.
//! Dead processes are only marked free and dropped at the next reclaim pass,
//! so handles taken earlier in a scheduler pass stay meaningful.

mod buffer;
mod env;
mod pipe;
mod reap;
mod spawn;

pub use buffer::*;
pub use pipe::*;

use crate::registry::ServiceId;
use crate::supervisor::Supervisor;
use chrono::{DateTime, TimeDelta, Utc};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default handler run when a process of a kind exits and no
/// `HANDLE_KILLED` hook took care of it.
pub type KilledHandler = fn(&mut Supervisor, ServiceId, Pid);

/// A role a process plays for its service ("daemon", "start", "stop").
///
/// The name doubles as the executable-name hint handed to `LAUNCH`.
pub struct ProcessKind {
    pub name: &'static str,
    pub on_killed: Option<KilledHandler>,
}

impl ProcessKind {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            on_killed: None,
        }
    }

    pub const fn on_killed(mut self, handler: KilledHandler) -> Self {
        self.on_killed = Some(handler);
        self
    }
}

impl PartialEq for ProcessKind {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for ProcessKind {}

impl fmt::Debug for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProcessKind").field(&self.name).finish()
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Exited(i32),
    /// Raw signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Converts a `waitpid` result. Stop/continue notifications are not
    /// exits and yield `None`.
    pub fn from_wait(status: WaitStatus) -> Option<(Pid, ExitStatus)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, ExitStatus::Exited(code))),
            WaitStatus::Signaled(pid, signal, _) => {
                Some((pid, ExitStatus::Signaled(signal as i32)))
            }
            _ => None,
        }
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(code),
            ExitStatus::Signaled(_) => None,
        }
    }

    pub fn signal(self) -> Option<Signal> {
        match self {
            ExitStatus::Signaled(raw) => Signal::try_from(raw).ok(),
            ExitStatus::Exited(_) => None,
        }
    }

    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.signal()) {
            (ExitStatus::Exited(code), _) => write!(f, "exit code {}", code),
            (ExitStatus::Signaled(_), Some(signal)) => write!(f, "killed by {}", signal),
            (ExitStatus::Signaled(raw), None) => write!(f, "killed by signal {}", raw),
        }
    }
}

/// A process attached to a service.
#[derive(Debug)]
pub struct ProcessRecord {
    kind: &'static ProcessKind,
    pid: Option<Pid>,
    started: DateTime<Utc>,
    exit_status: Option<ExitStatus>,
    pipes: Vec<Pipe>,
    free: bool,
}

impl ProcessRecord {
    /// A record about to be forked; the pid is filled in by the parent.
    pub(crate) fn new(kind: &'static ProcessKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            pid: None,
            started: now,
            exit_status: None,
            pipes: Vec::new(),
            free: false,
        }
    }

    /// A record for a process that already runs (adopted across a hot
    /// reload, or found through a pid file).
    pub fn adopted(kind: &'static ProcessKind, pid: Pid, now: DateTime<Utc>) -> Self {
        Self {
            pid: Some(pid),
            ..Self::new(kind, now)
        }
    }

    pub fn kind(&self) -> &'static ProcessKind {
        self.kind
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    pub fn pipes_mut(&mut self) -> &mut [Pipe] {
        &mut self.pipes
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub(crate) fn add_pipe(&mut self, pipe: Pipe) {
        self.pipes.push(pipe);
    }

    pub(crate) fn set_pid(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    pub(crate) fn set_exit_status(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
    }

    /// Marks the record for reclamation and closes its descriptors.
    pub(crate) fn mark_free(&mut self) {
        self.free = true;
        for pipe in &mut self.pipes {
            pipe.close();
        }
    }

    pub(crate) fn shift_timestamps(&mut self, delta: TimeDelta) {
        self.started += delta;
    }
}
