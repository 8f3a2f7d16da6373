//! Signal intake.
//!
//! The handler only records the signal in a fixed set of atomic flags and
//! writes a byte to a wake-up pipe; the scheduler drains the set at the
//! start of each tick. These two statics are the only process-wide state.

use crate::error::Result;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{pipe2, read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

const SIGNAL_SLOTS: usize = 65;

#[allow(clippy::declare_interior_mutable_const)]
const CLEAR: AtomicBool = AtomicBool::new(false);

static PENDING: [AtomicBool; SIGNAL_SLOTS] = [CLEAR; SIGNAL_SLOTS];
static WAKEUP_FD: AtomicI32 = AtomicI32::new(-1);

/// Signals the supervisor takes over.
pub const HANDLED_SIGNALS: [Signal; 9] = [
    Signal::SIGCHLD,
    Signal::SIGALRM,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGPWR,
    Signal::SIGWINCH,
];

extern "C" fn on_signal(signo: libc::c_int) {
    if let Some(slot) = usize::try_from(signo).ok().and_then(|i| PENDING.get(i)) {
        slot.store(true, Ordering::SeqCst);
    }
    let fd = WAKEUP_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        // SAFETY: write(2) is async-signal-safe and the pipe is
        // non-blocking; a full pipe already guarantees a wake-up.
        unsafe {
            libc::write(fd, (&byte as *const u8).cast(), 1);
        }
    }
}

/// Read end of the wake-up pipe, polled by the scheduler.
pub struct SignalPipe {
    read: OwnedFd,
    _write: OwnedFd,
}

impl SignalPipe {
    pub fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Empties the pipe; the flags carry the information.
    pub fn drain(&self) {
        let mut scratch = [0u8; 64];
        while let Ok(n) = read(self.read.as_raw_fd(), &mut scratch) {
            if n == 0 {
                break;
            }
        }
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        let _ = WAKEUP_FD.compare_exchange(
            self._write.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Installs the handler for [`HANDLED_SIGNALS`] and returns the wake-up
/// pipe. Handlers restart interrupted system calls and stopped children do
/// not raise SIGCHLD.
pub fn install() -> Result<SignalPipe> {
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
    WAKEUP_FD.store(write_end.as_raw_fd(), Ordering::SeqCst);

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    for signal in HANDLED_SIGNALS {
        // SAFETY: the handler only touches atomics and calls write(2).
        unsafe { sigaction(signal, &action) }?;
    }
    tracing::debug!(signals = HANDLED_SIGNALS.len(), "Signal handlers installed");

    Ok(SignalPipe {
        read: read_end,
        _write: write_end,
    })
}

/// Marks a signal as pending without it being delivered.
pub fn mark_pending(signal: Signal) {
    if let Some(slot) = PENDING.get(signal as usize) {
        slot.store(true, Ordering::SeqCst);
    }
}

/// Takes and clears every pending signal, in signal-number order.
pub fn take_pending() -> Vec<Signal> {
    PENDING
        .iter()
        .enumerate()
        .filter(|(_, flag)| flag.swap(false, Ordering::SeqCst))
        .filter_map(|(signo, _)| Signal::try_from(signo as i32).ok())
        .collect()
}
