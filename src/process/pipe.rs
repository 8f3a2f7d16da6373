use super::buffer::OutputBuffer;
use crate::error::Result;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::stat::{fstat, SFlag};
use nix::unistd::{dup2, pipe2, read};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

/// Which way data flows between the supervisor and the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// The supervisor writes, the child reads (e.g. stdin).
    ParentWrites,
    /// The child writes, the supervisor reads (stdout/stderr).
    ParentReads,
    /// A socket pair both sides can read and write.
    Bidirectional,
}

/// Outcome of draining a pipe's parent end.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub read: usize,
    pub discarded: usize,
    pub eof: bool,
}

/// A descriptor pair connecting the supervisor to a child.
///
/// The child end is duplicated onto every descriptor in `targets` after
/// fork; the parent keeps the other end.
#[derive(Debug)]
pub struct Pipe {
    direction: PipeDirection,
    targets: Vec<RawFd>,
    parent_end: Option<OwnedFd>,
    child_end: Option<OwnedFd>,
    buffer: Option<OutputBuffer>,
}

impl Pipe {
    pub fn new(direction: PipeDirection, targets: &[RawFd]) -> Self {
        Self {
            direction,
            targets: targets.to_vec(),
            parent_end: None,
            child_end: None,
            buffer: None,
        }
    }

    /// A child-to-parent pipe whose output is collected into an
    /// [`OutputBuffer`].
    pub fn buffered_output(targets: &[RawFd]) -> Self {
        Self {
            buffer: Some(OutputBuffer::new()),
            ..Self::new(PipeDirection::ParentReads, targets)
        }
    }

    pub fn direction(&self) -> PipeDirection {
        self.direction
    }

    pub fn targets(&self) -> &[RawFd] {
        &self.targets
    }

    pub fn parent_fd(&self) -> Option<RawFd> {
        self.parent_end.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_open(&self) -> bool {
        self.parent_end.is_some()
    }

    /// Whether the supervisor reads from this pipe.
    pub fn is_readable(&self) -> bool {
        self.direction != PipeDirection::ParentWrites
    }

    pub fn buffer(&self) -> Option<&OutputBuffer> {
        self.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut OutputBuffer> {
        self.buffer.as_mut()
    }

    /// Creates the OS-level descriptors. Both ends are close-on-exec; the
    /// child's copies on the target descriptors are not.
    pub(crate) fn open(&mut self) -> Result<()> {
        let (parent, child) = match self.direction {
            PipeDirection::ParentReads => {
                let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)?;
                (read_end, write_end)
            }
            PipeDirection::ParentWrites => {
                let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)?;
                (write_end, read_end)
            }
            PipeDirection::Bidirectional => socketpair(
                AddressFamily::Unix,
                SockType::Stream,
                None,
                SockFlag::SOCK_CLOEXEC,
            )?,
        };
        self.parent_end = Some(parent);
        self.child_end = Some(child);
        Ok(())
    }

    /// Child side of fork: puts the child end on every target descriptor
    /// and closes everything else.
    pub(crate) fn wire_child(&mut self) -> nix::Result<()> {
        self.parent_end = None;
        let Some(child) = self.child_end.take() else {
            return Ok(());
        };
        let raw = child.as_raw_fd();
        for &target in &self.targets {
            if raw == target {
                fcntl(raw, FcntlArg::F_SETFD(FdFlag::empty()))?;
            } else {
                dup2(raw, target)?;
            }
        }
        if self.targets.contains(&raw) {
            // Already sitting on a target descriptor; keep it open.
            let _ = child.into_raw_fd();
        }
        Ok(())
    }

    /// Parent side of fork: drops the child's end and makes ours
    /// non-blocking so draining never stalls the scheduler.
    pub(crate) fn finish_parent(&mut self) -> Result<()> {
        self.child_end = None;
        if let Some(parent) = &self.parent_end {
            let fd = parent.as_raw_fd();
            let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
            fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        }
        Ok(())
    }

    /// Lets the parent end survive `exec` and gives up ownership of it.
    /// Returns the descriptor, or `None` when the pipe is closed.
    pub(crate) fn hand_over(&mut self) -> nix::Result<Option<RawFd>> {
        let Some(parent) = self.parent_end.take() else {
            return Ok(None);
        };
        fcntl(parent.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))?;
        Ok(Some(parent.into_raw_fd()))
    }

    /// Takes over the parent end of a buffered output pipe inherited across
    /// `exec`. The descriptor must be an open pipe.
    pub(crate) fn adopt(fd: RawFd, targets: &[RawFd]) -> Result<Self> {
        let stat = fstat(fd)?;
        if SFlag::from_bits_truncate(stat.st_mode & SFlag::S_IFMT.bits()) != SFlag::S_IFIFO {
            return Err(nix::Error::EBADF.into());
        }
        // SAFETY: the descriptor is open and nothing else in this image
        // refers to it; it was only recorded in the hot reload snapshot.
        let parent = unsafe { OwnedFd::from_raw_fd(fd) };
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        let mut pipe = Self::buffered_output(targets);
        pipe.parent_end = Some(parent);
        pipe.finish_parent()?;
        Ok(pipe)
    }

    pub(crate) fn close(&mut self) {
        self.parent_end = None;
        self.child_end = None;
    }

    /// Reads everything currently available on the parent end into the
    /// buffer. End of file closes the parent end.
    pub(crate) fn read_available(&mut self) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let Some(fd) = self.parent_fd() else {
            outcome.eof = true;
            return outcome;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match read(fd, &mut chunk) {
                Ok(0) => {
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    outcome.read += n;
                    if let Some(buffer) = self.buffer.as_mut() {
                        outcome.discarded += buffer.append(&chunk[..n]);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => break,
                Err(errno) => {
                    tracing::debug!(fd, %errno, "Pipe read failed, closing");
                    outcome.eof = true;
                    break;
                }
            }
        }
        if outcome.eof {
            self.parent_end = None;
        }
        outcome
    }
}
