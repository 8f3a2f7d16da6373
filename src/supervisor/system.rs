use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole-system lifecycle.
///
/// `Starting` and `Up` accept service starts. The last five are terminal:
/// the scheduler loop returns and the binary carries out the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Starting,
    Up,
    Stopping,
    AllServicesExited,
    Reboot,
    Halt,
    Poweroff,
    /// Re-execute the supervisor binary from scratch.
    Restart,
    /// Re-execute with a state snapshot (hot reload).
    Execve,
    Exit,
}

impl SystemState {
    pub fn accepts_starts(self) -> bool {
        matches!(self, SystemState::Starting | SystemState::Up)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SystemState::Reboot
                | SystemState::Halt
                | SystemState::Poweroff
                | SystemState::Restart
                | SystemState::Execve
                | SystemState::Exit
        )
    }

    pub fn is_going_down(self) -> bool {
        matches!(self, SystemState::Stopping | SystemState::AllServicesExited)
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemState::Starting => "starting",
            SystemState::Up => "up",
            SystemState::Stopping => "stopping",
            SystemState::AllServicesExited => "all services exited",
            SystemState::Reboot => "reboot",
            SystemState::Halt => "halt",
            SystemState::Poweroff => "poweroff",
            SystemState::Restart => "restart",
            SystemState::Execve => "execve",
            SystemState::Exit => "exit",
        };
        f.write_str(name)
    }
}
