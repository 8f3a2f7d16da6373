use super::EventType;
use crate::process::ProcessKind;
use crate::registry::ServiceId;
use crate::supervisor::SystemState;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::any::Any;
use std::os::fd::RawFd;
use tracing::Level;

/// Data carried by an event. Hooks may write back into it (for example a
/// `PARSE` hook fills in the registered service).
#[derive(Debug)]
pub enum Payload {
    None,
    Service(ServiceId),
    Parse {
        name: String,
        service: Option<ServiceId>,
    },
    DependsOn {
        service: ServiceId,
        check: ServiceId,
    },
    Launch {
        service: ServiceId,
        kind: &'static ProcessKind,
        exec_name: String,
    },
    Process {
        service: ServiceId,
        pid: Pid,
    },
    Output {
        service: ServiceId,
        pid: Pid,
        line: String,
    },
    Signal(Signal),
    System {
        from: SystemState,
        to: SystemState,
    },
    Message {
        level: Level,
        message: String,
    },
    Fd(RawFd),
    Custom(Box<dyn Any>),
}

#[derive(Debug)]
pub struct Event {
    pub event_type: &'static EventType,
    pub payload: Payload,
}

impl Event {
    pub fn new(event_type: &'static EventType, payload: Payload) -> Self {
        Self {
            event_type,
            payload,
        }
    }

    /// The service this event is about, if any.
    pub fn service(&self) -> Option<ServiceId> {
        match &self.payload {
            Payload::Service(id)
            | Payload::DependsOn { service: id, .. }
            | Payload::Launch { service: id, .. }
            | Payload::Process { service: id, .. }
            | Payload::Output { service: id, .. } => Some(*id),
            Payload::Parse { service, .. } => *service,
            _ => None,
        }
    }
}
