use super::ServiceId;
use crate::error::Result;
use crate::supervisor::Supervisor;
use std::fmt;

pub type ServiceAction = fn(&mut Supervisor, ServiceId) -> Result<()>;

/// Polymorphic behaviour of a service: how it starts, stops and restarts.
pub struct ServiceType {
    pub name: &'static str,
    pub description: &'static str,
    pub start: ServiceAction,
    pub stop: ServiceAction,
    /// When absent, a restart is a stop followed by a start once the
    /// service is down.
    pub restart: Option<ServiceAction>,
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for ServiceType {}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceType").field(&self.name).finish()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
