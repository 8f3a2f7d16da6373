use super::ServiceId;

/// Re-entrancy counter that defers state commits.
///
/// While the counter is above zero, requested transitions are only recorded;
/// the release that brings it back to zero commits them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LockCounter(u32);

impl LockCounter {
    pub fn acquire(&mut self) {
        self.0 += 1;
    }

    /// Returns true when this release brought the counter to zero.
    pub fn release(&mut self) -> bool {
        match self.0 {
            0 => {
                tracing::warn!("State lock released more often than acquired");
                false
            }
            n => {
                self.0 = n - 1;
                self.0 == 0
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.0 > 0
    }

    pub fn depth(&self) -> u32 {
        self.0
    }
}

/// Proof that a service's state lock is held.
///
/// Returned by `lock_state` and consumed by `unlock_state`; it cannot be
/// cloned, so every acquisition is released exactly once.
#[must_use = "a StateLock must be handed back to unlock_state, or the service never commits"]
#[derive(Debug, PartialEq, Eq)]
pub struct StateLock {
    service: ServiceId,
}

impl StateLock {
    pub(crate) fn new(service: ServiceId) -> Self {
        Self { service }
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }
}
