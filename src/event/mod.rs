//! Event dispatch bus.
//!
//! Every optional behaviour in the supervisor is reached through a named
//! [`EventType`] with an ordered chain of hooks. Dispatch walks the chain in
//! registration order and folds the hook answers into one [`HookResult`]:
//!
//! - `Handled` or `Fail` stops the chain and is returned as-is
//! - `Ok` from any hook makes the overall answer `Ok` unless a later hook
//!   handles or fails
//! - otherwise the answer is `NotApplicable`
//!
//! Callers match on all four variants; `NotApplicable` usually means "fall
//! back to the built-in behaviour".

mod bus;
mod payload;
mod types;

pub use bus::*;
pub use payload::*;
pub use types::*;

/// Answer of a single hook, and of a whole dispatch.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookResult {
    /// The hook took care of the event; no further hooks run.
    Handled,
    /// The hook did something useful but others may still act.
    Ok,
    /// The event is not for this hook.
    NotApplicable,
    /// The hook vetoes the event; no further hooks run.
    Fail,
}

impl HookResult {
    /// Folds the next hook answer into the running result.
    ///
    /// Returns `None` once the chain must stop (the caller then returns
    /// `next`), or the accumulated result otherwise.
    pub fn fold(self, next: HookResult) -> Option<HookResult> {
        match next {
            HookResult::Handled | HookResult::Fail => None,
            HookResult::Ok => Some(HookResult::Ok),
            HookResult::NotApplicable => Some(self),
        }
    }

    pub fn is_handled(self) -> bool {
        self == HookResult::Handled
    }

    pub fn is_fail(self) -> bool {
        self == HookResult::Fail
    }
}

impl std::fmt::Display for HookResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookResult::Handled => write!(f, "handled"),
            HookResult::Ok => write!(f, "ok"),
            HookResult::NotApplicable => write!(f, "not applicable"),
            HookResult::Fail => write!(f, "fail"),
        }
    }
}
