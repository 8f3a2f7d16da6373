//! Dependency polling shared by the service types.

use crate::dependency::DepStatus;
use crate::registry::{ServiceId, StateDef};
use crate::supervisor::Supervisor;
use tracing::Level;

/// Whether the service still sits in `state` with nothing else pending.
pub(crate) fn still_in(sv: &Supervisor, id: ServiceId, state: &'static StateDef) -> bool {
    sv.service(id)
        .is_some_and(|s| s.current() == state && s.next().is_none())
}

/// Moves a service waiting in `waiting` on to `ready` once its start
/// dependencies are met, or to `failed` when they never will be.
pub(crate) fn advance_start(
    sv: &mut Supervisor,
    id: ServiceId,
    waiting: &'static StateDef,
    ready: &'static StateDef,
    failed: &'static StateDef,
) {
    match sv.start_dependencies(id) {
        DepStatus::Ready => {
            if still_in(sv, id, waiting) {
                sv.request_state(id, ready);
            }
        }
        DepStatus::PermanentFailure => {
            // start_dependencies may already have moved the service on.
            if still_in(sv, id, waiting) {
                if let Some(name) = sv.service(id).map(|s| s.name().to_string()) {
                    sv.report(
                        Level::WARN,
                        format!("{} cannot start: a dependency has failed", name),
                    );
                }
                sv.request_state(id, failed);
            }
        }
        DepStatus::NotYet => {}
    }
}

/// Moves a service waiting in `waiting` on to `ready` once nothing active
/// depends on it any more.
pub(crate) fn advance_stop(
    sv: &mut Supervisor,
    id: ServiceId,
    waiting: &'static StateDef,
    ready: &'static StateDef,
) {
    if sv.stop_dependencies_check(id, false) == DepStatus::Ready && still_in(sv, id, waiting) {
        sv.request_state(id, ready);
    }
}

/// Registers a list of states, skipping (and reporting) ones already taken.
pub(crate) fn register_states(
    sv: &mut Supervisor,
    states: &[&'static StateDef],
) -> crate::error::Result<()> {
    sv.registry_mut().register_states(states)
}

pub(crate) fn unregister_states(sv: &mut Supervisor, states: &[&'static StateDef]) {
    for state in states {
        sv.registry_mut().unregister_state(state);
    }
}
