//! The supervisor context object and its scheduler.
//!
//! [`Supervisor`] owns everything: the service registry, the event bus, the
//! loaded modules, the clock and the system state. Operations are grouped
//! by concern across the submodules, each adding an `impl Supervisor` block:
//!
//! - `core` - construction, accessors, state requests and locks, diagnostics
//! - `builder` - [`SupervisorBuilder`]
//! - `lifecycle` - load/admit/start/stop/restart/reset, shutdown
//! - `interrupt` - changed-list processing and per-state handlers
//! - `alarms` - per-service alarms and clock-jump compensation
//! - `clock` - [`Clock`], [`SystemClock`], [`ManualClock`]
//! - `signals` - async-signal-safe pending set and wake-up pipe
//! - `main_loop` - `tick`, `poll_once`, `run`
//! - `boot` - [`BootOptions`] and the boot sequence
//! - `system` - [`SystemState`]

mod alarms;
mod boot;
mod builder;
mod clock;
mod core;
mod interrupt;
mod lifecycle;
mod main_loop;
pub mod signals;
mod system;

pub use boot::BootOptions;
pub use builder::SupervisorBuilder;
pub use clock::{Clock, ClockHandle, ManualClock, SystemClock};
pub use self::core::Supervisor;
pub use main_loop::MAX_INTERRUPT_ROUNDS;
pub use system::SystemState;
