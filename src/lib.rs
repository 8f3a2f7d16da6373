#![allow(unused_assignments)]

//! # Service Supervisor
//!
//! A process-1 service supervisor: it starts system services in dependency
//! order, keeps them running and brings them down in reverse order on
//! shutdown.
//!
//! ## Features
//!
//! - **State Machines**: Every service moves through detailed, typed states
//!   grouped into rough classes (up, down, starting, stopping, ...)
//! - **Dependencies**: `require`, `need` and `use` edges with `$SERVICE`,
//!   `$NAME` and `$CLASS` templates, cycle refusal and dependent cascades
//! - **Extension Bus**: Service types, process launching, parsing and signal
//!   handling are hooks on named events, contributed by modules
//! - **Process Supervision**: Fork/exec with captured output, reaping, and
//!   SIGTERM/SIGKILL escalation
//! - **Hot Reload**: The running state is written to disk and restored by a
//!   freshly executed supervisor without touching the services
//!
//! ## Quick Start
//!
//! ```no_run
//! use service_supervisor::supervisor::{BootOptions, Supervisor};
//! use service_supervisor::Parser;
//!
//! # fn example() -> Result<(), service_supervisor::Error> {
//! let config = Parser::new().load_config("/etc/svsd/supervisor.yaml")?;
//! let mut sv = Supervisor::builder()
//!     .config(config)
//!     .builtin_modules(true)
//!     .build()?;
//! sv.install_signal_handlers()?;
//! sv.boot(&BootOptions::parse(std::env::args().skip(1)))?;
//! let outcome = sv.run();
//! println!("system is going to {}", outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! The supervisor is single-threaded. All state lives in one
//! [`Supervisor`](supervisor::Supervisor) value that every operation and
//! hook receives by `&mut`. Signal handlers only set a flag and write to a
//! wake-up pipe; the scheduler loop picks the signals up on its next pass.

pub mod config;
pub mod dependency;
pub mod error;
pub mod event;
pub mod module;
pub mod modules;
pub mod process;
pub mod registry;
pub mod snapshot;
pub mod supervisor;

// Re-export commonly used types
pub use config::{Config, Parser, Settings};
pub use error::{Error, Result};
pub use snapshot::Snapshot;
pub use supervisor::{BootOptions, Supervisor, SystemState};
