//! Configuration parsing and types.
//!
//! The configuration file is a YAML document with two sections:
//!
//! - `settings` - supervisor-wide knobs ([`Settings`])
//! - `services` - service definitions keyed by name ([`ServiceDefinition`])
//!
//! Submodules:
//!
//! - `types` - root [`Config`] structure
//! - `settings` - [`Settings`] and [`ShutdownAction`]
//! - `service` - [`ServiceDefinition`] and its conversion into a registry record
//! - `duration` - `"30s"`/`"1m"`/`"500ms"` duration strings
//! - `parser` - YAML loading
//! - `validation` - static checks run before boot and by `svsd --check`

mod duration;
mod parser;
mod service;
mod settings;
mod types;
mod validation;

pub use duration::*;
pub use parser::*;
pub use service::*;
pub use settings::*;
pub use types::*;
