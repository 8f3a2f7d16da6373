//! Dependency resolution.
//!
//! - `template` - `$NAME`/`$SERVICE`/`$CLASS` expansion of dependency targets
//! - `resolver` - runtime queries over live services (`depends_on`,
//!   `start_dependencies`, stop checks and cascades)
//! - `graph` - static graph over configuration, used for validation

mod graph;
mod resolver;
mod template;

pub use graph::*;
pub use resolver::*;
pub use template::*;
