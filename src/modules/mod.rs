//! Built-in extension modules.
//!
//! | module     | provides                                        | requires |
//! |------------|-------------------------------------------------|----------|
//! | `exec`     | session setup after fork, command launch        |          |
//! | `config`   | service definitions from the YAML configuration |          |
//! | `daemon`   | the `daemon` service type                       | `exec`   |
//! | `oneshot`  | the `service` service type                      | `exec`   |
//! | `runlevel` | the `runlevel` and `virtual` service types      |          |
//! | `power`    | shutdown, reboot and hot reload on signals      |          |

mod common;
pub mod daemon;
pub mod exec;
pub mod oneshot;
pub mod power;
pub mod runlevel;
pub mod source;

use crate::config::Config;
use crate::module::Module;

/// Service type names the built-in modules register.
pub const BUILTIN_SERVICE_TYPES: &[&str] = &["daemon", "service", "runlevel", "virtual"];

/// The built-in modules, with the service source fed from `config`.
pub fn builtin(config: Config) -> Vec<Box<dyn Module>> {
    vec![
        Box::new(source::ConfigSource::new(config.services)),
        Box::new(exec::ExecModule),
        Box::new(daemon::DaemonModule),
        Box::new(oneshot::OneshotModule),
        Box::new(runlevel::RunlevelModule),
        Box::new(power::PowerModule),
    ]
}
