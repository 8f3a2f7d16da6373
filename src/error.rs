// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(svsd::config::error),
        help("Validate the configuration with `svsd --check`")
    )]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("System call failed: {0}")]
    #[diagnostic(code(svsd::os::error))]
    Os(#[from] nix::Error),

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(svsd::service::not_found),
        help("Check the `services:` section of the configuration for a definition named '{0}'")
    )]
    ServiceNotFound(String),

    #[error("Service '{0}' already exists")]
    #[diagnostic(code(svsd::service::exists))]
    ServiceExists(String),

    #[error("Service '{0}' is blacklisted")]
    #[diagnostic(
        code(svsd::service::blacklisted),
        help("Remove '-{0}' from the boot arguments or the `blacklist` setting")
    )]
    Blacklisted(String),

    #[error("Service '{0}' has no service type")]
    #[diagnostic(code(svsd::service::untyped))]
    Untyped(String),

    #[error("Service '{0}' has failed and must be reset before it can start")]
    #[diagnostic(code(svsd::service::failed))]
    ServiceFailed(String),

    #[error("Refusing to start '{0}': the system is {1}")]
    #[diagnostic(code(svsd::system::not_accepting))]
    NotAcceptingStarts(String, String),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(svsd::dependency::circular),
        help("Services cannot depend on each other in a cycle. Review the require/need/use lists")
    )]
    CircularDependency(Vec<String>),

    #[error("State '{0}' is already registered")]
    #[diagnostic(code(svsd::state::duplicate))]
    DuplicateState(String),

    #[error("Service type '{0}' is already registered")]
    #[diagnostic(code(svsd::service_type::duplicate))]
    DuplicateServiceType(String),

    #[error("Process kind '{0}' is already registered")]
    #[diagnostic(code(svsd::process_kind::duplicate))]
    DuplicateProcessKind(String),

    #[error("Event type '{0}' is already registered")]
    #[diagnostic(code(svsd::event::duplicate))]
    DuplicateEventType(String),

    #[error("Event type '{0}' is not registered")]
    #[diagnostic(code(svsd::event::unknown))]
    UnknownEventType(String),

    #[error("Service '{service}' already has a '{kind}' process")]
    #[diagnostic(code(svsd::process::exists))]
    ProcessExists { service: String, kind: String },

    #[error("Failed to spawn '{kind}' process for '{service}': {reason}")]
    #[diagnostic(code(svsd::process::spawn))]
    Spawn {
        service: String,
        kind: String,
        reason: String,
    },

    #[error("Module '{module}' refused: {reason}")]
    #[diagnostic(code(svsd::module::refused))]
    Module { module: String, reason: String },

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: i32, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ServiceNotFound(name) => Some(format!(
                "Add a definition for '{}' under `services:` or fix the dependency name",
                name
            )),
            Error::ServiceFailed(name) => Some(format!(
                "Reset '{}' before starting it again; it stays failed until then",
                name
            )),
            Error::CircularDependency(path) => Some(format!(
                "Break the cycle by turning one of these into a `use` dependency: {}",
                path.join(", ")
            )),
            Error::Config(_) | Error::Yaml(_) => {
                Some("Validate the configuration with: svsd --check".to_string())
            }
            Error::Module { module, .. } => Some(format!(
                "Check that every module '{}' depends on is loaded and not blacklisted",
                module
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates a raw pid before it is used as a signal target.
/// Returns Err for pid 0 and negatives (process groups), pid 1 (ourselves when
/// running as init) and our own pid.
pub fn validate_pid(pid: i32, service_name: &str) -> Result<nix::unistd::Pid> {
    if pid <= 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "pid {} for service '{}' would address a process group, not a process",
                pid, service_name
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "refusing to signal pid 1 (init) on behalf of service '{}'",
                service_name
            ),
        });
    }
    let pid = nix::unistd::Pid::from_raw(pid);
    if pid == nix::unistd::getpid() {
        return Err(Error::InvalidPid {
            pid: pid.as_raw(),
            reason: format!(
                "refusing to signal the supervisor itself on behalf of service '{}'",
                service_name
            ),
        });
    }
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pid_rejects_group_and_init() {
        assert!(matches!(
            validate_pid(0, "svc"),
            Err(Error::InvalidPid { pid: 0, .. })
        ));
        assert!(matches!(
            validate_pid(-5, "svc"),
            Err(Error::InvalidPid { pid: -5, .. })
        ));
        assert!(matches!(
            validate_pid(1, "svc"),
            Err(Error::InvalidPid { pid: 1, .. })
        ));
    }

    #[test]
    fn test_validate_pid_rejects_self() {
        let own = nix::unistd::getpid().as_raw();
        assert!(validate_pid(own, "svc").is_err());
    }

    #[test]
    fn test_validate_pid_accepts_ordinary_pid() {
        let own = nix::unistd::getpid().as_raw();
        let other = if own == 4242 { 4243 } else { 4242 };
        assert_eq!(validate_pid(other, "svc").unwrap().as_raw(), other);
    }

    #[test]
    fn test_circular_dependency_display() {
        let err = Error::CircularDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert!(err.suggestion().unwrap().contains("a, b, a"));
    }

    #[test]
    fn test_with_suggestion_appends_hint() {
        let err = Error::ServiceFailed("net/eth0".into());
        let text = err.with_suggestion();
        assert!(text.starts_with("Service 'net/eth0' has failed"));
        assert!(text.contains("Hint: Reset 'net/eth0'"));
    }
}
