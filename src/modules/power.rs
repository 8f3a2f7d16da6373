//! Reacts to the signals an init process receives from the kernel, from
//! `ctrlaltdel` and from operators.

use crate::config::format_duration;
use crate::error::Result;
use crate::event::{HookResult, Payload, SIGNAL};
use crate::module::{check_api_version, Module};
use crate::supervisor::{Supervisor, SystemState};
use nix::sys::signal::Signal;
use tracing::Level;

pub const NAME: &str = "power";

#[derive(Debug, Default)]
pub struct PowerModule;

impl Module for PowerModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, sv: &mut Supervisor, api_version: u32) -> Result<()> {
        check_api_version(NAME, api_version)?;
        sv.events().register_hook(&SIGNAL, NAME, |sv, event| {
            let Payload::Signal(signal) = event.payload else {
                return HookResult::NotApplicable;
            };
            on_signal(sv, signal)
        })?;
        Ok(())
    }
}

fn on_signal(sv: &mut Supervisor, signal: Signal) -> HookResult {
    match signal {
        // ctrl-alt-del
        Signal::SIGINT => sv.shutdown(SystemState::Reboot),
        Signal::SIGTERM => {
            let action = sv.settings().shutdown_action.system_state();
            sv.shutdown(action);
        }
        Signal::SIGPWR => sv.shutdown(SystemState::Poweroff),
        Signal::SIGHUP => {
            sv.report(Level::INFO, "Hot reload requested");
            sv.request_hot_reload();
        }
        Signal::SIGUSR1 => {
            for line in status_table(sv) {
                sv.report(Level::INFO, line);
            }
        }
        _ => return HookResult::NotApplicable,
    }
    HookResult::Handled
}

/// One line per service: name, state, rough state, time in that rough
/// state and live pids.
pub fn status_table(sv: &Supervisor) -> Vec<String> {
    let now = sv.now();
    let mut lines = vec![format!(
        "System {} in runlevel {}, {} services",
        sv.system_state(),
        sv.runlevel(),
        sv.registry().len()
    )];
    let mut rows: Vec<String> = sv
        .registry()
        .iter()
        .map(|(_, service)| {
            let since = (now - service.rough_since()).to_std().unwrap_or_default();
            let pids: Vec<String> = service
                .processes()
                .iter()
                .filter(|p| !p.is_free())
                .filter_map(|p| p.pid().map(|pid| format!("{}:{}", p.kind().name, pid)))
                .collect();
            format!(
                "  {:<24} {:<28} {:<9} {:>6} {}",
                service.name(),
                service.current().name,
                service.rough(),
                format_duration(since),
                pids.join(" ")
            )
        })
        .collect();
    rows.sort();
    lines.extend(rows);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, ShutdownAction};
    use crate::registry::Service;

    fn supervisor(settings: Settings) -> Supervisor {
        let mut sv = Supervisor::new(settings);
        sv.load_modules(vec![Box::new(PowerModule)]);
        sv
    }

    #[test]
    fn test_sigint_reboots() {
        let mut sv = supervisor(Settings::default());
        assert_eq!(sv.emit(&SIGNAL, Payload::Signal(Signal::SIGINT)), HookResult::Handled);
        assert_eq!(sv.system_state(), SystemState::Stopping);
        assert_eq!(sv.shutdown_action(), SystemState::Reboot);
    }

    #[test]
    fn test_sigterm_uses_configured_action() {
        let settings = Settings {
            shutdown_action: ShutdownAction::Halt,
            ..Settings::default()
        };
        let mut sv = supervisor(settings);
        let _ = sv.emit(&SIGNAL, Payload::Signal(Signal::SIGTERM));
        assert_eq!(sv.shutdown_action(), SystemState::Halt);
    }

    #[test]
    fn test_sighup_requests_hot_reload() {
        let mut sv = supervisor(Settings::default());
        let _ = sv.emit(&SIGNAL, Payload::Signal(Signal::SIGHUP));
        assert_eq!(sv.system_state(), SystemState::Execve);
    }

    #[test]
    fn test_unrelated_signal_is_not_applicable() {
        let mut sv = supervisor(Settings::default());
        assert_eq!(
            sv.emit(&SIGNAL, Payload::Signal(Signal::SIGWINCH)),
            HookResult::NotApplicable
        );
        assert_eq!(sv.system_state(), SystemState::Starting);
    }

    #[test]
    fn test_status_table_lists_services() {
        let mut sv = supervisor(Settings::default());
        sv.admit(Service::new("sshd")).unwrap();
        let table = status_table(&sv);
        assert_eq!(table.len(), 2);
        assert!(table[1].contains("sshd"));
        assert!(table[1].contains("New"));
    }
}
