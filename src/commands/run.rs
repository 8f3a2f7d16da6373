use crate::cli::Cli;
use anyhow::Context;
use nix::sys::reboot::{reboot, RebootMode};
use nix::unistd::{execv, getpid, sync};
use service_supervisor::config::{Config, Parser as ConfigParser};
use service_supervisor::supervisor::{BootOptions, Supervisor, SystemState};
use std::ffi::CString;
use std::path::Path;

/// Boots the supervisor, runs it until a terminal system state and carries
/// out that state.
///
/// As pid 1 nothing may end the process except a reboot or a re-exec, so
/// configuration and boot problems are logged and the scheduler runs
/// anyway; with nothing started it proceeds to the shutdown action.
pub fn run_supervisor(cli: &Cli) -> anyhow::Result<()> {
    let as_init = getpid().as_raw() == 1;

    let config = match ConfigParser::new().load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) if as_init => {
            tracing::error!(error = %e, "Configuration unusable, booting with defaults");
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };
    let dump_path = config.settings.dump_path.clone();
    let options = BootOptions::parse(&cli.boot_args);

    let mut sv = Supervisor::builder()
        .config(config)
        .builtin_modules(true)
        .build()?;
    sv.install_signal_handlers()
        .context("Failed to install signal handlers")?;

    if let Err(e) = sv.boot(&options) {
        if !as_init {
            return Err(e.into());
        }
        tracing::error!(error = %e, "Boot failed");
    }

    let outcome = sv.run();
    finish(&mut sv, outcome, as_init, &cli.boot_args, &dump_path)
}

fn finish(
    sv: &mut Supervisor,
    outcome: SystemState,
    as_init: bool,
    boot_args: &[String],
    dump_path: &Path,
) -> anyhow::Result<()> {
    match outcome {
        SystemState::Execve => {
            sv.hand_over()
                .context("Failed to hand over output pipes")?
                .write(dump_path)
                .with_context(|| format!("Failed to write {}", dump_path.display()))?;
            let mut args = boot_args.to_vec();
            if !args.iter().any(|a| a == "hot_reload") {
                args.push("hot_reload".to_string());
            }
            reexec(&args)
        }
        SystemState::Restart => {
            sv.unload_modules();
            let args: Vec<String> = boot_args
                .iter()
                .filter(|a| *a != "hot_reload")
                .cloned()
                .collect();
            reexec(&args)
        }
        SystemState::Reboot | SystemState::Halt | SystemState::Poweroff => {
            sv.unload_modules();
            sync();
            if !as_init {
                tracing::info!(action = %outcome, "Not pid 1, leaving the {} to the real init", outcome);
                return Ok(());
            }
            let mode = match outcome {
                SystemState::Reboot => RebootMode::RB_AUTOBOOT,
                SystemState::Halt => RebootMode::RB_HALT_SYSTEM,
                _ => RebootMode::RB_POWER_OFF,
            };
            let err = match reboot(mode) {
                Ok(never) => match never {},
                Err(errno) => errno,
            };
            Err(anyhow::anyhow!("reboot({:?}) failed: {}", mode, err))
        }
        _ => {
            sv.unload_modules();
            tracing::info!(state = %outcome, "Supervisor exiting");
            Ok(())
        }
    }
}

/// Replaces the process with a fresh copy of this binary.
fn reexec(args: &[String]) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    let path = CString::new(exe.as_os_str().as_encoded_bytes())?;
    let argv = std::iter::once(Ok(path.clone()))
        .chain(args.iter().map(|a| CString::new(a.as_str())))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(exe = %exe.display(), "Re-executing");
    let err = match execv(&path, &argv) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    Err(anyhow::anyhow!("execv {} failed: {}", exe.display(), err))
}
